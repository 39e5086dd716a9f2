//! Batch response reconciliation.
//!
//! [`Reconciler`] is a plain state machine fed one message at a time, [`pipeline`]
//! drives it over a [`PgTransport`].
//!
//! The batch is finished only by `ReadyForQuery`. Counting `CommandComplete` up to
//! the expected number is never enough, an error or a notice may still be on the
//! wire before the boundary.
use std::{future::poll_fn, task::Poll};

use crate::{
    Result,
    batch::EncodedBatch,
    common::verbose,
    postgres::{
        ErrorResponse, FramedMessage, ProtocolError,
        backend::{CommandComplete, ReadyForQuery},
    },
    transport::{PgTransport, PgTransportExt},
};

/// How a batch ended.
#[derive(Debug, Clone)]
pub enum Terminal {
    /// Every query completed.
    Ready,
    /// The first error reported by the backend, later queries were skipped.
    Failed(ErrorResponse),
}

/// Result of one batch round trip.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// `CommandComplete` received before the first error.
    pub completed: usize,
    pub terminal: Terminal,
}

impl BatchOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self.terminal, Terminal::Ready)
    }

    pub fn error(&self) -> Option<&ErrorResponse> {
        match &self.terminal {
            Terminal::Ready => None,
            Terminal::Failed(err) => Some(err),
        }
    }

    /// Turn a failed batch into [`ErrorKind::Database`][crate::ErrorKind].
    ///
    /// The partial completion count is lost, use the fields directly to keep it.
    pub fn into_result(self) -> Result<usize> {
        match self.terminal {
            Terminal::Ready => Ok(self.completed),
            Terminal::Failed(err) => Err(err.into()),
        }
    }
}

/// Response state of a single batch.
#[derive(Debug)]
pub struct Reconciler {
    expected: usize,
    completed: usize,
    error: Option<ErrorResponse>,
    done: bool,
}

impl Reconciler {
    /// Expect `expected` completions before the batch `ReadyForQuery`.
    pub fn new(expected: usize) -> Self {
        Self { expected, completed: 0, error: None, done: false }
    }

    /// Completions counted so far.
    pub fn completed(&self) -> usize {
        self.completed
    }

    /// `ReadyForQuery` was fed.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed the next backend message.
    ///
    /// Returns the outcome once `ReadyForQuery` is fed, `None` while still draining.
    /// More completions than expected is reported only at the boundary, so the
    /// stream is still in sync when [`ProtocolError::OverCompletion`] is returned.
    pub fn feed(&mut self, frame: FramedMessage) -> Result<Option<BatchOutcome>, ProtocolError> {
        if self.done {
            return Err(ProtocolError::unexpected_phase(frame.msgtype, "finished batch"));
        }

        match frame.msgtype {
            CommandComplete::MSGTYPE => {
                if self.error.is_none() {
                    self.completed += 1;
                }
            },
            ErrorResponse::MSGTYPE => {
                let err = frame.decode::<ErrorResponse>()?;
                verbose!(completed = self.completed, "{err}");
                self.error.get_or_insert(err);
            },
            ReadyForQuery::MSGTYPE => {
                frame.decode::<ReadyForQuery>()?;
                self.done = true;

                if self.completed > self.expected {
                    return Err(ProtocolError::OverCompletion {
                        expected: self.expected,
                        completed: self.completed,
                    });
                }

                let terminal = match self.error.take() {
                    Some(err) => Terminal::Failed(err),
                    None => Terminal::Ready,
                };
                return Ok(Some(BatchOutcome { completed: self.completed, terminal }));
            },
            _msgtype => {
                verbose!(msgtype = crate::postgres::backend::message_name(_msgtype), "ignored in batch");
            },
        }

        Ok(None)
    }
}

/// Write `batch` and read its responses up to the batch `ReadyForQuery`.
///
/// A backend error does not fail this function, it is returned in the
/// [`BatchOutcome`] after the batch is drained.
///
/// Responses are read while the batch is still being written. A batch larger
/// than the socket buffers would otherwise stall both peers once the backend
/// blocks on its own unread responses.
pub async fn pipeline<IO: PgTransport>(batch: &EncodedBatch, mut io: IO) -> Result<BatchOutcome> {
    verbose!(expected = batch.expected(), len = batch.as_bytes().len(), "pipeline");

    io.send_raw(batch.as_bytes());

    let mut flushed = false;
    let mut reconciler = Reconciler::new(batch.expected());
    loop {
        let frame = poll_fn(|cx| -> Poll<Result<FramedMessage>> {
            if !flushed {
                if let Poll::Ready(result) = io.poll_flush(cx) {
                    result?;
                    flushed = true;
                }
            }
            io.poll_recv::<FramedMessage>(cx)
        })
        .await?;

        if let Some(outcome) = reconciler.feed(frame)? {
            if !flushed {
                io.flush().await?;
            }
            return Ok(outcome);
        }
    }
}

#[cfg(test)]
mod test {
    use bytes::{Bytes, BytesMut};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

    use super::*;
    use crate::{
        batch::{QueryDescriptor, encode_batch, encode_uniform_batch},
        error::ErrorKind,
        postgres::frontend,
        stream::PgStream,
    };

    fn msg(msgtype: u8, body: &'static [u8]) -> FramedMessage {
        FramedMessage { msgtype, body: Bytes::from_static(body) }
    }

    fn frames(messages: &[(u8, &[u8])]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for (msgtype, body) in messages {
            frontend::write_envelope(*msgtype, body, &mut buf);
        }
        buf.to_vec()
    }

    fn harbors(count: usize) -> EncodedBatch {
        let query = QueryDescriptor::new("harbors", 10).column("id").column("name");
        encode_uniform_batch(&query, count).unwrap()
    }

    #[test]
    fn completes_only_at_ready() {
        let mut rec = Reconciler::new(2);
        assert!(rec.feed(msg(b'1', b"")).unwrap().is_none());
        assert!(rec.feed(msg(b'C', b"SELECT 10\0")).unwrap().is_none());
        assert!(rec.feed(msg(b'C', b"SELECT 10\0")).unwrap().is_none());
        assert_eq!(rec.completed(), 2);
        assert!(!rec.is_done());

        let outcome = rec.feed(msg(b'Z', b"I")).unwrap().unwrap();
        assert_eq!(outcome.completed, 2);
        assert!(outcome.is_ready());
        assert!(rec.is_done());

        assert!(rec.feed(msg(b'C', b"SELECT 1\0")).is_err());
    }

    #[test]
    fn harbors_limits() {
        let query = |limit| QueryDescriptor::new("harbors", limit).column("id").column("name");
        let batch = encode_batch(&[query(1), query(2)]).unwrap();
        let bytes = batch.as_bytes();
        assert_eq!(bytes.windows(5).filter(|w| *w == b"S\0\0\0\x04").count(), 1);
        assert!(bytes.ends_with(b"S\0\0\0\x04"));

        let mut rec = Reconciler::new(batch.expected());
        rec.feed(msg(b'C', b"SELECT 1\0")).unwrap();
        rec.feed(msg(b'C', b"SELECT 2\0")).unwrap();
        let outcome = rec.feed(msg(b'Z', b"I")).unwrap().unwrap();
        assert_eq!(outcome.completed, 2);
        assert!(matches!(outcome.terminal, Terminal::Ready));
    }

    #[test]
    fn first_error_wins() {
        let mut rec = Reconciler::new(3);
        rec.feed(msg(b'C', b"SELECT 1\0")).unwrap();
        rec.feed(msg(b'E', b"SERROR\0C42P01\0Mfirst\0\0")).unwrap();
        rec.feed(msg(b'C', b"SELECT 1\0")).unwrap();
        rec.feed(msg(b'E', b"SERROR\0C42P01\0Msecond\0\0")).unwrap();

        let outcome = rec.feed(msg(b'Z', b"I")).unwrap().unwrap();
        assert_eq!(outcome.completed, 1);
        assert_eq!(outcome.error().unwrap().message(), "first");

        let err = outcome.into_result().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Database(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn zero_queries() {
        let mut rec = Reconciler::new(0);
        let outcome = rec.feed(msg(b'Z', b"I")).unwrap().unwrap();
        assert_eq!(outcome.completed, 0);
        assert_eq!(outcome.into_result().unwrap(), 0);
    }

    #[test]
    fn over_completion_reported_at_ready() {
        let mut rec = Reconciler::new(1);
        rec.feed(msg(b'C', b"SELECT 1\0")).unwrap();
        rec.feed(msg(b'C', b"SELECT 1\0")).unwrap();
        assert!(!rec.is_done());

        let err = rec.feed(msg(b'Z', b"I")).unwrap_err();
        assert!(matches!(err, ProtocolError::OverCompletion { expected: 1, completed: 2 }));
        assert!(!err.is_framing());
        assert!(rec.is_done());
    }

    #[tokio::test]
    async fn two_queries_ready() {
        let (client, mut server) = duplex(1024);
        let batch = harbors(2);

        let server = tokio::spawn(async move {
            let mut sent = vec![0u8; batch.as_bytes().len()];
            server.read_exact(&mut sent).await.unwrap();
            assert_eq!(&sent[..], &batch.as_bytes()[..]);
            server.write_all(&frames(&[
                (b'1', b""), (b'2', b""), (b'D', b"\0\x01\0\0\0\x011"), (b'C', b"SELECT 1\0"),
                (b'1', b""), (b'2', b""), (b'C', b"SELECT 0\0"),
                (b'Z', b"I"),
            ])).await.unwrap();
            server
        });

        let mut stream = PgStream::new(client);
        let outcome = pipeline(&harbors(2), &mut stream).await.unwrap();
        assert_eq!(outcome.completed, 2);
        assert!(outcome.is_ready());
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn error_drains_to_ready() {
        let (client, mut server) = duplex(1024);
        server.write_all(&frames(&[
            (b'C', b"SELECT 1\0"),
            (b'E', b"SERROR\0C42P01\0Mx\0\0"),
            (b'T', b"\0\0"),
            (b'D', b"\0\0"),
            (b'Z', b"E"),
            // the next response, must stay unread
            (b'C', b"SENTINEL\0"),
        ])).await.unwrap();

        let mut stream = PgStream::new(client);
        let outcome = pipeline(&harbors(3), &mut stream).await.unwrap();
        assert_eq!(outcome.completed, 1);
        let Terminal::Failed(err) = &outcome.terminal else {
            panic!("expected failed batch");
        };
        assert_eq!(err.message(), "x");

        let next: FramedMessage = stream.recv().await.unwrap();
        assert_eq!(&next.body[..], b"SENTINEL\0");
    }

    #[tokio::test]
    async fn batch_is_reusable() {
        let (client, mut server) = duplex(4096);
        let batch = encode_batch(&[QueryDescriptor::new("ports", 5)]).unwrap();
        let expected = batch.clone();

        let server = tokio::spawn(async move {
            for _ in 0..3 {
                let mut sent = vec![0u8; expected.as_bytes().len()];
                server.read_exact(&mut sent).await.unwrap();
                assert_eq!(&sent[..], &expected.as_bytes()[..]);
                server.write_all(&frames(&[(b'C', b"SELECT 5\0"), (b'Z', b"I")])).await.unwrap();
            }
            server
        });

        let mut stream = PgStream::new(client);
        for _ in 0..3 {
            let outcome = pipeline(&batch, &mut stream).await.unwrap();
            assert_eq!(outcome.completed, 1);
        }
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn short_reads() {
        let (client, mut server) = duplex(2);
        let batch = harbors(2);
        let len = batch.as_bytes().len();

        let server = tokio::spawn(async move {
            let mut sent = vec![0u8; len];
            server.read_exact(&mut sent).await.unwrap();
            server.write_all(&frames(&[
                (b'C', b"SELECT 10\0"),
                (b'C', b"SELECT 10\0"),
                (b'Z', b"I"),
            ])).await.unwrap();
            server
        });

        let mut stream = PgStream::new(client);
        let outcome = pipeline(&batch, &mut stream).await.unwrap();
        assert_eq!(outcome.completed, 2);
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn reads_while_writing_large_batch() {
        // far smaller than both the batch and the responses
        let (client, mut server) = duplex(64);
        let batch = harbors(50);
        let len = batch.as_bytes().len();

        let server = tokio::spawn(async move {
            let mut head = [0u8; 16];
            server.read_exact(&mut head).await.unwrap();

            // answer before the rest of the batch is read
            for _ in 0..50 {
                server.write_all(&frames(&[
                    (b'1', b""), (b'2', b""), (b'D', b"\0\x01\0\0\0\x011"), (b'C', b"SELECT 1\0"),
                ])).await.unwrap();
            }

            let mut rest = vec![0u8; len - head.len()];
            server.read_exact(&mut rest).await.unwrap();
            server.write_all(&frames(&[(b'Z', b"I")])).await.unwrap();
            server
        });

        let mut stream = PgStream::new(client);
        let outcome = pipeline(&batch, &mut stream).await.unwrap();
        assert_eq!(outcome.completed, 50);
        assert!(outcome.is_ready());
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn closed_before_ready() {
        let (client, mut server) = duplex(1024);
        server.write_all(&frames(&[(b'C', b"SELECT 1\0")])).await.unwrap();
        drop(server);

        let mut stream = PgStream::new(client);
        let err = pipeline(&harbors(1), &mut stream).await.unwrap_err();
        assert!(err.is_fatal());
    }
}

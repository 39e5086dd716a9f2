//! The [`PgTransport`] trait.
use std::{
    io,
    task::{Context, Poll},
};

use crate::{
    Result,
    postgres::{BackendProtocol, FrontendProtocol, frontend},
};

/// A buffered stream which can send and receive postgres message.
///
/// Every phase in [`protocol`][crate::protocol] and [`pipeline`][crate::pipeline]
/// is written against this trait, [`PgStream`][crate::stream::PgStream] is the
/// io backed implementation.
pub trait PgTransport: Unpin {
    /// Poll to write every buffered message to the underlying io.
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>>;

    /// Poll to receive the next message.
    ///
    /// `NoticeResponse` is consumed by the implementor and never returned.
    ///
    /// `ErrorResponse` is returned like any other message. Whether it ends the
    /// current phase or must be drained up to `ReadyForQuery` is up to the caller.
    fn poll_recv<B: BackendProtocol>(&mut self, cx: &mut Context) -> Poll<Result<B>>;

    /// Buffer a message, nothing is written until flushed.
    fn send<F: FrontendProtocol>(&mut self, message: F);

    /// Buffer the untagged [`Startup`][frontend::Startup] message.
    fn send_startup(&mut self, startup: frontend::Startup);

    /// Buffer already encoded messages verbatim, like a cached batch.
    fn send_raw(&mut self, bytes: &[u8]);
}

impl<P> PgTransport for &mut P where P: PgTransport {
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        P::poll_flush(self, cx)
    }

    fn poll_recv<B: BackendProtocol>(&mut self, cx: &mut Context) -> Poll<Result<B>> {
        P::poll_recv(self, cx)
    }

    fn send<F: FrontendProtocol>(&mut self, message: F) {
        P::send(self, message);
    }

    fn send_startup(&mut self, startup: frontend::Startup) {
        P::send_startup(self, startup);
    }

    fn send_raw(&mut self, bytes: &[u8]) {
        P::send_raw(self, bytes);
    }
}

/// An extension trait to provide `Future` API for [`PgTransport`].
pub trait PgTransportExt: PgTransport {
    /// Flush the underlying io.
    fn flush(&mut self) -> impl Future<Output = io::Result<()>> {
        std::future::poll_fn(|cx|self.poll_flush(cx))
    }

    /// Receive a backend message.
    fn recv<B: BackendProtocol>(&mut self) -> impl Future<Output = Result<B>> {
        std::future::poll_fn(|cx|self.poll_recv(cx))
    }
}

impl<T> PgTransportExt for T where T: PgTransport { }

#[cfg(test)]
mod test {
    use bytes::{Bytes, BytesMut};
    use std::{
        collections::VecDeque,
        io,
        task::{Context, Poll},
    };

    use super::PgTransport;
    use crate::{
        Result,
        batch::{QueryDescriptor, encode_batch},
        pipeline::pipeline,
        postgres::{BackendProtocol, FrontendProtocol, ProtocolError, frontend},
        protocol::terminate,
    };

    /// Replays canned backend messages and records everything sent.
    #[derive(Default)]
    struct Scripted {
        inbox: VecDeque<(u8, &'static [u8])>,
        sent: BytesMut,
        flushed: usize,
    }

    impl PgTransport for Scripted {
        fn poll_flush(&mut self, _: &mut Context) -> Poll<io::Result<()>> {
            self.flushed += 1;
            Poll::Ready(Ok(()))
        }

        fn poll_recv<B: BackendProtocol>(&mut self, _: &mut Context) -> Poll<Result<B>> {
            let Some((msgtype, body)) = self.inbox.pop_front() else {
                return Poll::Ready(Err(ProtocolError::UnexpectedEof.into()));
            };
            Poll::Ready(Ok(B::decode(msgtype, Bytes::from_static(body))?))
        }

        fn send<F: FrontendProtocol>(&mut self, message: F) {
            frontend::write(message, &mut self.sent);
        }

        fn send_startup(&mut self, startup: frontend::Startup) {
            startup.write(&mut self.sent);
        }

        fn send_raw(&mut self, bytes: &[u8]) {
            self.sent.extend_from_slice(bytes);
        }
    }

    #[tokio::test]
    async fn pipeline_over_any_transport() {
        let mut io = Scripted::default();
        io.inbox.extend([(b'1', &b""[..]), (b'C', &b"SELECT 2\0"[..]), (b'Z', &b"T"[..])]);

        let batch = encode_batch(&[QueryDescriptor::new("ports", 2)]).unwrap();
        let outcome = pipeline(&batch, &mut io).await.unwrap();
        assert_eq!(outcome.completed, 1);
        assert_eq!(&io.sent[..], &batch.as_bytes()[..]);
        assert_eq!(io.flushed, 1);

        // nothing left, the next phase sees the end of the script
        assert!(pipeline(&batch, &mut io).await.unwrap_err().is_fatal());
    }

    #[tokio::test]
    async fn terminate_through_reference() {
        let mut io = Scripted::default();
        let mut by_ref = &mut io;
        terminate(&mut by_ref).await.unwrap();
        assert_eq!(&io.sent[..], b"X\0\0\0\x04");
    }
}

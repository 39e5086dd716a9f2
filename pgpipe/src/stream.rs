//! Buffered postgres stream over any duplex io.
use bytes::{Buf, BytesMut};
use std::{
    io,
    pin::Pin,
    task::{Context, Poll, ready},
};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::{
    Result,
    common::{notice, verbose},
    postgres::{
        BackendProtocol, FramedMessage, FrontendProtocol, MAX_MESSAGE_LEN, ProtocolError,
        backend::NoticeResponse, frontend,
    },
    transport::PgTransport,
};

const DEFAULT_BUF_CAPACITY: usize = 8 * 1024;

// msgtype + length
const HEADER: usize = 1 + 4;

/// Buffered connection to postgres.
///
/// Writes are buffered until flushed. Reads pull whole messages out of an internal
/// buffer, so leftover bytes of the next message stay available for the next read.
#[derive(Debug)]
pub struct PgStream<IO> {
    io: IO,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl<IO> PgStream<IO> {
    pub fn new(io: IO) -> Self {
        Self {
            io,
            read_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            write_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
        }
    }

    /// Returns the underlying io, any buffered bytes are discarded.
    pub fn into_inner(self) -> IO {
        self.io
    }
}

impl<IO> PgStream<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    /// Poll for exactly one framed message.
    ///
    /// Partial reads are retried until the whole message is buffered. End of stream
    /// before that is [`ProtocolError::UnexpectedEof`], a length field outside
    /// `4..=MAX_MESSAGE_LEN` is [`ProtocolError::InvalidLength`].
    pub fn poll_frame(&mut self, cx: &mut Context) -> Poll<Result<FramedMessage>> {
        loop {
            if let Some(mut header) = self.read_buf.get(..HEADER) {
                let msgtype = header.get_u8();
                let len = header.get_i32();

                if len < 4 || len as usize > MAX_MESSAGE_LEN {
                    return Poll::Ready(Err(ProtocolError::InvalidLength { msgtype, len }.into()));
                }

                let len = len as usize;
                if self.read_buf.len() >= 1 + len {
                    self.read_buf.advance(HEADER);
                    let body = self.read_buf.split_to(len - 4).freeze();
                    return Poll::Ready(Ok(FramedMessage { msgtype, body }));
                }

                self.read_buf.reserve(1 + len - self.read_buf.len());
            } else {
                self.read_buf.reserve(DEFAULT_BUF_CAPACITY);
            }

            let n = ready!(poll_read(&mut self.io, &mut self.read_buf, cx)?);
            if n == 0 {
                return Poll::Ready(Err(ProtocolError::UnexpectedEof.into()));
            }
        }
    }

    /// Poll to shutdown the write half of the underlying io.
    pub fn poll_shutdown(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_shutdown(cx)
    }
}

impl<IO> PgTransport for PgStream<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        while self.write_buf.has_remaining() {
            let n = ready!(Pin::new(&mut self.io).poll_write(cx, self.write_buf.chunk())?);
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.write_buf.advance(n);
        }
        Pin::new(&mut self.io).poll_flush(cx)
    }

    fn poll_recv<B: BackendProtocol>(&mut self, cx: &mut Context) -> Poll<Result<B>> {
        loop {
            let frame = ready!(self.poll_frame(cx)?);
            verbose!(msgtype = %(frame.msgtype as char), len = frame.wire_len(), "recv");

            if frame.msgtype == NoticeResponse::MSGTYPE {
                let _notice = frame.decode::<NoticeResponse>()?;
                notice!("{_notice}");
                continue;
            }

            return Poll::Ready(Ok(B::decode(frame.msgtype, frame.body)?));
        }
    }

    fn send<F: FrontendProtocol>(&mut self, message: F) {
        frontend::write(message, &mut self.write_buf);
    }

    fn send_startup(&mut self, startup: frontend::Startup) {
        startup.write(&mut self.write_buf);
    }

    fn send_raw(&mut self, bytes: &[u8]) {
        self.write_buf.extend_from_slice(bytes);
    }
}

/// Read once from `reader` into the spare capacity of `buf`.
fn poll_read<R>(reader: &mut R, buf: &mut BytesMut, cx: &mut Context) -> Poll<io::Result<usize>>
where
    R: AsyncRead + Unpin,
{
    let n = {
        let dst = buf.spare_capacity_mut();
        let mut read = ReadBuf::uninit(dst);
        let ptr = read.filled().as_ptr();
        ready!(Pin::new(reader).poll_read(cx, &mut read)?);

        // Ensure the pointer does not change from under us
        assert_eq!(ptr, read.filled().as_ptr());
        read.filled().len()
    };

    // SAFETY: `ReadBuf::filled` guarantees the first `n` spare bytes are initialized
    unsafe {
        buf.set_len(buf.len() + n);
    }

    Poll::Ready(Ok(n))
}

//! Postgres Frontend Messages
//!
//! <https://www.postgresql.org/docs/current/protocol-message-formats.html>
use bytes::{BufMut, Bytes, BytesMut};

use super::Oid;
use crate::ext::{BufMutExt, StrExt, UsizeExt};

// msgtype + length
const PREFIX: usize = 1 + 4;

/// Write a frontend message to `buf`.
pub fn write<F: FrontendProtocol>(msg: F, buf: &mut BytesMut) {
    let size_hint = msg.size_hint();
    buf.reserve(PREFIX + size_hint as usize);

    let offset = buf.len();
    buf.put_u8(F::MSGTYPE);
    buf.put_u32(4 + size_hint);

    msg.encode(&mut *buf);

    assert_eq!(
        buf.len() - offset,
        PREFIX + size_hint as usize,
        "Frontend message body size not equal to size hint"
    );
}

/// Write an arbitrary message envelope: `msgtype`, length including itself, then `body`.
pub fn write_envelope(msgtype: u8, body: &[u8], buf: &mut BytesMut) {
    buf.reserve(PREFIX + body.len());
    buf.put_u8(msgtype);
    buf.put_u32(4 + body.len().to_u32());
    buf.put_slice(body);
}

/// Encode an arbitrary message envelope into its own buffer.
pub fn encode_envelope(msgtype: u8, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(PREFIX + body.len());
    write_envelope(msgtype, body, &mut buf);
    buf.freeze()
}

/// A type which can be encoded into postgres frontend message
pub trait FrontendProtocol {
    /// Message type.
    const MSGTYPE: u8;

    /// Size of the main body.
    ///
    /// Note that this is **only** the size of main body as oppose of actual postgres message which
    /// include the length itself.
    fn size_hint(&self) -> u32;

    /// Write the main body of the message.
    ///
    /// The lenght of body written must be equal to the
    /// length returned by [`size_hint`][FrontendProtocol::size_hint].
    fn encode(self, buf: impl BufMut);
}

/// Postgres Startup frontend message
///
/// For historical reasons, the very first message sent by the client (the [`Startup`] message)
/// has no initial message-type byte, thus [`Startup`] does not implement [`FrontendProtocol`].
///
/// To write startup message, use [`Startup::write`].
#[derive(Debug)]
pub struct Startup<'a> {
    /// The database user name to connect as. Required; there is no default.
    pub user: &'a str,
    /// The database to connect to.
    pub database: &'a str,
}

impl Startup<'_> {
    /// Protocol version 3.0, major version in the most significant 16 bits.
    pub const PROTOCOL_VERSION: u32 = 196_608;

    pub fn write(self, buf: &mut BytesMut) {
        let offset = buf.len();

        // Length of message contents in bytes, including self.
        // reserve 4 bytes for length
        buf.put_u32(0);
        buf.put_u32(Self::PROTOCOL_VERSION);

        buf.put_nul_string("user");
        buf.put_nul_string(self.user);
        buf.put_nul_string("database");
        buf.put_nul_string(self.database);

        // A zero byte is required as a terminator after the last name/value pair.
        buf.put_u8(b'\0');

        let mut written_buf = &mut buf[offset..];
        written_buf.put_u32(written_buf.len().to_u32());
    }
}

/// Encode the startup message into its own buffer.
pub fn encode_startup(user: &str, database: &str) -> Bytes {
    let mut buf = BytesMut::new();
    Startup { user, database }.write(&mut buf);
    buf.freeze()
}

/// Identifies the message as a simple query
pub struct Query<'a> {
    /// the query string itself
    pub sql: &'a str,
}

impl FrontendProtocol for Query<'_> {
    const MSGTYPE: u8 = b'Q';

    fn size_hint(&self) -> u32 {
        self.sql.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.sql);
    }
}

/// Identifies the message as a Parse command
pub struct Parse<'a> {
    /// prepared statement name (an empty string selects the unnamed prepared statement).
    pub prepare_name: &'a str,
    /// The query string to be parsed.
    pub sql: &'a str,
    /// Object ID of each parameter data type the frontend wants to prespecify.
    ///
    /// Can be empty, the server then infers every parameter type.
    pub oids: &'a [Oid],
}

impl FrontendProtocol for Parse<'_> {
    const MSGTYPE: u8 = b'P';

    fn size_hint(&self) -> u32 {
        self.prepare_name.nul_string_len()
            + self.sql.nul_string_len()
            + 2
            + 4 * self.oids.len().to_u32()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.prepare_name);
        buf.put_nul_string(self.sql);
        buf.put_u16(self.oids.len() as u16);
        for oid in self.oids {
            buf.put_u32(*oid);
        }
    }
}

/// Identifies the message as a Bind command.
///
/// Every parameter and result column use the text format, so both format code
/// lists are written empty.
pub struct Bind<'a> {
    /// The name of the destination portal (an empty string selects the unnamed portal).
    pub portal_name: &'a str,
    /// The name of the source prepared statement (an empty string selects the unnamed prepared statement).
    pub stmt_name: &'a str,
    /// Text encoded parameter values, `None` is sent as NULL (length -1).
    pub params: &'a [Option<&'a [u8]>],
}

impl FrontendProtocol for Bind<'_> {
    const MSGTYPE: u8 = b'B';

    fn size_hint(&self) -> u32 {
        self.portal_name.nul_string_len()
            + self.stmt_name.nul_string_len()
            + 2 // param formats len
            + 2 // params len
            + self
                .params
                .iter()
                .fold(0, |acc, p| acc + 4 + p.map_or(0, |p| p.len().to_u32()))
            + 2 // result formats len
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.portal_name);
        buf.put_nul_string(self.stmt_name);

        buf.put_u16(0);

        buf.put_u16(self.params.len() as u16);
        for param in self.params {
            match param {
                Some(value) => {
                    buf.put_i32(value.len() as i32);
                    buf.put_slice(value);
                }
                None => buf.put_i32(-1),
            }
        }

        buf.put_u16(0);
    }
}

/// Identifies the message as a Execute command
pub struct Execute<'a> {
    /// The name of the portal to execute (an empty string selects the unnamed portal).
    pub portal_name: &'a str,
    /// Maximum number of rows to return, if portal contains a query that returns rows
    /// (ignored otherwise). Zero denotes “no limit”.
    pub max_row: u32,
}

impl FrontendProtocol for Execute<'_> {
    const MSGTYPE: u8 = b'E';

    fn size_hint(&self) -> u32 {
        self.portal_name.nul_string_len() + 4
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.portal_name);
        buf.put_u32(self.max_row);
    }
}

/// Identifies the message as COPY data.
pub struct CopyData<'a> {
    /// Data that forms part of a COPY data stream.
    ///
    /// Messages sent from the frontend may divide the data stream arbitrarily.
    pub data: &'a [u8],
}

impl FrontendProtocol for CopyData<'_> {
    const MSGTYPE: u8 = b'd';

    fn size_hint(&self) -> u32 {
        self.data.len().to_u32()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_slice(self.data);
    }
}

macro_rules! unit_msg {
    ($(
        $(#[$doc:meta])* struct $name:ident, $ty:literal;
    )*) => {$(
        $(#[$doc])*
        #[derive(Debug)]
        pub struct $name;

        impl FrontendProtocol for $name {
            const MSGTYPE: u8 = $ty;

            fn size_hint(&self) -> u32 { 0 }

            fn encode(self, _: impl BufMut) { }
        }
    )*};
}

unit_msg! {
    /// Identifies the message as a Sync command
    struct Sync, b'S';

    /// Identifies the message as a COPY-complete indicator.
    struct CopyDone, b'c';

    /// Identifies the message as a termination.
    struct Terminate, b'X';
}

#[cfg(test)]
mod test {
    use bytes::BytesMut;

    use super::*;

    #[test]
    fn envelope() {
        assert_eq!(&encode_envelope(b'd', b"ab")[..], b"d\0\0\0\x06ab");
        assert_eq!(&encode_envelope(b'c', b"")[..], b"c\0\0\0\x04");
    }

    #[test]
    fn startup() {
        let bytes = encode_startup("postgres", "app");
        let params = b"user\0postgres\0database\0app\0\0";

        assert_eq!(&bytes[..4], &((8 + params.len()) as u32).to_be_bytes());
        assert_eq!(&bytes[4..8], &196_608u32.to_be_bytes());
        assert_eq!(&bytes[8..], params);
    }

    #[test]
    fn terminate_and_sync() {
        let mut buf = BytesMut::new();
        write(Terminate, &mut buf);
        write(Sync, &mut buf);
        assert_eq!(&buf[..], b"X\0\0\0\x04S\0\0\0\x04");
    }

    #[test]
    fn bind_text_params() {
        let mut buf = BytesMut::new();
        write(Bind { portal_name: "", stmt_name: "", params: &[Some(&b"10"[..]), None] }, &mut buf);

        let mut expect = vec![b'B'];
        expect.extend_from_slice(&22u32.to_be_bytes());
        expect.extend_from_slice(b"\0\0");
        expect.extend_from_slice(&[0, 0, 0, 2]);
        expect.extend_from_slice(&2i32.to_be_bytes());
        expect.extend_from_slice(b"10");
        expect.extend_from_slice(&(-1i32).to_be_bytes());
        expect.extend_from_slice(&[0, 0]);
        assert_eq!(&buf[..], &expect[..]);
    }

    #[test]
    fn parse_and_execute() {
        let mut buf = BytesMut::new();
        write(Parse { prepare_name: "", sql: "SELECT $1", oids: &[] }, &mut buf);
        write(Execute { portal_name: "", max_row: 0 }, &mut buf);

        let mut expect = vec![b'P'];
        expect.extend_from_slice(&(4 + 1 + 10 + 2u32).to_be_bytes());
        expect.extend_from_slice(b"\0SELECT $1\0\0\0");
        expect.push(b'E');
        expect.extend_from_slice(&9u32.to_be_bytes());
        expect.extend_from_slice(b"\0\0\0\0\0");
        assert_eq!(&buf[..], &expect[..]);
    }
}

//! Postgres Backend Messages
//!
//! Only the messages the pipeline acts on are decoded, everything else is
//! carried as an undecoded [`FramedMessage`].
use bytes::{Buf, Bytes};
use std::fmt;

use super::ProtocolError;
use crate::ext::{BytesExt, FmtExt};

/// A type that can be decoded into postgres backend message
pub trait BackendProtocol: Sized {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError>;
}

/// A single undecoded backend message.
///
/// The length field is not kept, `body` is exactly `length - 4` bytes.
#[derive(Clone)]
pub struct FramedMessage {
    pub msgtype: u8,
    pub body: Bytes,
}

impl FramedMessage {
    /// Decode into a concrete message, checking the message type.
    pub fn decode<B: BackendProtocol>(self) -> Result<B, ProtocolError> {
        B::decode(self.msgtype, self.body)
    }

    /// The length field as it appeared on the wire.
    pub fn wire_len(&self) -> usize {
        4 + self.body.len()
    }
}

impl BackendProtocol for FramedMessage {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        Ok(Self { msgtype, body })
    }
}

impl fmt::Debug for FramedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramedMessage")
            .field("msgtype", &message_name(self.msgtype))
            .field("body", &self.body.lossy())
            .finish()
    }
}

/// Get message name from message type.
///
/// Returns `"Unknown"` for unknown message type.
pub fn message_name(msgtype: u8) -> &'static str {
    match msgtype {
        b'R' => "Authentication",
        b'K' => "BackendKeyData",
        b'2' => "BindComplete",
        b'3' => "CloseComplete",
        b'C' => "CommandComplete",
        b'G' => "CopyInResponse",
        b'D' => "DataRow",
        b'E' => "ErrorResponse",
        b'I' => "EmptyQueryResponse",
        b'v' => "NegotiateProtocolVersion",
        b'n' => "NoData",
        b'N' => "NoticeResponse",
        b't' => "ParameterDescription",
        b'S' => "ParameterStatus",
        b'1' => "ParseComplete",
        b's' => "PortalSuspended",
        b'Z' => "ReadyForQuery",
        b'T' => "RowDescription",
        _ => "Unknown",
    }
}

macro_rules! assert_msgtype {
    ($typ:ident) => {
        if Self::MSGTYPE != $typ {
            return Err(ProtocolError::unexpected(Self::MSGTYPE, $typ))
        }
    };
}

macro_rules! ensure_len {
    ($body:ident, $len:expr) => {
        if $body.remaining() < $len {
            return Err(ProtocolError::malformed(Self::MSGTYPE))
        }
    };
}

/// Identifies the message as an authentication request.
///
/// Only the request code is decoded, trust authentication answers with `0`
/// and anything else asks for a credential exchange.
#[derive(Debug)]
pub struct Authentication {
    pub code: u32,
}

impl Authentication {
    pub const MSGTYPE: u8 = b'R';

    /// Specifies that the authentication was successful.
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }

    /// Human readable name of the requested method.
    pub fn method(&self) -> &'static str {
        match self.code {
            0 => "Ok",
            2 => "KerberosV5",
            3 => "CleartextPassword",
            5 => "MD5Password",
            7 => "GSS",
            8 => "GSSContinue",
            9 => "SSPI",
            10 => "SASL",
            11 => "SASLContinue",
            12 => "SASLFinal",
            _ => "Unknown",
        }
    }
}

impl BackendProtocol for Authentication {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        ensure_len!(body, 4);
        Ok(Self { code: body.get_u32() })
    }
}

/// Identifies the message as cancellation key data.
#[derive(Debug)]
pub struct BackendKeyData {
    /// The process ID of this backend.
    pub process_id: u32,
    /// The secret key of this backend.
    pub secret_key: u32,
}

impl BackendKeyData {
    pub const MSGTYPE: u8 = b'K';
}

impl BackendProtocol for BackendKeyData {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        ensure_len!(body, 8);
        Ok(Self {
            process_id: body.get_u32(),
            secret_key: body.get_u32(),
        })
    }
}

/// Identifies the message as a run-time parameter status report
pub struct ParameterStatus {
    /// The name of the run-time parameter being reported
    pub name: Bytes,
    /// The current value of the parameter
    pub value: Bytes,
}

impl ParameterStatus {
    pub const MSGTYPE: u8 = b'S';
}

impl BackendProtocol for ParameterStatus {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        let name = body.get_nul_bytes().ok_or(ProtocolError::malformed(msgtype))?;
        let value = body.get_nul_bytes().ok_or(ProtocolError::malformed(msgtype))?;
        Ok(Self { name, value })
    }
}

impl fmt::Debug for ParameterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name.lossy(), self.value.lossy())
    }
}

/// Identifies the message as a command-completed response
///
/// For a SELECT or CREATE TABLE AS command, the tag is SELECT rows where rows is the number of rows retrieved.
///
/// For a COPY command, the tag is COPY rows where rows is the number of rows copied.
#[derive(Debug)]
pub struct CommandComplete {
    /// The command tag. This is usually a single word that identifies which SQL command was completed.
    pub tag: Bytes,
}

impl CommandComplete {
    pub const MSGTYPE: u8 = b'C';

    /// Number of rows affected by the command, `0` for commands without a row count.
    pub fn rows(&self) -> u64 {
        let Ok(tag) = std::str::from_utf8(&self.tag) else {
            return 0;
        };
        let mut whs = tag.split_whitespace();
        let Some(command) = whs.next() else {
            return 0;
        };
        let Some(rows) = whs.next() else {
            return 0;
        };
        match command {
            // INSERT oid rows
            "INSERT" => whs.next().unwrap_or_default(),
            "SELECT" | "UPDATE" | "DELETE" | "MERGE" | "FETCH" | "MOVE" | "COPY" => rows,
            _ => return 0,
        }
        .parse()
        .unwrap_or_default()
    }
}

impl BackendProtocol for CommandComplete {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            tag: body.get_nul_bytes().ok_or(ProtocolError::malformed(msgtype))?,
        })
    }
}

/// Identifies the message as a Start Copy In response.
///
/// The frontend must now send copy-in data.
#[derive(Debug)]
pub struct CopyInResponse {
    /// `0` indicates the overall COPY format is textual.
    pub format: u8,
    /// The number of columns in the data to be copied.
    pub columns: u16,
}

impl CopyInResponse {
    pub const MSGTYPE: u8 = b'G';
}

impl BackendProtocol for CopyInResponse {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        ensure_len!(body, 3);
        Ok(Self {
            format: body.get_u8(),
            columns: body.get_u16(),
        })
    }
}

/// Identifies the message type. ReadyForQuery is sent whenever the backend is ready for a new query cycle.
#[derive(Debug)]
pub struct ReadyForQuery {
    /// Current backend transaction status indicator.
    ///
    /// `I` if idle (not in a transaction block), `T` if in a transaction block,
    /// or `E` if in a failed transaction block.
    pub status: u8,
}

impl ReadyForQuery {
    pub const MSGTYPE: u8 = b'Z';
}

impl BackendProtocol for ReadyForQuery {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        ensure_len!(body, 1);
        Ok(Self { status: body.get_u8() })
    }
}

/// Identifies the message as an error
///
/// The message body consists of one or more identified fields, followed by a zero byte as a terminator.
/// Fields can appear in any order.
///
/// For each field there is the following:
///
/// `Byte1` A code identifying the field type; if zero, this is the message terminator and no string follows.
/// Since more field types might be added in future,
/// frontends should silently ignore fields of unrecognized type.
///
/// `String` The field value.
#[derive(Clone)]
pub struct ErrorResponse {
    pub body: Bytes,
}

impl ErrorResponse {
    pub const MSGTYPE: u8 = b'E';

    /// Iterate `(code, value)` fields of the body.
    pub fn fields(&self) -> Fields {
        Fields { body: self.body.clone() }
    }

    /// Value of the field identified by `code`, empty if absent.
    pub fn field(&self, code: u8) -> Bytes {
        self.fields()
            .find_map(|(c, value)| (c == code).then_some(value))
            .unwrap_or_default()
    }

    /// `ERROR`, `FATAL`, or `PANIC`, possibly localized.
    pub fn severity(&self) -> String {
        String::from_utf8_lossy(&self.field(b'S')).into_owned()
    }

    /// The SQLSTATE code for the error.
    pub fn code(&self) -> String {
        String::from_utf8_lossy(&self.field(b'C')).into_owned()
    }

    /// The primary human-readable error message.
    pub fn message(&self) -> String {
        String::from_utf8_lossy(&self.field(b'M')).into_owned()
    }

    /// An optional secondary error message carrying more detail about the problem.
    pub fn detail(&self) -> Option<String> {
        let detail = self.field(b'D');
        (!detail.is_empty()).then(|| String::from_utf8_lossy(&detail).into_owned())
    }

    /// An optional suggestion what to do about the problem.
    pub fn hint(&self) -> Option<String> {
        let hint = self.field(b'H');
        (!hint.is_empty()).then(|| String::from_utf8_lossy(&hint).into_owned())
    }
}

impl BackendProtocol for ErrorResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { body })
    }
}

impl std::error::Error for ErrorResponse { }

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = self.field(b'S');
        if !severity.is_empty() {
            write!(f, "{}: ", severity.lossy())?;
        }
        write!(f, "{}", self.field(b'M').lossy())?;
        let code = self.field(b'C');
        if !code.is_empty() {
            write!(f, " ({})", code.lossy())?;
        }
        if let Some(detail) = self.detail() {
            write!(f, "\nDETAIL: {detail}")?;
        }
        if let Some(hint) = self.hint() {
            write!(f, "\nHINT: {hint}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// A warning message. The frontend should display the message.
///
/// Shares the field layout of [`ErrorResponse`].
pub struct NoticeResponse {
    pub body: Bytes,
}

impl NoticeResponse {
    pub const MSGTYPE: u8 = b'N';
}

impl BackendProtocol for NoticeResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { body })
    }
}

impl fmt::Display for NoticeResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&ErrorResponse { body: self.body.clone() }, f)
    }
}

/// Iterator over identified fields of [`ErrorResponse`] and [`NoticeResponse`].
pub struct Fields {
    body: Bytes,
}

impl Iterator for Fields {
    type Item = (u8, Bytes);

    fn next(&mut self) -> Option<Self::Item> {
        if !self.body.has_remaining() {
            return None;
        }
        let code = self.body.get_u8();
        if code == 0 {
            return None;
        }
        let value = self.body.get_nul_bytes()?;
        Some((code, value))
    }
}

#[cfg(test)]
mod test {
    use bytes::{BufMut, Bytes, BytesMut};

    use super::*;

    fn error_body(fields: &[(u8, &str)]) -> Bytes {
        let mut buf = BytesMut::new();
        for (code, value) in fields {
            buf.put_u8(*code);
            buf.put_slice(value.as_bytes());
            buf.put_u8(0);
        }
        buf.put_u8(0);
        buf.freeze()
    }

    #[test]
    fn error_fields() {
        let err = ErrorResponse {
            body: error_body(&[(b'S', "ERROR"), (b'C', "42P01"), (b'M', "relation \"harbors\" does not exist")]),
        };
        assert_eq!(err.severity(), "ERROR");
        assert_eq!(err.code(), "42P01");
        assert_eq!(err.message(), "relation \"harbors\" does not exist");
        assert!(err.detail().is_none());
        assert_eq!(err.to_string(), "ERROR: relation \"harbors\" does not exist (42P01)");
    }

    #[test]
    fn command_complete_rows() {
        let rows = |tag: &'static [u8]| CommandComplete { tag: Bytes::from_static(tag) }.rows();
        assert_eq!(rows(b"SELECT 7"), 7);
        assert_eq!(rows(b"INSERT 0 3"), 3);
        assert_eq!(rows(b"COPY 10000"), 10000);
        assert_eq!(rows(b"BEGIN"), 0);
    }

    #[test]
    fn decode_checks_msgtype() {
        assert!(ReadyForQuery::decode(b'Z', Bytes::from_static(b"I")).is_ok());
        assert!(matches!(
            ReadyForQuery::decode(b'C', Bytes::from_static(b"I")),
            Err(ProtocolError::Unexpected { expect: Some(b'Z'), found: b'C', .. }),
        ));
        assert!(matches!(
            BackendKeyData::decode(b'K', Bytes::from_static(b"\0\0")),
            Err(ProtocolError::Malformed { msgtype: b'K' }),
        ));
    }
}

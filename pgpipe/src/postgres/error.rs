//! Protocol error
use std::fmt;

use super::backend;

/// A violation of the wire protocol by the backend.
///
/// Every variant except [`OverCompletion`][ProtocolError::OverCompletion] and
/// [`CopyNotStarted`][ProtocolError::CopyNotStarted] leaves the stream at an
/// unknown position, the connection must not be used afterwards.
pub enum ProtocolError {
    Unexpected {
        expect: Option<u8>,
        found: u8,
        phase: Option<&'static str>,
    },
    /// Message length field smaller than itself or larger than [`MAX_MESSAGE_LEN`][1].
    ///
    /// [1]: super::MAX_MESSAGE_LEN
    InvalidLength {
        msgtype: u8,
        len: i32,
    },
    /// Message body too short for its type.
    Malformed {
        msgtype: u8,
    },
    /// Stream closed while a message was expected.
    UnexpectedEof,
    /// Backend was ready again without answering a COPY statement with `CopyInResponse`.
    ///
    /// The stream is still in sync.
    CopyNotStarted,
    /// More `CommandComplete` than queries in the batch.
    ///
    /// The batch was drained up to its `ReadyForQuery` before this is reported.
    OverCompletion {
        expected: usize,
        completed: usize,
    },
}

impl ProtocolError {
    pub(crate) fn unexpected(expect: u8, found: u8) -> ProtocolError {
        Self::Unexpected { expect: Some(expect), found, phase: None }
    }

    pub(crate) fn unexpected_phase(found: u8, phase: &'static str) -> ProtocolError {
        Self::Unexpected { expect: None, found, phase: Some(phase) }
    }

    pub(crate) fn malformed(msgtype: u8) -> ProtocolError {
        Self::Malformed { msgtype }
    }

    /// Returns `true` if the stream position is lost.
    pub fn is_framing(&self) -> bool {
        !matches!(self, Self::OverCompletion { .. } | Self::CopyNotStarted)
    }
}

impl std::error::Error for ProtocolError { }

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Unexpected { expect, found, phase } => {
                let found = backend::message_name(found);
                match expect {
                    Some(m) => write!(f, "expected message `{}` found `{found}`", backend::message_name(m))?,
                    None => write!(f, "unexpected message `{found}`")?,
                }
                if let Some(phase) = phase {
                    write!(f, " in `{phase}`")?
                }
                Ok(())
            },
            Self::InvalidLength { msgtype, len } => {
                write!(f, "invalid length {len} for message `{}`", backend::message_name(msgtype))
            },
            Self::Malformed { msgtype } => {
                write!(f, "malformed `{}` message body", backend::message_name(msgtype))
            },
            Self::UnexpectedEof => f.write_str("connection closed by the backend while reading a message"),
            Self::CopyNotStarted => f.write_str("backend is ready without starting COPY"),
            Self::OverCompletion { expected, completed } => {
                write!(f, "received {completed} command completion for a batch of {expected}")
            },
        }
    }
}

impl fmt::Debug for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

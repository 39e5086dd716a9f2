//! `pgpipe` error types.
use std::{backtrace::Backtrace, fmt, io};

use crate::{
    connection::ParseError,
    encode::EncodeError,
    postgres::{ErrorResponse, ProtocolError},
    protocol::UnsupportedAuth,
};

/// A specialized [`Result`] type for `pgpipe` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from `pgpipe` library.
pub struct Error {
    context: String,
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Attach a context message shown before the error.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Returns `true` if the connection that produced this error can no longer be used.
    ///
    /// A server reported error is not fatal, the failed phase was drained up to its
    /// `ReadyForQuery` before it is returned.
    pub fn is_fatal(&self) -> bool {
        match &self.kind {
            ErrorKind::Protocol(e) => e.is_framing(),
            ErrorKind::Io(_) | ErrorKind::Timeout | ErrorKind::Broken => true,
            ErrorKind::UnsupportedAuth(_) => true,
            ErrorKind::Config(_) | ErrorKind::Database(_) | ErrorKind::Encode(_) => false,
        }
    }
}

/// All possible error kind from `pgpipe` library.
pub enum ErrorKind {
    Config(ParseError),
    Protocol(ProtocolError),
    Io(io::Error),
    Database(ErrorResponse),
    UnsupportedAuth(UnsupportedAuth),
    Encode(EncodeError),
    /// Backend did not reach `ReadyForQuery` in time.
    Timeout,
    /// Connection was left at an unknown stream position by a previous error.
    Broken,
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = std::backtrace::Backtrace::capture();
                Self { context: String::new(), backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<ParseError>e => ErrorKind::Config(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<std::io::Error>e => ErrorKind::Io(e));
from!(<ErrorResponse>e => ErrorKind::Database(e));
from!(<UnsupportedAuth>e => ErrorKind::UnsupportedAuth(e));
from!(<EncodeError>e => ErrorKind::Encode(e));
from!(<tokio::time::error::Elapsed>_ => ErrorKind::Timeout);

impl std::error::Error for Error { }

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
            Self::Database(e) => e.fmt(f),
            Self::UnsupportedAuth(e) => e.fmt(f),
            Self::Encode(e) => e.fmt(f),
            Self::Timeout => f.write_str("timed out waiting for ReadyForQuery"),
            Self::Broken => f.write_str("connection is broken by a previous error"),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

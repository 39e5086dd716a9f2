//! Values accepted by the encoders.
use std::{borrow::Cow, fmt};

/// A single bulk load field value.
///
/// Anything outside these variants has no text rendering in the COPY format and
/// must be converted by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Field<'a> {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(Cow<'a, str>),
}

macro_rules! from {
    ($($ty:ty => $variant:ident),* $(,)?) => {$(
        impl From<$ty> for Field<'_> {
            fn from(value: $ty) -> Self {
                Field::$variant(value.into())
            }
        }
    )*};
}

from! {
    bool => Bool,
    i16 => Int,
    i32 => Int,
    i64 => Int,
    u16 => Int,
    u32 => Int,
    f32 => Float,
    f64 => Float,
}

impl<'a> From<&'a str> for Field<'a> {
    fn from(value: &'a str) -> Self {
        Field::Text(Cow::Borrowed(value))
    }
}

impl From<String> for Field<'_> {
    fn from(value: String) -> Self {
        Field::Text(Cow::Owned(value))
    }
}

impl<'a, T: Into<Field<'a>>> From<Option<T>> for Field<'a> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Field::Null, Into::into)
    }
}

/// Caller input that cannot be encoded.
///
/// Returned before anything is appended to the output.
pub enum EncodeError {
    /// Postgres text can not contain a nul byte.
    NulByte {
        what: &'static str,
    },
    /// Query target name is empty.
    EmptyTarget,
}

impl std::error::Error for EncodeError { }

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NulByte { what } => write!(f, "{what} contains a nul byte"),
            Self::EmptyTarget => f.write_str("query target is empty"),
        }
    }
}

impl fmt::Debug for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// Reject strings postgres can not carry.
pub(crate) fn check_nul(value: &str, what: &'static str) -> Result<(), EncodeError> {
    match value.as_bytes().contains(&0) {
        true => Err(EncodeError::NulByte { what }),
        false => Ok(()),
    }
}

#[cfg(test)]
mod test {
    use super::Field;

    #[test]
    fn conversions() {
        assert_eq!(Field::from(None::<i32>), Field::Null);
        assert_eq!(Field::from(Some(7i32)), Field::Int(7));
        assert_eq!(Field::from(true), Field::Bool(true));
        assert_eq!(Field::from(3.5f64), Field::Float(3.5));
        assert_eq!(Field::from("a"), Field::Text("a".into()));
        assert_eq!(Field::from(String::from("b")), Field::Text("b".into()));
    }
}

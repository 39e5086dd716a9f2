//! COPY text format encoder.
//!
//! Fields are separated by a tab and every row ends with a newline:
//!
//! ```text
//! 1\tharbor\tt\n
//! 2\t\N\tf\n
//! ```
//!
//! The buffer carries rows only, [`copy_in`][crate::protocol::copy_in] wraps it in
//! the COPY sub-protocol messages.
//!
//! <https://www.postgresql.org/docs/current/sql-copy.html#id-1.9.3.55.9.2>
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt::Write;

use crate::encode::{EncodeError, Field, check_nul};

/// Encoded COPY rows.
///
/// Cheaply cloneable, the same buffer can be sent by any number of connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyBuffer {
    bytes: Bytes,
}

impl CopyBuffer {
    pub fn as_bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Append one row to `buf`.
///
/// On error `buf` is left as it was before the call.
pub fn write_row(fields: &[Field], buf: &mut BytesMut) -> Result<(), EncodeError> {
    let offset = buf.len();
    match write_fields(fields, buf) {
        Ok(()) => Ok(()),
        Err(err) => {
            buf.truncate(offset);
            Err(err)
        }
    }
}

fn write_fields(fields: &[Field], buf: &mut BytesMut) -> Result<(), EncodeError> {
    for (i, field) in fields.iter().enumerate() {
        if i != 0 {
            buf.put_u8(b'\t');
        }
        write_field(field, buf)?;
    }
    buf.put_u8(b'\n');
    Ok(())
}

fn write_field(field: &Field, buf: &mut BytesMut) -> Result<(), EncodeError> {
    match field {
        Field::Null => buf.put_slice(b"\\N"),
        Field::Bool(true) => buf.put_u8(b't'),
        Field::Bool(false) => buf.put_u8(b'f'),
        Field::Int(int) => buf.put_slice(itoa::Buffer::new().format(*int).as_bytes()),
        Field::Float(float) if float.is_nan() => buf.put_slice(b"NaN"),
        Field::Float(float) if float.is_infinite() => match float.is_sign_positive() {
            true => buf.put_slice(b"Infinity"),
            false => buf.put_slice(b"-Infinity"),
        },
        // writing into `BytesMut` is infallible
        Field::Float(float) => { let _ = write!(buf, "{float}"); },
        Field::Text(text) => {
            check_nul(text, "COPY text field")?;
            escape(text.as_bytes(), buf);
        },
    }
    Ok(())
}

/// Backslash escape the COPY delimiters.
///
/// Each input byte is looked at once, so an inserted backslash is never escaped again.
fn escape(text: &[u8], buf: &mut BytesMut) {
    if !text.iter().any(|b| matches!(b, b'\\' | b'\t' | b'\n' | b'\r')) {
        buf.put_slice(text);
        return;
    }

    buf.reserve(text.len() + 8);
    for &b in text {
        match b {
            b'\\' => buf.put_slice(b"\\\\"),
            b'\t' => buf.put_slice(b"\\t"),
            b'\n' => buf.put_slice(b"\\n"),
            b'\r' => buf.put_slice(b"\\r"),
            b => buf.put_u8(b),
        }
    }
}

/// Encode a single row.
pub fn encode_row(fields: &[Field]) -> Result<Bytes, EncodeError> {
    let mut buf = BytesMut::new();
    write_row(fields, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode every row in order into one buffer.
///
/// Nothing is returned if any row is rejected.
pub fn encode_rows<'a, I, R>(rows: I) -> Result<CopyBuffer, EncodeError>
where
    I: IntoIterator<Item = R>,
    R: AsRef<[Field<'a>]>,
{
    let mut buf = BytesMut::new();
    for row in rows {
        write_row(row.as_ref(), &mut buf)?;
    }
    Ok(CopyBuffer { bytes: buf.freeze() })
}

#[cfg(test)]
mod test {
    use bytes::BytesMut;

    use super::*;

    /// Inverse of the COPY text rendering, only for round trip assertion.
    fn decode_row(line: &[u8]) -> Vec<Option<String>> {
        let line = line.strip_suffix(b"\n").expect("row terminator");
        line.split(|b| *b == b'\t')
            .map(|raw| {
                if raw == b"\\N" {
                    return None;
                }
                let mut out = Vec::with_capacity(raw.len());
                let mut iter = raw.iter();
                while let Some(&b) = iter.next() {
                    if b != b'\\' {
                        out.push(b);
                        continue;
                    }
                    match iter.next() {
                        Some(b't') => out.push(b'\t'),
                        Some(b'n') => out.push(b'\n'),
                        Some(b'r') => out.push(b'\r'),
                        Some(b'\\') => out.push(b'\\'),
                        other => panic!("unexpected escape {other:?}"),
                    }
                }
                Some(String::from_utf8(out).unwrap())
            })
            .collect()
    }

    #[test]
    fn mixed_row() {
        let row = [Field::Null, Field::Bool(true), Field::Int(42), Field::Float(3.5), Field::from("a\tb")];
        assert_eq!(&encode_row(&row).unwrap()[..], b"\\N\tt\t42\t3.5\ta\\tb\n");
    }

    #[test]
    fn numbers() {
        let row = [
            Field::Int(-7),
            Field::Int(i64::MAX),
            Field::Float(10.333),
            Field::Float(f64::NAN),
            Field::Float(f64::NEG_INFINITY),
            Field::Bool(false),
        ];
        assert_eq!(
            &encode_row(&row).unwrap()[..],
            b"-7\t9223372036854775807\t10.333\tNaN\t-Infinity\tf\n",
        );
    }

    #[test]
    fn escapes_round_trip() {
        let texts = [
            "plain",
            "back\\slash",
            "tab\there",
            "multi\nline\r\n",
            "\\t is not a tab",
            "\\\\\t\\n",
            "",
        ];
        for text in texts {
            let row = [Field::from(text), Field::Null, Field::from(text)];
            let encoded = encode_row(&row).unwrap();
            assert_eq!(encoded.iter().filter(|b| **b == b'\n').count(), 1);
            assert_eq!(
                decode_row(&encoded),
                vec![Some(text.to_owned()), None, Some(text.to_owned())],
                "{text:?}",
            );
        }
    }

    #[test]
    fn rows_concatenate() {
        let rows = [
            vec![Field::Int(10), Field::from("TESTTESTTEST"), Field::Float(10.333)],
            vec![Field::Int(11), Field::Null, Field::Float(1.0)],
        ];
        let buf = encode_rows(&rows).unwrap();
        assert_eq!(buf.as_bytes(), &b"10\tTESTTESTTEST\t10.333\n11\t\\N\t1\n"[..]);

        let empty = encode_rows(Vec::<Vec<Field>>::new()).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn rejected_row_leaves_buffer_untouched() {
        let mut buf = BytesMut::new();
        write_row(&[Field::Int(1)], &mut buf).unwrap();

        let err = write_row(&[Field::Int(2), Field::from("nul\0byte")], &mut buf).unwrap_err();
        assert!(matches!(err, EncodeError::NulByte { .. }));
        assert_eq!(&buf[..], b"1\n");

        assert!(encode_rows([[Field::from("ok")], [Field::from("\0")]]).is_err());
    }

    #[test]
    fn reuse_is_identical() {
        let row = [Field::from("x"), Field::Int(1)];
        let a = encode_rows([&row[..]; 3]).unwrap();
        let b = encode_rows([&row[..]; 3]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.clone().into_bytes(), b.into_bytes());
    }
}

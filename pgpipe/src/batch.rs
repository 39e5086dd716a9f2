//! Pipelined batch encoder.
//!
//! A batch is one flat buffer of `Parse`, `Bind` and `Execute` for every query,
//! closed by a single `Sync`. The backend answers each query with its own
//! `CommandComplete` and the whole batch with one `ReadyForQuery`.
//!
//! <https://www.postgresql.org/docs/current/protocol-flow.html#PROTOCOL-FLOW-PIPELINING>
use bytes::{Bytes, BytesMut};

use crate::{
    common::{span, verbose},
    encode::{EncodeError, check_nul},
    postgres::frontend::{self, Bind, Execute, Parse, Sync},
};

/// A single `SELECT` to run in a batch.
///
/// Queries are identified by their position in the batch only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDescriptor {
    pub target: String,
    pub columns: Vec<String>,
    pub limit: u64,
}

impl QueryDescriptor {
    pub fn new(target: impl Into<String>, limit: u64) -> Self {
        Self { target: target.into(), columns: vec![], limit }
    }

    /// Add a projected column, without any column every column is selected.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.columns.push(column.into());
        self
    }

    /// The statement text, the limit is bound as `$1`.
    ///
    /// ```
    /// # use pgpipe::QueryDescriptor;
    /// let query = QueryDescriptor::new("harbors", 10).column("id").column("name");
    /// assert_eq!(query.sql(), "SELECT id, name FROM harbors LIMIT $1");
    /// ```
    pub fn sql(&self) -> String {
        let mut sql = String::with_capacity(32 + self.target.len());
        sql.push_str("SELECT ");
        match self.columns.is_empty() {
            true => sql.push('*'),
            false => sql.push_str(&self.columns.join(", ")),
        }
        sql.push_str(" FROM ");
        sql.push_str(&self.target);
        sql.push_str(" LIMIT $1");
        sql
    }

    fn validate(&self) -> Result<(), EncodeError> {
        if self.target.is_empty() {
            return Err(EncodeError::EmptyTarget);
        }
        check_nul(&self.target, "query target")?;
        for column in &self.columns {
            check_nul(column, "column name")?;
        }
        Ok(())
    }

    /// Append `Parse`, `Bind` and `Execute` without validation.
    fn write(&self, buf: &mut BytesMut) {
        let sql = self.sql();
        let mut itoa = itoa::Buffer::new();
        let limit = itoa.format(self.limit).as_bytes();

        frontend::write(Parse { prepare_name: "", sql: &sql, oids: &[] }, buf);
        frontend::write(Bind { portal_name: "", stmt_name: "", params: &[Some(limit)] }, buf);
        // a non zero row limit would suspend the portal instead of completing it
        frontend::write(Execute { portal_name: "", max_row: 0 }, buf);
    }
}

/// An encoded batch, ready to be written as is.
///
/// Cloning is cheap, the same batch can be sent repeatedly and by multiple
/// connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBatch {
    bytes: Bytes,
    expected: usize,
}

impl EncodedBatch {
    pub fn as_bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Number of `CommandComplete` a successful batch produces.
    pub fn expected(&self) -> usize {
        self.expected
    }
}

/// Encode every descriptor in order, followed by exactly one `Sync`.
///
/// Every descriptor is validated before any bytes are produced. Identical input
/// produces identical output.
pub fn encode_batch(descriptors: &[QueryDescriptor]) -> Result<EncodedBatch, EncodeError> {
    span!("encode_batch", len = descriptors.len());

    for descriptor in descriptors {
        descriptor.validate()?;
    }

    let mut buf = BytesMut::new();
    for descriptor in descriptors {
        descriptor.write(&mut buf);
    }
    frontend::write(Sync, &mut buf);

    verbose!(len = buf.len(), "encoded");

    Ok(EncodedBatch { bytes: buf.freeze(), expected: descriptors.len() })
}

/// Encode the same descriptor `count` times, followed by exactly one `Sync`.
///
/// The descriptor is encoded once and its bytes repeated.
pub fn encode_uniform_batch(descriptor: &QueryDescriptor, count: usize) -> Result<EncodedBatch, EncodeError> {
    span!("encode_uniform_batch", count);

    descriptor.validate()?;

    let mut one = BytesMut::new();
    descriptor.write(&mut one);

    let mut buf = BytesMut::with_capacity(one.len() * count + 5);
    for _ in 0..count {
        buf.extend_from_slice(&one);
    }
    frontend::write(Sync, &mut buf);

    Ok(EncodedBatch { bytes: buf.freeze(), expected: count })
}

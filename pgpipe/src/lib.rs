//! Pipelined Postgres wire protocol engine.
//!
//! Queries are encoded once into a flat batch of `Parse`, `Bind` and `Execute`
//! closed by a single `Sync`, then sent as many times as needed. Responses are
//! counted up to the batch `ReadyForQuery`. Bulk rows are encoded into the COPY
//! text format and loaded with `COPY .. FROM STDIN`.
//!
//! # Examples
//!
//! Pipelined batch:
//!
//! ```no_run
//! use pgpipe::{Connection, QueryDescriptor};
//!
//! # async fn app() -> pgpipe::Result<()> {
//! let mut conn = Connection::connect_env().await?;
//!
//! let query = QueryDescriptor::new("harbors", 10).column("id").column("name");
//! let batch = pgpipe::encode_uniform_batch(&query, 64)?;
//!
//! for _ in 0..8 {
//!     let outcome = conn.pipeline(&batch).await?;
//!     assert_eq!(outcome.completed, 64);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Bulk load:
//!
//! ```no_run
//! use pgpipe::{Connection, Field};
//!
//! # async fn app() -> pgpipe::Result<()> {
//! let mut conn = Connection::connect_env().await?;
//!
//! let rows = pgpipe::encode_rows([
//!     [Field::Int(1), Field::from("Rotterdam"), Field::Bool(true)],
//!     [Field::Int(2), Field::from("Antwerp"), Field::Null],
//! ])?;
//!
//! let copied = conn.copy_in("harbors", &["id", "name", "active"], &rows).await?;
//! assert_eq!(copied, 2);
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod common;
mod ext;

// Protocol
pub mod postgres;

// Encoding
pub mod encode;
pub mod copy;
pub mod batch;

// Operation
pub mod transport;
pub mod stream;
pub mod protocol;
pub mod pipeline;

// Connection
pub mod connection;

mod error;


pub use encode::{Field, EncodeError};
pub use copy::{CopyBuffer, encode_row, encode_rows};
pub use batch::{QueryDescriptor, EncodedBatch, encode_batch, encode_uniform_batch};
pub use pipeline::{BatchOutcome, Terminal};
pub use connection::{Connection, Config};
pub use error::{Error, ErrorKind, Result};

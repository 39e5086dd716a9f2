//! Postgres Protocol Operations
//!
//! Startup and COPY phases, each runs until the backend `ReadyForQuery`.
use std::{borrow::Cow, fmt};

use crate::{
    Result,
    common::{debug, verbose},
    copy::CopyBuffer,
    encode::check_nul,
    postgres::{
        ErrorResponse, FramedMessage, ProtocolError,
        backend::{self, Authentication, BackendKeyData, CommandComplete, ParameterStatus, ReadyForQuery},
        frontend,
    },
    transport::{PgTransport, PgTransportExt},
};

/// Largest `CopyData` payload sent in one message.
pub const COPY_CHUNK_LEN: usize = 64 * 1024;

/// A config for postgres startup phase.
///
/// <https://www.postgresql.org/docs/current/protocol-flow.html#PROTOCOL-FLOW-START-UP>
#[derive(Debug, Clone)]
pub struct StartupConfig<'a> {
    user: Cow<'a,str>,
    database: Option<Cow<'a,str>>,
}

impl<'a> StartupConfig<'a> {
    /// Create new config, the database user name is required.
    pub fn new(user: impl Into<Cow<'a, str>>) -> Self {
        Self { user: user.into(), database: None }
    }

    /// The database to connect to. Defaults to the user name.
    pub fn database(mut self, database: impl Into<Cow<'a,str>>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// The database user name to connect as.
    pub fn get_user(&self) -> &str {
        &self.user
    }

    /// The database to connect to.
    pub fn get_database(&self) -> &str {
        self.database.as_deref().unwrap_or(&self.user)
    }
}

/// Startup phase successful response.
#[derive(Debug)]
pub struct StartupResponse {
    pub backend_key_data: Option<BackendKeyData>,
    pub param_status: Vec<ParameterStatus>,
}

/// Backend requested an authentication other than trust.
pub struct UnsupportedAuth {
    method: &'static str,
}

impl UnsupportedAuth {
    /// Name of the requested method.
    pub fn method(&self) -> &'static str {
        self.method
    }
}

impl std::error::Error for UnsupportedAuth { }

impl fmt::Display for UnsupportedAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported authentication `{}`, only trust is supported", self.method)
    }
}

impl fmt::Debug for UnsupportedAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// Perform a startup message.
///
/// An `ErrorResponse` aborts the startup with the server detail, any other
/// message than authentication and `ReadyForQuery` is consumed.
///
/// <https://www.postgresql.org/docs/17/protocol-flow.html#PROTOCOL-FLOW-START-UP>
pub async fn startup<'a, IO: PgTransport>(
    opt: impl Into<StartupConfig<'a>>,
    mut io: IO,
) -> Result<StartupResponse> {
    let opt: StartupConfig = opt.into();
    verbose!(user = opt.get_user(), "startup");
    check_nul(opt.get_user(), "user name")?;
    check_nul(opt.get_database(), "database name")?;

    io.send_startup(frontend::Startup {
        user: opt.get_user(),
        database: opt.get_database(),
    });
    io.flush().await?;

    let mut param_status = vec![];
    let mut backend_key_data = None;

    loop {
        let frame: FramedMessage = io.recv().await?;
        match frame.msgtype {
            ReadyForQuery::MSGTYPE => break,
            ErrorResponse::MSGTYPE => Err(frame.decode::<ErrorResponse>()?)?,
            Authentication::MSGTYPE => {
                let auth = frame.decode::<Authentication>()?;
                if !auth.is_ok() {
                    Err(UnsupportedAuth { method: auth.method() })?
                }
                verbose!("authenticated");
            },
            BackendKeyData::MSGTYPE => backend_key_data = Some(frame.decode()?),
            ParameterStatus::MSGTYPE => {
                let param = frame.decode::<ParameterStatus>()?;
                debug!("{:?}", param);
                param_status.push(param);
            },
            _msgtype => {
                verbose!(msgtype = backend::message_name(_msgtype), "ignored in startup");
            },
        }
    }

    Ok(StartupResponse { param_status, backend_key_data })
}

/// Drain messages until `ReadyForQuery`.
async fn ready<IO: PgTransport>(io: &mut IO) -> Result<()> {
    loop {
        let frame: FramedMessage = io.recv().await?;
        if frame.msgtype == ReadyForQuery::MSGTYPE {
            return Ok(());
        }
    }
}

/// Bulk load `rows` into `table` with `COPY .. FROM STDIN`.
///
/// Returns the number of rows copied, as reported by the backend.
///
/// `table` and `columns` are embedded as is into the statement. The buffer is sent
/// in chunks of at most [`COPY_CHUNK_LEN`] bytes. A backend error is drained up to
/// `ReadyForQuery` and returned as [`ErrorKind::Database`][crate::ErrorKind].
///
/// <https://www.postgresql.org/docs/current/protocol-flow.html#PROTOCOL-COPY>
pub async fn copy_in<IO: PgTransport>(
    table: &str,
    columns: &[&str],
    rows: &CopyBuffer,
    mut io: IO,
) -> Result<u64> {
    verbose!(table, len = rows.len(), "copy in");

    check_nul(table, "copy table")?;
    for column in columns {
        check_nul(column, "column name")?;
    }

    let sql = copy_statement(table, columns);
    io.send(frontend::Query { sql: &sql });
    io.flush().await?;

    loop {
        let frame: FramedMessage = io.recv().await?;
        match frame.msgtype {
            backend::CopyInResponse::MSGTYPE => {
                let _response = frame.decode::<backend::CopyInResponse>()?;
                verbose!(columns = _response.columns, "copy in ready");
                break;
            },
            ErrorResponse::MSGTYPE => {
                let err = frame.decode::<ErrorResponse>()?;
                ready(&mut io).await?;
                return Err(err.into());
            },
            // not a COPY statement, the stream is still in sync
            ReadyForQuery::MSGTYPE => return Err(ProtocolError::CopyNotStarted.into()),
            _ => { },
        }
    }

    for chunk in rows.as_bytes().chunks(COPY_CHUNK_LEN) {
        io.send(frontend::CopyData { data: chunk });
    }
    io.send(frontend::CopyDone);
    io.flush().await?;

    complete(&mut io, "copy").await
}

/// Run a simple query, returns the row count of its last `CommandComplete`.
///
/// Rows returned by the query are discarded. A backend error is drained up to
/// `ReadyForQuery` before it is returned.
///
/// <https://www.postgresql.org/docs/current/protocol-flow.html#PROTOCOL-FLOW-SIMPLE-QUERY>
pub async fn simple_query<IO: PgTransport>(sql: &str, mut io: IO) -> Result<u64> {
    verbose!(sql, "simple query");
    check_nul(sql, "query")?;

    io.send(frontend::Query { sql });
    io.flush().await?;

    complete(&mut io, "simple query").await
}

/// Read up to `ReadyForQuery`, keeping the last row count and the first error.
async fn complete<IO: PgTransport>(io: &mut IO, _phase: &'static str) -> Result<u64> {
    let mut rows = 0;
    let mut error = None;

    loop {
        let frame: FramedMessage = io.recv().await?;
        match frame.msgtype {
            CommandComplete::MSGTYPE => rows = frame.decode::<CommandComplete>()?.rows(),
            ErrorResponse::MSGTYPE => {
                error.get_or_insert(frame.decode::<ErrorResponse>()?);
            },
            ReadyForQuery::MSGTYPE => break,
            _msgtype => {
                verbose!(msgtype = backend::message_name(_msgtype), phase = _phase, "ignored");
            },
        }
    }

    match error {
        Some(err) => Err(err.into()),
        None => Ok(rows),
    }
}

/// `COPY table (columns) FROM STDIN`, the column list is omitted when empty.
fn copy_statement(table: &str, columns: &[&str]) -> String {
    let mut sql = String::with_capacity(32 + table.len());
    sql.push_str("COPY ");
    sql.push_str(table);
    if !columns.is_empty() {
        sql.push_str(" (");
        sql.push_str(&columns.join(", "));
        sql.push(')');
    }
    sql.push_str(" FROM STDIN");
    sql
}

/// Send a `Terminate` message.
pub async fn terminate<IO: PgTransport>(mut io: IO) -> Result<()> {
    io.send(frontend::Terminate);
    io.flush().await?;
    Ok(())
}

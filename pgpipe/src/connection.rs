//! Postgres connection.
use std::{future::poll_fn, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};

use crate::{
    Result,
    batch::EncodedBatch,
    common::verbose,
    copy::CopyBuffer,
    error::{Error, ErrorKind},
    pipeline::{BatchOutcome, pipeline},
    protocol::{self, StartupConfig, StartupResponse},
    stream::PgStream,
};

mod config;

pub use config::{Config, ParseError};

/// A single postgres connection.
///
/// Only one batch can be in flight at a time, every operation borrows the
/// connection mutably until the backend is ready again.
///
/// A fatal error, see [`Error::is_fatal`], leaves the stream at an unknown
/// position. Every later operation then returns [`ErrorKind::Broken`].
#[derive(Debug)]
pub struct Connection<IO = TcpStream> {
    stream: PgStream<IO>,
    startup: StartupResponse,
    drain_timeout: Option<Duration>,
    broken: bool,
}

impl Connection {
    /// Connect using url.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with(Config::parse(url)?).await
    }

    /// Connect using config from environment variable.
    ///
    /// See [`Config::from_env`] for more details.
    pub async fn connect_env() -> Result<Self> {
        Self::connect_with(Config::from_env()).await
    }

    /// Connect using given config.
    pub async fn connect_with(config: Config) -> Result<Self> {
        let socket = TcpStream::connect((config.host(), config.port())).await?;
        socket.set_nodelay(true)?;

        Self::handshake_with(socket, &config).await
    }
}

impl<IO> Connection<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    /// Perform the startup phase over an already connected `io`.
    pub async fn handshake<'a>(io: IO, opt: impl Into<StartupConfig<'a>>) -> Result<Self> {
        let mut stream = PgStream::new(io);
        let startup = protocol::startup(opt, &mut stream).await?;
        Ok(Self { stream, startup, drain_timeout: None, broken: false })
    }

    /// Perform the startup phase with the user, database and drain timeout of `config`.
    ///
    /// The drain timeout also bounds the startup phase itself.
    pub async fn handshake_with(io: IO, config: &Config) -> Result<Self> {
        let mut conn = with_timeout(config.drain_timeout(), Self::handshake(io, config)).await?;
        conn.drain_timeout = config.drain_timeout();
        Ok(conn)
    }

    /// Backend key data and parameter status received at startup.
    pub fn startup_response(&self) -> &StartupResponse {
        &self.startup
    }

    /// Maximum time to wait for the backend to be ready after a batch or a COPY.
    pub fn set_drain_timeout(&mut self, timeout: Option<Duration>) {
        self.drain_timeout = timeout;
    }

    /// Returns `true` if a previous error left the connection unusable.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Send an encoded batch and wait for its outcome.
    ///
    /// A backend error is returned as [`Terminal::Failed`][crate::pipeline::Terminal]
    /// and the connection stays usable.
    pub async fn pipeline(&mut self, batch: &EncodedBatch) -> Result<BatchOutcome> {
        self.ensure_usable()?;
        let result = with_timeout(self.drain_timeout, pipeline(batch, &mut self.stream)).await;
        self.track(result)
    }

    /// Bulk load pre-encoded rows, returns the number of rows copied.
    pub async fn copy_in(&mut self, table: &str, columns: &[&str], rows: &CopyBuffer) -> Result<u64> {
        self.ensure_usable()?;
        let result = with_timeout(
            self.drain_timeout,
            protocol::copy_in(table, columns, rows, &mut self.stream),
        )
        .await;
        self.track(result)
    }

    /// Run a simple query, rows are discarded.
    ///
    /// Returns the row count of the last completed statement.
    pub async fn simple_query(&mut self, sql: &str) -> Result<u64> {
        self.ensure_usable()?;
        let result = with_timeout(self.drain_timeout, protocol::simple_query(sql, &mut self.stream)).await;
        self.track(result)
    }

    /// Send `Terminate` and shutdown the underlying io.
    pub async fn close(mut self) -> Result<()> {
        verbose!(broken = self.broken, "close");
        protocol::terminate(&mut self.stream).await?;
        poll_fn(|cx| self.stream.poll_shutdown(cx)).await?;
        Ok(())
    }

    fn ensure_usable(&self) -> Result<()> {
        match self.broken {
            true => Err(ErrorKind::Broken.into()),
            false => Ok(()),
        }
    }

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_fatal() {
                verbose!("connection broken: {err}");
                self.broken = true;
            }
        }
        result
    }
}

async fn with_timeout<T>(duration: Option<Duration>, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match duration {
        Some(duration) => tokio::time::timeout(duration, fut).await.map_err(Error::from)?,
        None => fut.await,
    }
}

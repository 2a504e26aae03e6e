//! Connection supervisor: connect-with-retry and reconnect-then-redo
//!
//! A [`ServerlessConnection`] owns exactly one client. Establishing it
//! retries when the server refuses new connections; an operation whose
//! session the server terminates is replayed on a fresh client.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use slspg_core::{
    Connector, ErrorClass, PgClient, QueryResult, Result, SlsError, StatementResult, Value,
};
use tokio_util::sync::CancellationToken;

use crate::{
    BackoffConfig, ConfigOverride, ConnectionCredential, DecorrelatedJitter, DiagnosticEvent,
    Diagnostics, ResolvedConfig,
};

/// Lifecycle of a supervised connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Replacing a client the server dropped mid-operation
    Retrying,
    Closed,
}

/// A single PostgreSQL connection that survives capacity exhaustion and
/// administrative termination.
///
/// Every operation takes `&mut self`: the supervisor is the sole owner of
/// its client, and handle replacement can never race with an in-flight
/// operation. Share it across tasks only behind external synchronization.
///
/// # Example
///
/// ```ignore
/// use slspg_connection::{ConfigOverride, ServerlessConnection};
/// use slspg_driver_postgres::PostgresConnector;
///
/// let mut conn = ServerlessConnection::new(
///     PostgresConnector::new(),
///     ConfigOverride::default().max_retries(5),
/// );
/// conn.connect("postgres://app:secret@db:5432/app").await?;
///
/// let rows = conn.query("SELECT id FROM jobs WHERE owner = $1", &["alice".into()]).await?;
/// let killed = conn.clean().await?;
/// conn.close().await?;
/// ```
pub struct ServerlessConnection {
    pub(crate) connector: Arc<dyn Connector>,
    overrides: ConfigOverride,
    pub(crate) config: ResolvedConfig,
    pub(crate) credential: ConnectionCredential,
    pub(crate) diagnostics: Diagnostics,
    backoff: DecorrelatedJitter,
    seed: Option<u64>,
    cancellation: Option<CancellationToken>,
    client: Option<Arc<dyn PgClient>>,
    state: ConnectionState,
    pub(crate) max_connections_cache: Option<crate::reaper::CachedMaxConnections>,
}

impl ServerlessConnection {
    /// Create an unconnected supervisor.
    ///
    /// `overrides` are validated by [`connect`](Self::connect), not here.
    pub fn new<C: Connector>(connector: C, overrides: ConfigOverride) -> Self {
        Self {
            connector: Arc::new(connector),
            overrides,
            config: ResolvedConfig::default(),
            credential: ConnectionCredential::default(),
            diagnostics: Diagnostics::default(),
            backoff: DecorrelatedJitter::new(BackoffConfig::default()),
            seed: None,
            cancellation: None,
            client: None,
            state: ConnectionState::Disconnected,
            max_connections_cache: None,
        }
    }

    /// Seed the backoff generator, for reproducible delay sequences
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Abort backoff waits with [`SlsError::Cancelled`] once `token` fires.
    ///
    /// Use the function's own deadline so a retry loop never outlives the
    /// invocation.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn credential(&self) -> &ConnectionCredential {
        &self.credential
    }

    /// The current client, for operations the supervisor does not wrap.
    ///
    /// Calls made on it directly are not retried.
    pub fn client(&self) -> Result<Arc<dyn PgClient>> {
        self.client.clone().ok_or(SlsError::NotConnected)
    }

    /// Resolve configuration, parse the connection string and establish the
    /// client, retrying while the server reports it has too many clients.
    #[tracing::instrument(skip_all, fields(attempts))]
    pub async fn connect(&mut self, connection_string: &str) -> Result<()> {
        self.config = ResolvedConfig::resolve(&self.overrides)?;
        self.credential = ConnectionCredential::parse(connection_string)?;
        self.diagnostics = Diagnostics::new(self.config.debug);
        let backoff_config = BackoffConfig::from(&self.config);
        self.backoff = match self.seed {
            Some(seed) => DecorrelatedJitter::with_seed(backoff_config, seed),
            None => DecorrelatedJitter::new(backoff_config),
        };
        self.max_connections_cache = None;

        if let Some(previous) = self.client.take() {
            release(previous).await;
        }

        let attempts = self.config.attempts();
        tracing::Span::current().record("attempts", attempts);
        self.state = ConnectionState::Connecting;

        let mut attempt = 1;
        loop {
            tracing::debug!(attempt, "connecting");
            match self.connector.connect(connection_string).await {
                Ok(client) => {
                    self.client = Some(client);
                    self.state = ConnectionState::Connected;
                    self.diagnostics.info(DiagnosticEvent::Connected);
                    return Ok(());
                }
                Err(err) if err.class() == ErrorClass::Connection && attempt < attempts => {
                    let delay = self.backoff.next_delay();
                    self.diagnostics
                        .info(DiagnosticEvent::ConnectRetry { attempt, delay });
                    if let Err(cancelled) = self.wait(delay).await {
                        self.state = ConnectionState::Disconnected;
                        return Err(cancelled);
                    }
                    attempt += 1;
                }
                Err(err) => {
                    tracing::debug!(attempt, error = %err, "connect failed");
                    self.state = ConnectionState::Disconnected;
                    self.diagnostics.failure(&err);
                    return Err(err);
                }
            }
        }
    }

    /// Run a row-returning statement, replaying it on a fresh client if the
    /// server terminates the session.
    pub async fn query(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.retry(move |client| async move { client.query(sql, params).await })
            .await
    }

    /// Run a statement for its side effects, with the same recovery as
    /// [`query`](Self::query).
    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.retry(move |client| async move { client.execute(sql, params).await })
            .await
    }

    /// Run `operation` against the current client with reconnect-then-redo.
    ///
    /// `operation` is invoked again, unchanged, after every successful
    /// reconnect; it must be safe to replay. Only errors in the query class
    /// are retried, and at most `max_retries` attempts are made in total,
    /// counting refused reconnects. The last error is returned once the
    /// attempts are spent.
    pub async fn retry<T, F, Fut>(&mut self, operation: F) -> Result<T>
    where
        F: Fn(Arc<dyn PgClient>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.config.attempts();
        let mut attempt = 1;

        loop {
            let client = self.client()?;
            let err = match operation(client).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if err.class() != ErrorClass::Query || attempt >= attempts {
                tracing::debug!(attempt, error = %err, "operation failed");
                self.diagnostics.failure(&err);
                return Err(err);
            }

            self.state = ConnectionState::Retrying;
            let recovered = self.recover(&mut attempt, attempts).await;
            self.state = ConnectionState::Connected;

            if let Err(err) = recovered {
                self.diagnostics.failure(&err);
                return Err(err);
            }
        }
    }

    /// Replace the dropped client. Refused reconnects spend attempts.
    async fn recover(&mut self, attempt: &mut u32, attempts: u32) -> Result<()> {
        loop {
            let delay = self.backoff.next_delay();
            self.wait(delay).await?;
            *attempt += 1;

            match self.connector.connect(self.credential.source_url()).await {
                Ok(client) => {
                    if let Some(previous) = self.client.replace(client) {
                        release(previous).await;
                    }
                    self.diagnostics.info(DiagnosticEvent::QueryRetry {
                        attempt: *attempt,
                        delay,
                    });
                    return Ok(());
                }
                Err(err) if err.class() == ErrorClass::Connection && *attempt < attempts => {
                    self.diagnostics.info(DiagnosticEvent::ReconnectFailed {
                        attempt: *attempt,
                        error: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Release the client. Later operations fail with
    /// [`SlsError::NotConnected`].
    pub async fn close(&mut self) -> Result<()> {
        self.state = ConnectionState::Closed;
        match self.client.take() {
            Some(client) => {
                client.close().await?;
                self.diagnostics.info(DiagnosticEvent::Closed);
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn wait(&self, delay: Duration) -> Result<()> {
        match &self.cancellation {
            Some(token) => tokio::select! {
                _ = token.cancelled() => Err(SlsError::Cancelled),
                _ = tokio::time::sleep(delay) => Ok(()),
            },
            None => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for ServerlessConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerlessConnection")
            .field("state", &self.state)
            .field("config", &self.config)
            .field("credential", &self.credential)
            .finish_non_exhaustive()
    }
}

async fn release(client: Arc<dyn PgClient>) {
    if let Err(e) = client.close().await {
        tracing::trace!(error = %e, "ignoring error while releasing replaced client");
    }
}

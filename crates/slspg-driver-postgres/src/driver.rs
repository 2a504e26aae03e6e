//! PostgreSQL connector

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use slspg_core::{Connector, PgClient, Result, SlsError};
use tokio_postgres::tls::{MakeTlsConnect, TlsConnect};
use tokio_postgres::{Client, Config, NoTls, Socket};

use crate::connection::{PostgresClient, format_postgres_error};
use crate::tls::{TlsOptions, make_tls_connector};

/// Opens tokio-postgres clients from connection strings.
///
/// Both URL (`postgres://user:pw@host/db?sslmode=require`) and key/value
/// (`host=... user=...`) strings are accepted. Each client's connection
/// future runs on its own spawned task, so a Tokio runtime must be active.
#[derive(Debug, Clone, Default)]
pub struct PostgresConnector {
    tls: TlsOptions,
}

impl PostgresConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tls(tls: TlsOptions) -> Self {
        Self { tls }
    }

    pub fn tls(&self) -> &TlsOptions {
        &self.tls
    }
}

/// Parse a connection string into a tokio-postgres config.
pub fn parse_config(connection_string: &str) -> Result<Config> {
    Config::from_str(connection_string)
        .map_err(|e| SlsError::Validation(format!("invalid connection string: {}", e)))
}

async fn establish<T>(config: &Config, tls: T) -> Result<Client>
where
    T: MakeTlsConnect<Socket> + Send,
    T::TlsConnect: Send,
    T::Stream: Send + 'static,
    <T::TlsConnect as TlsConnect<Socket>>::Future: Send,
{
    let (client, connection) = config.connect(tls).await.map_err(|e| {
        SlsError::Connection(format!(
            "Failed to connect to PostgreSQL: {}",
            format_postgres_error(&e)
        ))
    })?;

    tokio::spawn(async move {
        // Ends with an error when the server terminates the session
        if let Err(e) = connection.await {
            tracing::debug!(error = %format_postgres_error(&e), "PostgreSQL connection ended");
        }
    });

    Ok(client)
}

#[async_trait]
impl Connector for PostgresConnector {
    async fn connect(&self, url: &str) -> Result<Arc<dyn PgClient>> {
        let config = parse_config(url)?;
        let ssl_mode = config.get_ssl_mode();

        tracing::debug!(
            hosts = ?config.get_hosts(),
            database = ?config.get_dbname(),
            ?ssl_mode,
            "connecting to PostgreSQL"
        );

        let client = match make_tls_connector(ssl_mode, &self.tls)? {
            Some(tls) => establish(&config, tls).await?,
            None => establish(&config, NoTls).await?,
        };

        tracing::debug!("PostgreSQL connection established");
        Ok(Arc::new(PostgresClient::new(client)))
    }
}

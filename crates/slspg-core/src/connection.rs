//! Client contract implemented by database drivers

use crate::{QueryResult, Result, StatementResult, Value};
use async_trait::async_trait;
use std::sync::Arc;

/// An established PostgreSQL client
///
/// Implementations never interpret result payloads beyond converting them
/// into `Value`s; callers receive them unchanged.
#[async_trait]
pub trait PgClient: Send + Sync {
    /// Execute a query that returns rows
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Execute a statement and report the number of affected rows
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;

    /// Close the client. Closing an already closed client is not an error.
    async fn close(&self) -> Result<()>;

    /// Check whether the client has been closed, locally or by the server
    fn is_closed(&self) -> bool;
}

/// Factory for new clients
///
/// Used by the supervisor both for the initial connect and to replace a
/// client the server dropped.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new client for the given connection string
    async fn connect(&self, url: &str) -> Result<Arc<dyn PgClient>>;
}

#[async_trait]
impl<T: Connector> Connector for Arc<T> {
    async fn connect(&self, url: &str) -> Result<Arc<dyn PgClient>> {
        (**self).connect(url).await
    }
}

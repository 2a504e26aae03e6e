//! PostgreSQL driver for SLSPG, built on tokio-postgres

mod connection;
mod driver;
mod tls;

#[cfg(test)]
mod tests;

pub use connection::PostgresClient;
pub use driver::{PostgresConnector, parse_config};
pub use tls::{TlsOptions, make_tls_connector};

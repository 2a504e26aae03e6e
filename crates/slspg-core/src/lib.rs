//! SLSPG Core - Core abstractions shared by the SLSPG crates
//!
//! This crate defines the pieces every other SLSPG crate depends on:
//!
//! - `PgClient` - Trait for a single established PostgreSQL client
//! - `Connector` - Trait for opening new clients from a connection string
//! - `SlsError` / `ErrorClass` - Error taxonomy and retry classification
//! - Common types like `Value`, `Row`, `QueryResult`

mod connection;
mod error;
mod types;

#[cfg(test)]
mod tests;

pub use connection::*;
pub use error::*;
pub use types::*;

//! SLSPG Connection - Resilient single-connection supervision for serverless functions
//!
//! This crate wraps one PostgreSQL client with:
//!
//! - bounded, jittered retry while the server refuses new connections
//! - reconnect-then-redo when the server terminates a session mid-operation
//! - reaping of idle sessions once connection utilization crosses a threshold
//!
//! The client itself comes from a [`Connector`](slspg_core::Connector), such
//! as the one in `slspg-driver-postgres`.

mod backoff;
mod config;
mod credential;
mod diagnostics;
pub mod logging;
mod reaper;
mod supervisor;

#[cfg(test)]
mod tests;

pub use backoff::{BackoffConfig, DecorrelatedJitter};
pub use config::{ConfigOverride, ResolvedConfig};
pub use credential::ConnectionCredential;
pub use diagnostics::{DIAGNOSTICS_TARGET, DiagnosticEvent, Diagnostics};
pub use reaper::{
    IDLE_PROCESSES_SQL, IdleProcessRecord, KILL_PROCESSES_SQL, MAX_CONNECTIONS_SQL,
    PROCESS_COUNT_SQL,
};
pub use supervisor::{ConnectionState, ServerlessConnection};

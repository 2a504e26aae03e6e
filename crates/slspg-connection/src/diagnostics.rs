//! Debug-gated diagnostic events
//!
//! Diagnostics are observational only: emitting (or not emitting) an event
//! never changes control flow.

use std::fmt;
use std::time::Duration;

use slspg_core::SlsError;

/// Target used for all diagnostic events, so they can be filtered separately
/// from internal tracing.
pub const DIAGNOSTICS_TARGET: &str = "slspg::diagnostics";

/// An informational event worth reporting to the caller
#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticEvent {
    /// The supervisor holds an established client
    Connected,
    /// A connect attempt was refused with a retryable error
    ConnectRetry { attempt: u32, delay: Duration },
    /// The client was replaced after the server dropped it mid-operation
    QueryRetry { attempt: u32, delay: Duration },
    /// Replacing a dropped client failed with a retryable error
    ReconnectFailed { attempt: u32, error: String },
    /// Sessions currently open for the caller's user/database pair
    ProcessCount { count: i64 },
    /// Connection ceiling read from the server
    MaxConnections { value: u32 },
    /// Idle sessions terminated by a reap
    Killed { count: usize },
    /// The client was released
    Closed,
}

impl fmt::Display for DiagnosticEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticEvent::Connected => write!(f, "Connected"),
            DiagnosticEvent::ConnectRetry { attempt, delay } => write!(
                f,
                "Retry connection...Retry attempt: {} with delay: {}ms",
                attempt,
                delay.as_millis()
            ),
            DiagnosticEvent::QueryRetry { attempt, delay } => write!(
                f,
                "Retry query...Retry attempt: {} with delay: {}ms",
                attempt,
                delay.as_millis()
            ),
            DiagnosticEvent::ReconnectFailed { attempt, error } => {
                write!(f, "Reconnect failed on attempt {}: {}", attempt, error)
            }
            DiagnosticEvent::ProcessCount { count } => write!(f, "Total processes: {}", count),
            DiagnosticEvent::MaxConnections { value } => write!(f, "Max connections: {}", value),
            DiagnosticEvent::Killed { count } => write!(f, "Killed processes: {}", count),
            DiagnosticEvent::Closed => write!(f, "Closed"),
        }
    }
}

/// Emits diagnostic events through `tracing` when debug is enabled
#[derive(Debug, Clone, Copy, Default)]
pub struct Diagnostics {
    debug: bool,
}

impl Diagnostics {
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    pub fn is_enabled(&self) -> bool {
        self.debug
    }

    pub fn info(&self, event: DiagnosticEvent) {
        if !self.debug {
            return;
        }

        match &event {
            DiagnosticEvent::ConnectRetry { attempt, delay }
            | DiagnosticEvent::QueryRetry { attempt, delay } => {
                tracing::info!(
                    target: DIAGNOSTICS_TARGET,
                    attempt = *attempt,
                    delay_ms = delay.as_millis() as u64,
                    "{}",
                    event
                );
            }
            DiagnosticEvent::Killed { count } => {
                tracing::info!(target: DIAGNOSTICS_TARGET, killed = *count, "{}", event);
            }
            DiagnosticEvent::ProcessCount { count } => {
                tracing::info!(target: DIAGNOSTICS_TARGET, count = *count, "{}", event);
            }
            _ => tracing::info!(target: DIAGNOSTICS_TARGET, "{}", event),
        }
    }

    pub fn failure(&self, error: &SlsError) {
        if self.debug {
            tracing::error!(target: DIAGNOSTICS_TARGET, error = %error, "{}", error);
        }
    }
}

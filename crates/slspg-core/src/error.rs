//! Error types for SLSPG

use thiserror::Error;

/// Server text reported when the connection ceiling is exhausted (SQLSTATE 53300).
pub const TOO_MANY_CLIENTS: &str = "too many clients already";

/// Server text reported when a backend is killed with `pg_terminate_backend` (SQLSTATE 57P01).
pub const TERMINATING_CONNECTION: &str = "terminating connection due to administrator command";

/// Client text reported for requests issued on a connection the server already dropped.
pub const CONNECTION_CLOSED: &str = "connection closed";

/// Errors that are retried while establishing a connection.
pub const CONNECTION_ERRORS: &[&str] = &[TOO_MANY_CLIENTS];

/// Errors that trigger reconnect-then-redo for an in-flight operation.
pub const QUERY_ERRORS: &[&str] = &[TERMINATING_CONNECTION, CONNECTION_CLOSED];

/// Core error type for SLSPG operations
#[derive(Error, Debug)]
pub enum SlsError {
    /// A configuration override is out of range. The message names the field.
    #[error("{0}")]
    Validation(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Cancelled")]
    Cancelled,

    #[error("Unexpected result: {0}")]
    UnexpectedResult(String),

    #[error("{0}")]
    Other(String),
}

impl SlsError {
    /// Classify this error for retry purposes.
    pub fn class(&self) -> ErrorClass {
        ErrorClass::of(self)
    }
}

/// Result type alias for SLSPG operations
pub type Result<T> = std::result::Result<T, SlsError>;

/// Retry classification of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The server refused a new connection; retry the connect with backoff.
    Connection,
    /// The server dropped an established session; reconnect and redo.
    Query,
    /// Anything else. Never retried.
    Other,
}

impl ErrorClass {
    pub fn of(error: &SlsError) -> Self {
        let message = match error {
            SlsError::Connection(m) | SlsError::Query(m) | SlsError::Driver(m) => m,
            SlsError::Other(m) => m,
            _ => return ErrorClass::Other,
        };

        if contains_any(CONNECTION_ERRORS, message) {
            ErrorClass::Connection
        } else if contains_any(QUERY_ERRORS, message) {
            ErrorClass::Query
        } else {
            ErrorClass::Other
        }
    }

    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorClass::Other)
    }
}

fn contains_any(set: &[&str], message: &str) -> bool {
    set.iter().any(|pattern| message.contains(pattern))
}

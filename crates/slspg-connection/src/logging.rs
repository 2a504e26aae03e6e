//! Logging bootstrap for functions using SLSPG
//!
//! Serverless platforms collect whatever a function writes to stdout, so the
//! default output is one JSON object per line on stdout. Diagnostic events
//! are emitted under [`DIAGNOSTICS_TARGET`](crate::DIAGNOSTICS_TARGET) and
//! only when the connection is configured with `debug`.

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Output format of the installed subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Newline-delimited JSON, for log collectors
    Json,
    /// Human readable, for local runs
    Pretty,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,

    /// Whether to include file/line information in logs
    pub include_location: bool,

    /// Whether to log span open/close (retry loops run inside spans)
    pub enable_spans: bool,

    /// Filter used when `RUST_LOG` is not set
    pub default_filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            include_location: false,
            enable_spans: false,
            default_filter: "warn,slspg=info,slspg_connection=info,slspg_driver_postgres=info"
                .to_string(),
        }
    }
}

impl LoggingConfig {
    /// Pretty console output with verbose crate logging
    pub fn development() -> Self {
        Self {
            format: LogFormat::Pretty,
            include_location: true,
            enable_spans: true,
            default_filter: "info,slspg=debug,slspg_connection=debug,slspg_driver_postgres=debug"
                .to_string(),
        }
    }

    /// Build the environment filter; `RUST_LOG` takes precedence.
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_filter))
    }
}

/// Install a global subscriber.
///
/// Fails instead of panicking when a subscriber is already installed, which
/// happens on warm invocations that call this again.
pub fn init(config: LoggingConfig) -> anyhow::Result<()> {
    let span_events = if config.enable_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = match config.format {
        LogFormat::Json => fmt::layer()
            .with_target(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_span_events(span_events)
            .with_ansi(false)
            .json()
            .with_current_span(config.enable_spans)
            .with_writer(std::io::stdout)
            .with_filter(config.env_filter())
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_span_events(span_events)
            .pretty()
            .with_filter(config.env_filter())
            .boxed(),
    };

    tracing_subscriber::registry().with(layer).try_init()?;

    tracing::debug!(format = ?config.format, "logging initialized");
    Ok(())
}

/// Initialize logging with the JSON defaults
pub fn init_default() -> anyhow::Result<()> {
    init(LoggingConfig::default())
}

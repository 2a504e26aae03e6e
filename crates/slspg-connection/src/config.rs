//! Connection configuration: overrides, defaults and validation

use std::time::Duration;

use serde::{Deserialize, Serialize};
use slspg_core::{Result, SlsError};

/// Caller-supplied overrides for the documented defaults
///
/// Every field is optional; a present field means "override the default".
/// Integer fields are signed so that negative input can be reported instead
/// of silently wrapping.
///
/// # Example
///
/// ```
/// use slspg_connection::ConfigOverride;
///
/// let overrides = ConfigOverride::default()
///     .max_connections(150)
///     .max_retries(5)
///     .debug(true);
/// assert_eq!(overrides.max_connections, Some(150));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConfigOverride {
    pub max_connections_poll_interval_ms: Option<f64>,
    pub manual_max_connections: Option<bool>,
    pub max_connections: Option<i64>,
    pub min_idle_seconds: Option<f64>,
    pub max_idle_connections_to_kill: Option<i64>,
    pub connection_utilization_threshold: Option<f64>,
    pub debug: Option<bool>,
    pub backoff_cap_ms: Option<f64>,
    pub backoff_base_ms: Option<f64>,
    pub backoff_delay_ms: Option<f64>,
    pub max_retries: Option<i64>,
}

impl ConfigOverride {
    pub fn max_connections_poll_interval_ms(mut self, value: f64) -> Self {
        self.max_connections_poll_interval_ms = Some(value);
        self
    }

    pub fn manual_max_connections(mut self, value: bool) -> Self {
        self.manual_max_connections = Some(value);
        self
    }

    pub fn max_connections(mut self, value: i64) -> Self {
        self.max_connections = Some(value);
        self
    }

    pub fn min_idle_seconds(mut self, value: f64) -> Self {
        self.min_idle_seconds = Some(value);
        self
    }

    pub fn max_idle_connections_to_kill(mut self, value: i64) -> Self {
        self.max_idle_connections_to_kill = Some(value);
        self
    }

    pub fn connection_utilization_threshold(mut self, value: f64) -> Self {
        self.connection_utilization_threshold = Some(value);
        self
    }

    pub fn debug(mut self, value: bool) -> Self {
        self.debug = Some(value);
        self
    }

    pub fn backoff_cap_ms(mut self, value: f64) -> Self {
        self.backoff_cap_ms = Some(value);
        self
    }

    pub fn backoff_base_ms(mut self, value: f64) -> Self {
        self.backoff_base_ms = Some(value);
        self
    }

    pub fn backoff_delay_ms(mut self, value: f64) -> Self {
        self.backoff_delay_ms = Some(value);
        self
    }

    pub fn max_retries(mut self, value: i64) -> Self {
        self.max_retries = Some(value);
        self
    }
}

/// Fully resolved, validated configuration
///
/// Created once per supervisor by [`ResolvedConfig::resolve`] and immutable
/// afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConfig {
    /// How long a server-derived `max_connections` value stays cached
    pub max_connections_poll_interval_ms: f64,
    /// Use `max_connections` as given instead of asking the server
    pub manual_max_connections: bool,
    /// Connection ceiling used for the utilization check
    pub max_connections: u32,
    /// Minimum idle age for a process to be eligible for termination
    pub min_idle_seconds: f64,
    /// Cap on processes terminated per reap; `None` is unbounded
    pub max_idle_connections_to_kill: Option<u32>,
    /// Fraction of the ceiling above which reaping starts, in `[0, 1]`
    pub connection_utilization_threshold: f64,
    /// Emit diagnostic events
    pub debug: bool,
    pub backoff_cap_ms: f64,
    pub backoff_base_ms: f64,
    pub backoff_delay_ms: f64,
    /// Attempt ceiling for connect and for operation retry
    pub max_retries: u32,
}

impl Default for ResolvedConfig {
    /// Documented defaults
    ///
    /// - max_connections: 100 (server setting unless manual)
    /// - connection_utilization_threshold: 0.8
    /// - min_idle_seconds: 0.5
    /// - max_idle_connections_to_kill: unbounded
    /// - backoff cap / base / delay: 1000 / 2 / 1000 ms
    /// - max_retries: 3
    fn default() -> Self {
        Self {
            max_connections_poll_interval_ms: 60_000.0,
            manual_max_connections: false,
            max_connections: 100,
            min_idle_seconds: 0.5,
            max_idle_connections_to_kill: None,
            connection_utilization_threshold: 0.8,
            debug: false,
            backoff_cap_ms: 1000.0,
            backoff_base_ms: 2.0,
            backoff_delay_ms: 1000.0,
            max_retries: 3,
        }
    }
}

impl ResolvedConfig {
    /// Merge `overrides` onto the documented defaults.
    pub fn resolve(overrides: &ConfigOverride) -> Result<Self> {
        Self::resolve_onto(Self::default(), overrides)
    }

    /// Merge `overrides` onto `defaults`, validating every present field.
    ///
    /// Fields are checked in a fixed order and the first failure is
    /// returned; the partially merged value is dropped.
    pub fn resolve_onto(defaults: Self, overrides: &ConfigOverride) -> Result<Self> {
        let mut config = defaults;

        if let Some(debug) = overrides.debug {
            config.debug = debug;
        }
        if let Some(value) = overrides.max_connections {
            config.max_connections = non_negative_int("maxConnections", value)?;
        }
        if let Some(value) = overrides.max_retries {
            config.max_retries = non_negative_int("maxRetries", value)?;
        }
        if let Some(value) = overrides.connection_utilization_threshold {
            config.connection_utilization_threshold = utilization(value)?;
        }
        if let Some(value) = overrides.max_connections_poll_interval_ms {
            config.max_connections_poll_interval_ms =
                non_negative_float("maxConnectionsPollIntervalMs", value)?;
        }
        if let Some(value) = overrides.max_idle_connections_to_kill {
            config.max_idle_connections_to_kill =
                Some(non_negative_int("maxIdleConnectionsToKill", value)?);
        }
        if let Some(value) = overrides.min_idle_seconds {
            config.min_idle_seconds = non_negative_float("minIdleSeconds", value)?;
        }
        if let Some(value) = overrides.backoff_base_ms {
            config.backoff_base_ms = non_negative_float("backoffBaseMs", value)?;
        }
        if let Some(value) = overrides.backoff_cap_ms {
            config.backoff_cap_ms = non_negative_float("backoffCapMs", value)?;
        }
        if let Some(value) = overrides.backoff_delay_ms {
            config.backoff_delay_ms = non_negative_float("backoffDelayMs", value)?;
        }
        if let Some(manual) = overrides.manual_max_connections {
            config.manual_max_connections = manual;
        }

        tracing::debug!(?config, "resolved connection configuration");
        Ok(config)
    }

    /// Cache lifetime of the server-derived connection ceiling
    pub fn max_connections_poll_interval(&self) -> Duration {
        Duration::from_millis(self.max_connections_poll_interval_ms as u64)
    }

    /// Attempts made by connect and by operation retry; always at least one.
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

fn non_negative_int(name: &str, value: i64) -> Result<u32> {
    if value < 0 {
        return Err(SlsError::Validation(format!("{} should not be negative", name)));
    }
    u32::try_from(value)
        .map_err(|_| SlsError::Validation(format!("{} is out of range", name)))
}

fn non_negative_float(name: &str, value: f64) -> Result<f64> {
    if !value.is_finite() {
        return Err(SlsError::Validation(format!("{} should be a finite number", name)));
    }
    if value < 0.0 {
        return Err(SlsError::Validation(format!("{} should not be negative", name)));
    }
    Ok(value)
}

fn utilization(value: f64) -> Result<f64> {
    if value.is_nan() {
        return Err(SlsError::Validation(
            "connectionsUtilization should be a finite number".into(),
        ));
    }
    if value < 0.0 {
        return Err(SlsError::Validation(
            "connectionsUtilization should not be negative".into(),
        ));
    }
    if value > 1.0 {
        return Err(SlsError::Validation(
            "connectionsUtilization should not be bigger than 1".into(),
        ));
    }
    Ok(value)
}

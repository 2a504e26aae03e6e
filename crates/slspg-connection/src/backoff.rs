//! Decorrelated-jitter delay generator for connection and query retry
//!
//! Jittered delays keep the many short-lived invocations of a serverless
//! function from retrying against the database in lockstep.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::ResolvedConfig;

/// Backoff tunables, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    pub cap_ms: f64,
    pub base_ms: f64,
    pub delay_ms: f64,
}

impl BackoffConfig {
    pub fn new(cap_ms: f64, base_ms: f64, delay_ms: f64) -> Self {
        Self {
            cap_ms,
            base_ms,
            delay_ms,
        }
    }
}

impl Default for BackoffConfig {
    /// Default tunables: 1000ms cap, 2ms base, 1000ms delay
    fn default() -> Self {
        Self::new(1000.0, 2.0, 1000.0)
    }
}

impl From<&ResolvedConfig> for BackoffConfig {
    fn from(config: &ResolvedConfig) -> Self {
        Self::new(
            config.backoff_cap_ms,
            config.backoff_base_ms,
            config.backoff_delay_ms,
        )
    }
}

/// Decorrelated-jitter delay generator.
///
/// Each delay is computed as
///
/// ```text
/// p1        = base - 3 * delay - 1
/// p2        = uniform[0, 1) * p1
/// candidate = floor(p2) + 3 * delay
/// delay     = min(cap, candidate)
/// ```
///
/// With the default tunables `p1` is negative, so the candidate lands in
/// `[1, 3 * delay]` and is almost always clipped to `cap`. Raise `base`
/// relative to `delay` for a wider spread.
///
/// The random source belongs to the instance, so a seeded generator yields
/// a reproducible sequence.
///
/// # Example
///
/// ```
/// use slspg_connection::{BackoffConfig, DecorrelatedJitter};
/// use std::time::Duration;
///
/// let mut backoff = DecorrelatedJitter::with_seed(BackoffConfig::default(), 7);
/// assert!(backoff.next_delay() <= Duration::from_millis(1000));
/// ```
#[derive(Debug, Clone)]
pub struct DecorrelatedJitter {
    config: BackoffConfig,
    rng: StdRng,
}

impl DecorrelatedJitter {
    /// Create a generator seeded from OS entropy
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            rng: StdRng::from_entropy(),
        }
    }

    /// Create a generator with a fixed seed, for reproducible sequences
    pub fn with_seed(config: BackoffConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Compute the next delay from a fresh uniform draw
    pub fn next_delay(&mut self) -> Duration {
        let draw = self.rng.gen_range(0.0..1.0);
        self.delay_for(draw)
    }

    /// Compute the delay for a given uniform draw in `[0, 1)`
    pub fn delay_for(&self, draw: f64) -> Duration {
        let BackoffConfig {
            cap_ms,
            base_ms,
            delay_ms,
        } = self.config;

        let p1 = base_ms - delay_ms * 3.0 - 1.0;
        let p2 = draw * p1;
        let candidate = p2.floor() + delay_ms * 3.0;
        let ms = cap_ms.min(candidate).max(0.0);

        Duration::from_millis(ms as u64)
    }

    pub fn config(&self) -> BackoffConfig {
        self.config
    }
}

use std::time::Duration;

use crate::{BackoffConfig, DecorrelatedJitter, ResolvedConfig};

#[test]
fn test_default_tunables_match_config_defaults() {
    assert_eq!(
        BackoffConfig::from(&ResolvedConfig::default()),
        BackoffConfig::default()
    );
}

#[test]
fn test_formula_with_default_tunables() {
    let backoff = DecorrelatedJitter::with_seed(BackoffConfig::default(), 1);

    // p1 = 2 - 3000 - 1 = -2999
    // draw 0.0: floor(0) + 3000 = 3000, capped at 1000
    assert_eq!(backoff.delay_for(0.0), Duration::from_millis(1000));
    // draw 0.9: floor(-2699.1) + 3000 = 300
    assert_eq!(backoff.delay_for(0.9), Duration::from_millis(300));
    // draw 0.5: floor(-1499.5) + 3000 = 1500, capped at 1000
    assert_eq!(backoff.delay_for(0.5), Duration::from_millis(1000));
}

#[test]
fn test_formula_with_wide_base() {
    let backoff = DecorrelatedJitter::with_seed(BackoffConfig::new(5000.0, 10_000.0, 100.0), 1);

    // p1 = 10000 - 300 - 1 = 9699
    // draw 0.1: floor(969.9) + 300 = 1269
    assert_eq!(backoff.delay_for(0.1), Duration::from_millis(1269));
    // draw 0.5: floor(4849.5) + 300 = 5149, capped at 5000
    assert_eq!(backoff.delay_for(0.5), Duration::from_millis(5000));
}

#[test]
fn test_delay_never_negative() {
    let backoff = DecorrelatedJitter::with_seed(BackoffConfig::new(1000.0, 0.0, 0.0), 1);

    // p1 = -1, floor(-0.5) = -1, clamped to zero
    assert_eq!(backoff.delay_for(0.5), Duration::ZERO);
}

#[test]
fn test_delay_within_bounds() {
    let configs = [
        BackoffConfig::default(),
        BackoffConfig::new(250.0, 2.0, 10.0),
        BackoffConfig::new(5000.0, 10_000.0, 100.0),
        BackoffConfig::new(0.0, 2.0, 1000.0),
        BackoffConfig::new(1000.0, 0.0, 0.0),
    ];

    for config in configs {
        let cap = Duration::from_millis(config.cap_ms as u64);
        let mut backoff = DecorrelatedJitter::new(config);
        for _ in 0..500 {
            let delay = backoff.next_delay();
            assert!(delay <= cap, "{:?} exceeds cap {:?} for {:?}", delay, cap, config);
        }
    }
}

#[test]
fn test_seeded_sequences_are_reproducible() {
    let config = BackoffConfig::new(5000.0, 10_000.0, 100.0);
    let mut a = DecorrelatedJitter::with_seed(config, 42);
    let mut b = DecorrelatedJitter::with_seed(config, 42);

    let first: Vec<Duration> = (0..20).map(|_| a.next_delay()).collect();
    let second: Vec<Duration> = (0..20).map(|_| b.next_delay()).collect();
    assert_eq!(first, second);
}

#[test]
fn test_generators_do_not_share_state() {
    let config = BackoffConfig::new(5000.0, 10_000.0, 100.0);
    let mut a = DecorrelatedJitter::with_seed(config, 7);
    let mut b = DecorrelatedJitter::with_seed(config, 7);

    // Draining one generator leaves the other's sequence untouched
    for _ in 0..10 {
        a.next_delay();
    }
    let mut fresh = DecorrelatedJitter::with_seed(config, 7);
    assert_eq!(b.next_delay(), fresh.next_delay());
}

#[test]
fn test_spread_with_wide_base() {
    let mut backoff = DecorrelatedJitter::with_seed(BackoffConfig::new(5000.0, 10_000.0, 100.0), 3);
    let delays: std::collections::HashSet<Duration> =
        (0..50).map(|_| backoff.next_delay()).collect();
    assert!(delays.len() > 1, "expected jitter, got {:?}", delays);
}

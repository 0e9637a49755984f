use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tradeguard::clock::{Clock, ManualClock};
use tradeguard::config::Config;
use tradeguard::ratelimit::{LimiterRegistry, RateLimitSettings, RateLimits, TokenBucket};

#[test]
fn test_bucket_ceiling() {
    let clock = Arc::new(ManualClock::default());
    let bucket = TokenBucket::with_clock(5, Duration::from_secs(1), clock).unwrap();

    for _ in 0..5 {
        assert!(bucket.allow());
    }
    assert!(!bucket.allow());
}

#[test]
fn test_refill_is_proportional_and_capped() {
    let clock = Arc::new(ManualClock::default());
    let bucket = TokenBucket::with_clock(2, Duration::from_millis(100), clock.clone()).unwrap();

    assert!(bucket.allow());
    assert!(bucket.allow());
    assert!(!bucket.allow());

    clock.advance(chrono::Duration::milliseconds(250));

    assert!(bucket.allow());
    assert!(bucket.allow());
    assert!(!bucket.allow());
}

#[test]
fn test_partial_intervals_carry_over() {
    let clock = Arc::new(ManualClock::default());
    let bucket = TokenBucket::with_clock(1, Duration::from_secs(1), clock.clone()).unwrap();
    assert!(bucket.allow());

    // Time left over from a partial interval still counts toward the next token
    clock.advance(chrono::Duration::milliseconds(600));
    assert!(!bucket.allow());
    clock.advance(chrono::Duration::milliseconds(600));
    assert!(bucket.allow());
}

#[test]
fn test_registry_key_isolation() {
    let clock = Arc::new(ManualClock::default());
    let registry = LimiterRegistry::with_clock("auth", 3, Duration::from_secs(60), clock).unwrap();

    for _ in 0..3 {
        assert!(registry.allow("10.0.0.1"));
    }
    assert!(!registry.allow("10.0.0.1"));

    let other = registry.check("10.0.0.2");
    assert!(other.allowed);
    assert_eq!(other.remaining, 2);
    assert_eq!(registry.len(), 2);
}

#[test]
fn test_concurrent_first_use_shares_one_bucket() {
    let registry = Arc::new(LimiterRegistry::new("api", 50, Duration::from_secs(3600)).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            thread::spawn(move || (0..20).filter(|_| registry.allow("user-42")).count())
        })
        .collect();

    let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(admitted, 50);
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_idle_buckets_are_evicted() {
    let clock = Arc::new(ManualClock::default());
    let registry =
        LimiterRegistry::with_clock("api", 10, Duration::from_secs(1), clock.clone()).unwrap();

    registry.allow("stale");
    clock.advance(chrono::Duration::minutes(10));
    registry.allow("fresh");

    assert_eq!(registry.evict_idle(Duration::from_secs(5 * 60)), 1);
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.get_limiter("fresh").last_used(), clock.now());
}

#[test]
fn test_profiles_are_independent() {
    let limits = RateLimits::from_settings(&RateLimitSettings::default()).unwrap();

    for _ in 0..5 {
        assert!(limits.auth.allow("trader@example.com"));
    }
    assert!(!limits.auth.allow("trader@example.com"));
    assert!(limits.api.allow("trader@example.com"));
    assert!(limits.high_value.allow("trader@example.com"));
}

#[test]
fn test_rate_limits_from_config() {
    let config = Config::parse(
        r#"
[rate_limits.high_value]
max_tokens = 1
refill_interval = "1h"
"#,
    )
    .unwrap();
    let limits = config.build_rate_limits().unwrap();

    let first = limits.high_value.check("acct-1");
    assert!(first.allowed);
    assert_eq!(first.limit, 1);
    assert_eq!(first.remaining, 0);

    let second = limits.high_value.check("acct-1");
    assert!(!second.allowed);
    assert!(second.reset_after > Duration::ZERO);
}

// src/algorithms/tests/token_bucket_tests.rs

use std::sync::Arc;
use std::time::Duration;

use crate::algorithms::LocalBuckets;
use crate::clock::ManualClock;

const MINUTE: Duration = Duration::from_secs(60);

#[test]
fn test_full_bucket_admits_capacity_then_rejects() {
    let clock = Arc::new(ManualClock::new(0));
    let buckets = LocalBuckets::new(clock);

    for i in 0..5 {
        assert!(buckets.try_consume("10.0.0.1", 5, MINUTE), "request {} should pass", i);
    }
    assert!(!buckets.try_consume("10.0.0.1", 5, MINUTE));
}

#[test]
fn test_identities_are_isolated() {
    let clock = Arc::new(ManualClock::new(0));
    let buckets = LocalBuckets::new(clock);

    assert!(buckets.try_consume("a", 1, MINUTE));
    assert!(!buckets.try_consume("a", 1, MINUTE));
    assert!(buckets.try_consume("b", 1, MINUTE));
    assert_eq!(buckets.len(), 2);
}

#[test]
fn test_refills_continuously() {
    let clock = Arc::new(ManualClock::new(0));
    let buckets = LocalBuckets::new(clock.clone());

    for _ in 0..6 {
        buckets.try_consume("user", 6, MINUTE);
    }
    assert!(!buckets.try_consume("user", 6, MINUTE));

    // one token every 10 seconds
    clock.advance(Duration::from_secs(9));
    assert!(!buckets.try_consume("user", 6, MINUTE));
    clock.advance(Duration::from_secs(1));
    assert!(buckets.try_consume("user", 6, MINUTE));
    assert!(!buckets.try_consume("user", 6, MINUTE));

    clock.advance(Duration::from_secs(600));
    let bucket = buckets.bucket("user").unwrap();
    assert_eq!(bucket.tokens_remaining(), 6.0, "refill is capped at capacity");
}

#[test]
fn test_never_exceeds_capacity_within_one_window() {
    let clock = Arc::new(ManualClock::new(0));
    let buckets = LocalBuckets::new(clock.clone());

    let mut admitted = 0;
    for _ in 0..60 {
        if buckets.try_consume("burst", 10, MINUTE) {
            admitted += 1;
        }
        clock.advance(Duration::from_millis(500));
    }
    // 10 up front plus at most 30s worth of refill
    assert!(admitted <= 15, "admitted {} in 30 seconds", admitted);
    assert!(admitted >= 10);
}

#[test]
fn test_changed_limits_do_not_grant_fresh_burst() {
    let clock = Arc::new(ManualClock::new(0));
    let buckets = LocalBuckets::new(clock);

    for _ in 0..3 {
        assert!(buckets.try_consume("user", 3, MINUTE));
    }
    assert!(!buckets.try_consume("user", 10, MINUTE));
    assert_eq!(buckets.bucket("user").unwrap().capacity(), 10);
}

#[test]
fn test_reset_and_evict_idle() {
    let clock = Arc::new(ManualClock::new(0));
    let buckets = LocalBuckets::new(clock.clone());

    buckets.try_consume("busy", 2, MINUTE);
    buckets.try_consume("busy", 2, MINUTE);
    assert!(buckets.reset("busy"));
    assert!(!buckets.reset("busy"));
    assert!(buckets.try_consume("busy", 2, MINUTE));

    buckets.try_consume("idle", 2, MINUTE);
    clock.advance(MINUTE);
    assert_eq!(buckets.evict_idle(), 2);
    assert!(buckets.is_empty());
}

#[test]
fn test_huge_refill_period_does_not_wrap() {
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let buckets = LocalBuckets::new(clock.clone());
    let forever = Duration::from_secs(u64::MAX);

    assert!(buckets.try_consume("slow", 2, forever));
    assert!(buckets.try_consume("slow", 2, forever));
    assert!(!buckets.try_consume("slow", 2, forever));

    clock.advance(Duration::from_secs(86_400));
    assert!(!buckets.try_consume("slow", 2, forever));
    assert!(buckets.bucket("slow").unwrap().tokens_remaining() < 1.0);
}

// src/algorithms/token_bucket.rs

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{duration_millis, Clock};

/// Per-identity token bucket used while the fast backend can't be trusted.
///
/// Refills continuously at `capacity` tokens per `refill_period`. This approximates the
/// sliding window log: a caller can never exceed `capacity` within one period starting from
/// a full bucket, but a bucket that is partly refilled admits slightly earlier than a log would.
#[derive(Debug, Clone)]
pub struct LocalBucket {
    capacity: u64,
    refill_period_ms: i64,
    last_refill: i64,
    tokens: f64,
}

impl LocalBucket {
    fn full(capacity: u64, refill_period: Duration, now: i64) -> Self {
        Self {
            capacity,
            refill_period_ms: duration_millis(refill_period).max(1),
            last_refill: now,
            tokens: capacity as f64,
        }
    }

    fn refill(&mut self, now: i64) {
        // a clock that steps backwards simply refills nothing
        let elapsed = now.saturating_sub(self.last_refill).max(0);
        if elapsed > 0 {
            let added = elapsed as f64 * self.capacity as f64 / self.refill_period_ms as f64;
            self.tokens = (self.tokens + added).min(self.capacity as f64);
            self.last_refill = now;
        }
    }

    /// Adopt new limits without handing out a fresh burst
    fn reconfigure(&mut self, capacity: u64, refill_period: Duration) {
        self.capacity = capacity;
        self.refill_period_ms = duration_millis(refill_period).max(1);
        self.tokens = self.tokens.min(capacity as f64);
    }

    fn try_take(&mut self, now: i64) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn tokens_remaining(&self) -> f64 {
        self.tokens
    }
}

/// Concurrent map of local buckets. Each identity is locked independently.
#[derive(Debug)]
pub struct LocalBuckets {
    buckets: DashMap<String, LocalBucket>,
    clock: Arc<dyn Clock>,
}

impl LocalBuckets {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: DashMap::new(),
            clock,
        }
    }

    /// Take one token for `identity` if available.
    pub fn try_consume(&self, identity: &str, capacity: u64, window: Duration) -> bool {
        let now = self.clock.now_millis();
        let mut bucket = self
            .buckets
            .entry(identity.to_string())
            .or_insert_with(|| LocalBucket::full(capacity, window, now));

        if bucket.capacity != capacity
            || bucket.refill_period_ms != duration_millis(window).max(1)
        {
            bucket.refill(now);
            bucket.reconfigure(capacity, window);
        }

        bucket.try_take(now)
    }

    pub fn reset(&self, identity: &str) -> bool {
        self.buckets.remove(identity).is_some()
    }

    /// Snapshot of an identity's bucket after refilling it to now.
    pub fn bucket(&self, identity: &str) -> Option<LocalBucket> {
        let now = self.clock.now_millis();
        self.buckets.get_mut(identity).map(|mut bucket| {
            bucket.refill(now);
            bucket.clone()
        })
    }

    /// Drop buckets that have refilled completely; they hold no state worth keeping.
    pub fn evict_idle(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| {
            bucket.refill(now);
            bucket.tokens < bucket.capacity as f64
        });
        before.saturating_sub(self.buckets.len())
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

// src/rate_limiter.rs

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task;
use tokio::time;
use tracing::{debug, error, warn};

use crate::algorithms::{DecisionPath, LocalBuckets, SlidingWindowLog};
use crate::clock::Clock;
use crate::config::RateLimiterConfig;
use crate::rate_limit_event;
use crate::resilience::{CircuitBreaker, CircuitState, HealthMonitor};
use crate::storage::{with_deadline, FastBackend};

/// Key used when the caller couldn't resolve an identity
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Longest window honored; longer ones are clamped to it (100 years)
pub const MAX_WINDOW_SECONDS: u64 = 100 * 365 * 24 * 60 * 60;

/// Counters describing how admission decisions were made.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimiterStats {
    pub fast_path_decisions: u64,
    pub fallback_decisions: u64,
    pub exempt_admissions: u64,
    pub rejections: u64,
    /// Fast path calls that errored and were admitted anyway
    pub fail_open_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    fast_path: AtomicU64,
    fallback: AtomicU64,
    exempt: AtomicU64,
    rejections: AtomicU64,
    errors: AtomicU64,
}

/// Per-identity admission controller.
///
/// Uses the sliding window log in the fast backend while the health monitor trusts it, and a
/// local token bucket otherwise. Backend faults never reach the caller: an admission call that
/// fails in flight admits the request and bumps [`error_count`](Self::error_count).
#[derive(Debug)]
pub struct RateLimiter {
    fast: Option<SlidingWindowLog>,
    local: LocalBuckets,
    health: Arc<HealthMonitor>,
    breaker: CircuitBreaker,
    exempt: HashSet<String>,
    config: RateLimiterConfig,
    counters: Counters,
}

impl RateLimiter {
    pub fn new(
        fast: Option<Arc<dyn FastBackend>>,
        health: Arc<HealthMonitor>,
        config: RateLimiterConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let fast = fast.map(|backend| {
            SlidingWindowLog::new(backend, config.key_prefix.clone(), Arc::clone(&clock))
        });

        Self {
            fast,
            local: LocalBuckets::new(Arc::clone(&clock)),
            health,
            breaker: CircuitBreaker::new(config.circuit_breaker.clone(), clock),
            exempt: config
                .exempt_identities
                .iter()
                .map(|s| s.trim().to_string())
                .collect(),
            config,
            counters: Counters::default(),
        }
    }

    pub fn is_exempt(&self, identity: &str) -> bool {
        self.exempt.contains(identity.trim())
    }

    /// Decide whether `identity` may make one more request within `window_seconds`.
    ///
    /// `capacity` and `window_seconds` below 1 are treated as 1, and windows longer than
    /// [`MAX_WINDOW_SECONDS`] as that maximum.
    pub async fn try_consume(&self, identity: &str, capacity: u64, window_seconds: u64) -> bool {
        let identity = normalize_identity(identity);
        let capacity = capacity.max(1);
        let window_seconds = window_seconds.clamp(1, MAX_WINDOW_SECONDS);

        let (admitted, path) = self.decide(identity, capacity, window_seconds).await;

        if !admitted {
            self.counters.rejections.fetch_add(1, Ordering::Relaxed);
        }
        rate_limit_event!(identity, admitted, capacity, window_seconds, path.as_str());
        admitted
    }

    async fn decide(&self, identity: &str, capacity: u64, window_seconds: u64) -> (bool, DecisionPath) {
        if self.is_exempt(identity) {
            self.counters.exempt.fetch_add(1, Ordering::Relaxed);
            return (true, DecisionPath::Exempt);
        }

        let window = Duration::from_secs(window_seconds);

        if let Some(fast) = self.fast_path() {
            let result = with_deadline(
                "rate limit admission",
                self.config.operation_timeout,
                fast.try_admit(identity, capacity, window),
            )
            .await;

            return match result {
                Ok(admitted) => {
                    self.breaker.record_success();
                    self.counters.fast_path.fetch_add(1, Ordering::Relaxed);
                    (admitted, DecisionPath::FastPath)
                }
                Err(e) => {
                    self.breaker.record_failure();
                    let errors = self.counters.errors.fetch_add(1, Ordering::Relaxed) + 1;
                    error!(
                        identity,
                        backend = fast.backend_name(),
                        kind = %e.kind(),
                        errors,
                        "Rate limit check failed, admitting request: {}",
                        e
                    );
                    (true, DecisionPath::FailOpen)
                }
            };
        }

        self.counters.fallback.fetch_add(1, Ordering::Relaxed);
        let admitted = self.local.try_consume(identity, capacity, window);
        (admitted, DecisionPath::Fallback)
    }

    /// The fast path is used only when a backend exists, the monitor trusts it, and the
    /// breaker isn't open.
    fn fast_path(&self) -> Option<&SlidingWindowLog> {
        let fast = self.fast.as_ref()?;
        if !self.health.is_healthy() {
            return None;
        }
        if !self.breaker.allow_request() {
            debug!("Circuit open, using local rate limit buckets");
            return None;
        }
        Some(fast)
    }

    /// Forget everything recorded for `identity` on both paths.
    pub async fn reset(&self, identity: &str) {
        let identity = normalize_identity(identity);
        self.local.reset(identity);

        if let Some(fast) = &self.fast {
            let result = with_deadline(
                "rate limit reset",
                self.config.operation_timeout,
                fast.clear(identity),
            )
            .await;
            if let Err(e) = result {
                warn!(
                    identity,
                    backend = fast.backend_name(),
                    kind = %e.kind(),
                    "Failed to clear fast path rate limit state: {}",
                    e
                );
            }
        }
    }

    /// Number of fast path calls that failed and were admitted
    pub fn error_count(&self) -> u64 {
        self.counters.errors.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            fast_path_decisions: self.counters.fast_path.load(Ordering::Relaxed),
            fallback_decisions: self.counters.fallback.load(Ordering::Relaxed),
            exempt_admissions: self.counters.exempt.load(Ordering::Relaxed),
            rejections: self.counters.rejections.load(Ordering::Relaxed),
            fail_open_errors: self.error_count(),
        }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn local_buckets(&self) -> &LocalBuckets {
        &self.local
    }

    pub fn evict_idle(&self) -> usize {
        self.local.evict_idle()
    }

    /// Periodically evict fully refilled local buckets.
    pub fn start_janitor(self: &Arc<Self>) -> task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        let every = self.config.janitor_interval;

        task::spawn(async move {
            let mut ticker = time::interval(every);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let evicted = limiter.evict_idle();
                if evicted > 0 {
                    debug!(evicted, "Evicted idle local rate limit buckets");
                }
            }
        })
    }
}

fn normalize_identity(identity: &str) -> &str {
    let trimmed = identity.trim();
    if trimmed.is_empty() {
        UNKNOWN_IDENTITY
    } else {
        trimmed
    }
}

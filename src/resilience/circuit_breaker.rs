use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::CircuitBreakerConfig;

/// The state of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow to the fast backend normally
    Closed,
    /// Fast backend calls are skipped
    Open,
    /// Trial requests are let through to test recovery
    HalfOpen,
}

impl CircuitState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

/// Lock-free circuit breaker guarding in-flight fast backend calls.
///
/// The health monitor only notices an outage once per probe interval; the breaker reacts to
/// errors seen by real traffic in between.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: AtomicU8,
    consecutive_failures: AtomicU64,
    half_open_successes: AtomicU64,
    opened_at: AtomicI64,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: AtomicU8::new(CircuitState::Closed.as_u8()),
            consecutive_failures: AtomicU64::new(0),
            half_open_successes: AtomicU64::new(0),
            opened_at: AtomicI64::new(0),
            config,
            clock,
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: CircuitState, to: CircuitState) -> bool {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Check if the breaker lets a fast backend call proceed
    pub fn allow_request(&self) -> bool {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let opened_at = self.opened_at.load(Ordering::Acquire);
                let elapsed = self.clock.now_millis().saturating_sub(opened_at);
                if elapsed < self.config.reset_timeout.as_millis() as i64 {
                    return false;
                }
                if self.transition(CircuitState::Open, CircuitState::HalfOpen) {
                    self.half_open_successes.store(0, Ordering::Release);
                    debug!("Circuit breaker half-open, letting trial requests through");
                }
                true
            }
        }
    }

    pub fn record_success(&self) {
        match self.state() {
            CircuitState::Closed => {
                self.consecutive_failures.store(0, Ordering::Release);
            }
            CircuitState::HalfOpen => {
                let successes = self.half_open_successes.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.config.success_threshold
                    && self.transition(CircuitState::HalfOpen, CircuitState::Closed)
                {
                    self.consecutive_failures.store(0, Ordering::Release);
                    self.half_open_successes.store(0, Ordering::Release);
                    info!(successes, "Circuit breaker closed");
                }
            }
            CircuitState::Open => {
                // a call admitted just before the circuit opened
            }
        }
    }

    pub fn record_failure(&self) {
        match self.state() {
            CircuitState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.config.failure_threshold {
                    self.opened_at
                        .store(self.clock.now_millis(), Ordering::Release);
                    if self.transition(CircuitState::Closed, CircuitState::Open) {
                        warn!(
                            failures,
                            "Circuit breaker opened after consecutive fast backend failures"
                        );
                    }
                }
            }
            CircuitState::HalfOpen => {
                self.opened_at
                    .store(self.clock.now_millis(), Ordering::Release);
                if self.transition(CircuitState::HalfOpen, CircuitState::Open) {
                    self.half_open_successes.store(0, Ordering::Release);
                    warn!("Circuit breaker re-opened after failure in half-open state");
                }
            }
            CircuitState::Open => {}
        }
    }
}

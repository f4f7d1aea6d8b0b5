use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::clock::{millis_to_datetime, Clock};
use crate::config::{HealthCheckConfig, RuntimeMode};
use crate::error::{ErrorKind, GuardError};
use crate::storage::FastBackend;

const NEVER: i64 = i64::MIN;

/// Point-in-time view of the fast backend's health, for dashboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub failure_count: u64,
    pub success_count: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
}

/// What a single call to [`HealthMonitor::probe`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Healthy,
    Unhealthy(ErrorKind),
    /// No fast backend is configured; counted as a failure
    Unconfigured,
    /// Another probe was still running
    Skipped,
}

/// Clears the in-flight flag even if the probe future is dropped.
struct ProbeGuard<'a>(&'a AtomicBool);

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
struct HealthState {
    healthy: AtomicBool,
    failure_count: AtomicU64,
    success_count: AtomicU64,
    last_failure_at: AtomicI64,
    last_success_at: AtomicI64,
}

/// Periodically pings the fast backend and caches whether it can be trusted.
///
/// Readers only touch atomics, so [`is_healthy`](Self::is_healthy) is safe to call on
/// every request. Writes happen from [`probe`](Self::probe), which never overlaps itself.
#[derive(Debug)]
pub struct HealthMonitor {
    backend: Option<Arc<dyn FastBackend>>,
    config: HealthCheckConfig,
    mode: RuntimeMode,
    clock: Arc<dyn Clock>,
    state: HealthState,
    /// Set while a probe is in flight
    probing: AtomicBool,
    /// Cancel flag for the probe loop
    cancel_flag: AtomicBool,
    shutdown: Notify,
}

impl HealthMonitor {
    pub fn new(
        backend: Option<Arc<dyn FastBackend>>,
        config: HealthCheckConfig,
        mode: RuntimeMode,
        clock: Arc<dyn Clock>,
    ) -> Self {
        if backend.is_none() {
            if mode.is_strict() {
                error!(
                    severity = "critical",
                    "No fast backend configured in strict mode; health will stay down"
                );
            } else {
                warn!("No fast backend configured; all callers will use their fallback paths");
            }
        }

        Self {
            // Assume a configured backend is healthy until a probe says otherwise
            state: HealthState {
                healthy: AtomicBool::new(backend.is_some()),
                failure_count: AtomicU64::new(0),
                success_count: AtomicU64::new(0),
                last_failure_at: AtomicI64::new(NEVER),
                last_success_at: AtomicI64::new(NEVER),
            },
            backend,
            config,
            mode,
            clock,
            probing: AtomicBool::new(false),
            cancel_flag: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    /// Check if the fast backend is currently trusted
    pub fn is_healthy(&self) -> bool {
        self.state.healthy.load(Ordering::Acquire)
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    pub fn metrics(&self) -> HealthStatus {
        let at = |cell: &AtomicI64| match cell.load(Ordering::Acquire) {
            NEVER => None,
            millis => Some(millis_to_datetime(millis)),
        };

        HealthStatus {
            healthy: self.is_healthy(),
            failure_count: self.state.failure_count.load(Ordering::Acquire),
            success_count: self.state.success_count.load(Ordering::Acquire),
            last_failure_at: at(&self.state.last_failure_at),
            last_success_at: at(&self.state.last_success_at),
        }
    }

    /// Run one liveness check against the fast backend. No retries: the next tick is the retry.
    pub async fn probe(&self) -> ProbeOutcome {
        if self
            .probing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Health probe still in flight, skipping this tick");
            return ProbeOutcome::Skipped;
        }

        let _guard = ProbeGuard(&self.probing);
        self.run_probe().await
    }

    async fn run_probe(&self) -> ProbeOutcome {
        let Some(backend) = &self.backend else {
            if self.mode.is_strict() {
                error!(
                    severity = "critical",
                    "Fast backend is not configured; it can never become healthy"
                );
            }
            self.record_failure();
            return ProbeOutcome::Unconfigured;
        };

        let timeout = self.config.check_timeout;
        let result = match time::timeout(timeout, backend.ping()).await {
            Ok(result) => result,
            Err(_) => Err(GuardError::timeout("health probe", timeout)),
        };

        match result {
            Ok(()) => {
                self.record_success(backend.name());
                ProbeOutcome::Healthy
            }
            Err(e) => {
                let failures = self.record_failure();
                warn!(
                    backend = backend.name(),
                    kind = %e.kind(),
                    consecutive_failures = failures,
                    "Fast backend health probe failed: {}",
                    e
                );
                ProbeOutcome::Unhealthy(e.kind())
            }
        }
    }

    fn record_success(&self, backend: &str) {
        self.state
            .last_success_at
            .store(self.clock.now_millis(), Ordering::Release);
        self.state.success_count.fetch_add(1, Ordering::AcqRel);

        let previous_failures = self.state.failure_count.swap(0, Ordering::AcqRel);
        let was_healthy = self.state.healthy.swap(true, Ordering::AcqRel);
        if previous_failures > 0 || !was_healthy {
            info!(
                backend,
                failed_probes = previous_failures,
                "Fast backend recovered"
            );
        }
    }

    /// Returns the failure count after this failure
    fn record_failure(&self) -> u64 {
        self.state.healthy.store(false, Ordering::Release);
        self.state
            .last_failure_at
            .store(self.clock.now_millis(), Ordering::Release);
        self.state.failure_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Start the probe loop on its own task. Ticks that fall behind a slow probe are
    /// dropped rather than queued.
    pub fn start(self: &Arc<Self>) -> task::JoinHandle<()> {
        let monitor = Arc::clone(self);
        let every = self.config.check_interval;

        task::spawn(async move {
            let mut ticker = time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval = ?every, "Health monitor starting");

            loop {
                if monitor.cancel_flag.load(Ordering::Acquire) {
                    break;
                }

                tokio::select! {
                    _ = ticker.tick() => {
                        monitor.probe().await;
                    }
                    _ = monitor.shutdown.notified() => {
                        break;
                    }
                }
            }

            debug!("Health monitor task stopped");
        })
    }

    /// Stop the probe loop
    pub fn stop(&self) {
        self.cancel_flag.store(true, Ordering::Release);
        self.shutdown.notify_one();
    }
}

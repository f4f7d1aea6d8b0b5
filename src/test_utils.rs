// src/test_utils.rs

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

use crate::clock::{Clock, ManualClock};
use crate::config::{AppConfig, HealthCheckConfig, RuntimeMode};
use crate::error::{GuardError, Result};
use crate::layer::ResilienceLayer;
use crate::resilience::HealthMonitor;
use crate::storage::{
    DurableBackend, FastBackend, MemoryStorage, MemoryUserRepository, UserRecord, WindowRequest,
};

/// Fast backend that wraps [`MemoryStorage`] and can be told to fail or stall.
#[derive(Debug)]
pub struct FlakyStorage {
    inner: MemoryStorage,
    failing: AtomicBool,
    delay_ms: AtomicU64,
    operations: AtomicUsize,
}

impl FlakyStorage {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: MemoryStorage::new(clock),
            failing: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
            operations: AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Calls received, including failed ones
    pub fn operations(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryStorage {
        &self.inner
    }

    async fn enter(&self) -> Result<()> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            time::sleep(Duration::from_millis(delay)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(GuardError::BackendUnavailable(
                "Connection refused (simulated)".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl FastBackend for FlakyStorage {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn ping(&self) -> Result<()> {
        self.enter().await?;
        self.inner.ping().await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.enter().await?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.enter().await?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.enter().await?;
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.enter().await?;
        self.inner.exists(key).await
    }

    async fn admit(&self, key: &str, request: &WindowRequest) -> Result<bool> {
        self.enter().await?;
        self.inner.admit(key, request).await
    }
}

/// Durable backend that can be switched to fail every call.
#[derive(Debug, Default)]
pub struct FailingUserRepository {
    inner: MemoryUserRepository,
    failing: AtomicBool,
}

impl FailingUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(ids: &[i64]) -> Self {
        let repository = Self::new();
        for id in ids {
            repository.inner.insert_user(*id);
        }
        repository
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(GuardError::DurableFailure(
                "connection pool timed out (simulated)".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DurableBackend for FailingUserRepository {
    fn name(&self) -> &'static str {
        "failing-users"
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }

    async fn find_by_user_id(&self, user_id: i64) -> Result<Option<UserRecord>> {
        self.check()?;
        self.inner.find_by_user_id(user_id).await
    }

    async fn save(&self, record: &UserRecord) -> Result<()> {
        self.check()?;
        self.inner.save(record).await
    }
}

/// Manual clock starting at a round, recent instant
pub fn test_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(1_700_000_000_000))
}

/// Short timeouts so failure paths resolve quickly
pub fn test_config(mode: RuntimeMode) -> AppConfig {
    let mut config = AppConfig {
        mode,
        health_check: HealthCheckConfig {
            check_interval: Duration::from_millis(50),
            check_timeout: Duration::from_millis(100),
        },
        ..AppConfig::default()
    };
    config.rate_limiter.operation_timeout = Duration::from_millis(100);
    config.token_store.operation_timeout = Duration::from_millis(100);
    config
}

pub fn test_monitor(
    backend: Option<Arc<dyn FastBackend>>,
    mode: RuntimeMode,
    clock: Arc<dyn Clock>,
) -> Arc<HealthMonitor> {
    Arc::new(HealthMonitor::new(
        backend,
        test_config(mode).health_check,
        mode,
        clock,
    ))
}

/// Layer over a flaky fast backend and a failing-capable repository holding `users`.
pub fn test_layer(
    mode: RuntimeMode,
    users: &[i64],
) -> (
    ResilienceLayer,
    Arc<FlakyStorage>,
    Arc<FailingUserRepository>,
    Arc<ManualClock>,
) {
    let clock = test_clock();
    let fast = Arc::new(FlakyStorage::new(clock.clone()));
    let durable = Arc::new(FailingUserRepository::with_users(users));
    let layer = ResilienceLayer::from_parts(
        &test_config(mode),
        Some(fast.clone()),
        durable.clone(),
        clock.clone(),
    );
    (layer, fast, durable, clock)
}

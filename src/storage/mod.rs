// src/storage/mod.rs

pub mod memory;
pub mod postgres;
pub mod redis;
pub mod user_repository;

#[cfg(test)]
mod tests;

pub use memory::MemoryStorage;
pub use postgres::PgUserRepository;
pub use redis::{LazyRedisStorage, RedisStorage};
pub use user_repository::{MemoryUserRepository, UserRecord};

use crate::error::{GuardError, Result};
use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

/// One admission attempt against a sliding window log.
#[derive(Debug, Clone)]
pub struct WindowRequest {
    /// Admission timestamp in milliseconds; also the score recorded on success
    pub now_millis: i64,
    pub window: Duration,
    pub capacity: u64,
    /// Unique member name so concurrent admissions in the same millisecond don't collide
    pub member: String,
}

impl WindowRequest {
    /// Timestamps at or before this instant are outside the window
    pub fn window_start_millis(&self) -> i64 {
        self.now_millis
            .saturating_sub(crate::clock::duration_millis(self.window))
    }
}

/// The low-latency shared store. Optional at runtime and never the system of record.
#[async_trait]
pub trait FastBackend: Send + Sync + Debug {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Lightweight liveness command
    async fn ping(&self) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Returns true if a key was removed
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Atomically trims the log at `key`, counts it, and records `request.now_millis`
    /// only if the count is below capacity. Returns whether the request was admitted.
    async fn admit(&self, key: &str, request: &WindowRequest) -> Result<bool>;
}

/// Repository contract over the authoritative user store.
#[async_trait]
pub trait DurableBackend: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// Used at startup to verify the store is reachable
    async fn ping(&self) -> Result<()>;

    async fn find_by_user_id(&self, user_id: i64) -> Result<Option<UserRecord>>;

    async fn save(&self, record: &UserRecord) -> Result<()>;
}

/// Run a backend future under a deadline, turning expiry into [`GuardError::BackendTimeout`].
pub(crate) async fn with_deadline<T, F>(
    operation: &'static str,
    deadline: Duration,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(GuardError::timeout(operation, deadline)),
    }
}

// src/token_store/mod.rs
//! Refresh credential storage across the fast and durable backends.
//!
//! The durable backend is the system of record and is always written. The fast backend is a
//! latency optimization: written and read only while the health monitor trusts it, and
//! cleared on delete whatever its health so no credential is orphaned there.
//!
//! A save that cannot write the fast backend evicts the user's cached copy instead. When that
//! eviction fails too, the user is remembered as stale and the cache is bypassed for them
//! until a later eviction or write goes through.

mod backends;

#[cfg(test)]
mod tests;

pub use backends::{CredentialBackend, DurableCredentials, FastCredentials, RefreshTokenRecord};

use dashmap::DashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::clock::{millis_to_datetime, Clock};
use crate::config::{RuntimeMode, TokenStoreConfig};
use crate::error::Result;
use crate::resilience::HealthMonitor;
use crate::storage::{DurableBackend, FastBackend};

#[derive(Debug)]
pub struct TokenStore {
    fast: Option<FastCredentials>,
    durable: DurableCredentials,
    health: Arc<HealthMonitor>,
    mode: RuntimeMode,
    clock: Arc<dyn Clock>,
    stale: DashSet<i64>,
}

impl TokenStore {
    pub fn new(
        fast: Option<Arc<dyn FastBackend>>,
        durable: Arc<dyn DurableBackend>,
        health: Arc<HealthMonitor>,
        config: &TokenStoreConfig,
        mode: RuntimeMode,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            fast: fast.map(|backend| {
                FastCredentials::new(
                    backend,
                    config.key_prefix.clone(),
                    config.operation_timeout,
                )
            }),
            durable: DurableCredentials::new(durable),
            health,
            mode,
            clock,
            stale: DashSet::new(),
        }
    }

    /// The fast backend, if it exists and is currently trusted
    fn healthy_fast(&self) -> Option<&FastCredentials> {
        self.fast.as_ref().filter(|_| self.health.is_healthy())
    }

    /// The fast backend, if it is trusted and holds nothing stale for the user
    async fn readable_fast(&self, user_id: i64) -> Option<&FastCredentials> {
        let fast = self.healthy_fast()?;
        if self.stale.contains(&user_id) && !self.evict(fast, user_id).await {
            return None;
        }
        Some(fast)
    }

    /// Backends to read from, in order of preference
    async fn read_order(&self, user_id: i64) -> Vec<&dyn CredentialBackend> {
        let mut order: Vec<&dyn CredentialBackend> = Vec::with_capacity(2);
        if let Some(fast) = self.readable_fast(user_id).await {
            order.push(fast);
        }
        order.push(&self.durable);
        order
    }

    /// Best-effort removal of the user's cached copy. A failure marks the user stale.
    async fn evict(&self, fast: &FastCredentials, user_id: i64) -> bool {
        match fast.remove(user_id).await {
            Ok(()) => {
                self.stale.remove(&user_id);
                true
            }
            Err(e) => {
                self.stale.insert(user_id);
                warn!(
                    user_id,
                    backend = fast.name(),
                    kind = %e.kind(),
                    "Failed to evict cached refresh token: {}",
                    e
                );
                false
            }
        }
    }

    /// Users whose cached copy could not be evicted yet
    pub fn stale_count(&self) -> usize {
        self.stale.len()
    }

    /// Store `token` as the user's only refresh credential.
    ///
    /// In strict mode a failed durable write is returned as an error; every other failure is
    /// logged and swallowed.
    pub async fn save(&self, user_id: i64, token: &str, ttl_seconds: i64) -> Result<()> {
        let ttl = Duration::from_secs(ttl_seconds.max(0) as u64);
        let record = RefreshTokenRecord {
            user_id,
            token: token.to_string(),
            expires_at: millis_to_datetime(
                self.clock
                    .now_millis()
                    .saturating_add(ttl_seconds.max(0).saturating_mul(1000)),
            ),
        };

        if let Some(fast) = &self.fast {
            if ttl.is_zero() {
                debug!(user_id, "Non-positive TTL, not caching refresh token");
                self.evict(fast, user_id).await;
            } else if !self.health.is_healthy() {
                debug!(user_id, "Fast backend unhealthy, not caching refresh token");
                self.evict(fast, user_id).await;
            } else {
                match fast.store(&record, ttl).await {
                    Ok(()) => {
                        self.stale.remove(&user_id);
                    }
                    Err(e) => {
                        warn!(
                            user_id,
                            backend = fast.name(),
                            kind = %e.kind(),
                            "Failed to cache refresh token: {}",
                            e
                        );
                        self.evict(fast, user_id).await;
                    }
                }
            }
        }

        match self.durable.store(&record, ttl).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(
                    user_id,
                    backend = self.durable.name(),
                    kind = %e.kind(),
                    strict = self.mode.is_strict(),
                    "Failed to persist refresh token: {}",
                    e
                );
                // the cache must not hold a token the system of record never saw
                if let Some(fast) = &self.fast {
                    self.evict(fast, user_id).await;
                }
                if self.mode.is_strict() {
                    Err(e)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Current refresh credential for the user, if any.
    pub async fn get(&self, user_id: i64) -> Option<String> {
        for backend in self.read_order(user_id).await {
            match backend.load(user_id).await {
                Ok(Some(token)) => return Some(token),
                Ok(None) => continue,
                Err(e) => {
                    warn!(
                        user_id,
                        backend = backend.name(),
                        kind = %e.kind(),
                        "Failed to read refresh token: {}",
                        e
                    );
                }
            }
        }
        None
    }

    pub async fn validate(&self, user_id: i64, token: &str) -> bool {
        self.get(user_id).await.as_deref() == Some(token)
    }

    /// Remove the credential from both backends regardless of health.
    pub async fn delete(&self, user_id: i64) {
        if let Some(fast) = &self.fast {
            self.evict(fast, user_id).await;
        }

        if let Err(e) = self.durable.remove(user_id).await {
            warn!(
                user_id,
                backend = self.durable.name(),
                kind = %e.kind(),
                "Failed to delete refresh token: {}",
                e
            );
        }
    }

    /// Fast-path existence hint. Never consults the durable backend, so `false` can mean
    /// "unknown".
    pub async fn exists(&self, user_id: i64) -> bool {
        let Some(fast) = self.readable_fast(user_id).await else {
            return false;
        };

        match fast.contains(user_id).await {
            Ok(present) => present,
            Err(e) => {
                warn!(
                    user_id,
                    backend = fast.name(),
                    kind = %e.kind(),
                    "Failed to check refresh token presence: {}",
                    e
                );
                false
            }
        }
    }
}

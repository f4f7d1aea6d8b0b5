// src/layer.rs

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{AppConfig, RuntimeMode};
use crate::error::{GuardError, Result};
use crate::rate_limiter::RateLimiter;
use crate::resilience::HealthMonitor;
use crate::storage::{
    DurableBackend, FastBackend, LazyRedisStorage, MemoryUserRepository, PgUserRepository,
    RedisStorage,
};
use crate::token_store::TokenStore;

/// The three components wired to the same backends and health monitor.
///
/// Build it once at startup and share the `Arc`s with request handlers.
#[derive(Debug, Clone)]
pub struct ResilienceLayer {
    pub health: Arc<HealthMonitor>,
    pub rate_limiter: Arc<RateLimiter>,
    pub token_store: Arc<TokenStore>,
}

/// Handles for the layer's background tasks
#[derive(Debug)]
pub struct BackgroundTasks {
    health: Arc<HealthMonitor>,
    monitor: JoinHandle<()>,
    janitor: JoinHandle<()>,
}

impl BackgroundTasks {
    pub async fn shutdown(self) {
        self.health.stop();
        self.janitor.abort();
        if let Err(e) = self.monitor.await {
            warn!("Health monitor task ended abnormally: {}", e);
        }
        info!("Resilience layer background tasks stopped");
    }
}

impl ResilienceLayer {
    /// Connect to the configured backends and assemble the layer.
    ///
    /// Strict mode refuses to start without a reachable durable backend, or with a fast
    /// backend that is configured but unreachable. Permissive mode starts on the fallbacks
    /// and lets the health monitor reconnect the fast backend later.
    pub async fn build(config: &AppConfig) -> Result<Self> {
        let strict = config.mode.is_strict();
        let mut reconnecting = false;

        let fast: Option<Arc<dyn FastBackend>> = match &config.redis {
            Some(redis_config) => match RedisStorage::connect(redis_config.clone()).await {
                Ok(storage) => {
                    info!("Connected to fast backend");
                    Some(Arc::new(storage))
                }
                Err(e) if strict => {
                    return Err(GuardError::Misconfiguration(format!(
                        "fast backend is unreachable: {}",
                        e
                    )));
                }
                Err(e) => {
                    error!(
                        "Fast backend unreachable at startup, running on fallbacks until it answers: {}",
                        e
                    );
                    reconnecting = true;
                    Some(Arc::new(LazyRedisStorage::new(redis_config.clone())))
                }
            },
            None => None,
        };

        let durable: Arc<dyn DurableBackend> = match &config.database {
            Some(db_config) => match connect_database(db_config).await {
                Ok(repository) => Arc::new(repository),
                Err(e) if strict => {
                    return Err(GuardError::Misconfiguration(format!(
                        "durable backend is unreachable: {}",
                        e
                    )));
                }
                Err(e) => {
                    error!(
                        "Durable backend unreachable, refresh tokens will only live in memory: {}",
                        e
                    );
                    Arc::new(MemoryUserRepository::new())
                }
            },
            None if strict => {
                return Err(GuardError::Misconfiguration(
                    "strict mode requires DATABASE_URL".to_string(),
                ));
            }
            None => {
                warn!("No DATABASE_URL set, using in-memory user repository");
                Arc::new(MemoryUserRepository::new())
            }
        };

        let layer = Self::from_parts(config, fast, durable, Arc::new(SystemClock));
        if reconnecting {
            // start out unhealthy instead of trusting a backend that isn't connected
            layer.health.probe().await;
        }
        Ok(layer)
    }

    /// Assemble the layer from already-constructed backends.
    pub fn from_parts(
        config: &AppConfig,
        fast: Option<Arc<dyn FastBackend>>,
        durable: Arc<dyn DurableBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let health = Arc::new(HealthMonitor::new(
            fast.clone(),
            config.health_check.clone(),
            config.mode,
            Arc::clone(&clock),
        ));

        let rate_limiter = Arc::new(RateLimiter::new(
            fast.clone(),
            Arc::clone(&health),
            config.rate_limiter.clone(),
            Arc::clone(&clock),
        ));

        let token_store = Arc::new(TokenStore::new(
            fast,
            durable,
            Arc::clone(&health),
            &config.token_store,
            config.mode,
            clock,
        ));

        Self {
            health,
            rate_limiter,
            token_store,
        }
    }

    /// Spawn the health probe loop and the local bucket janitor.
    pub fn start(&self) -> BackgroundTasks {
        BackgroundTasks {
            health: Arc::clone(&self.health),
            monitor: self.health.start(),
            janitor: self.rate_limiter.start_janitor(),
        }
    }

    pub fn mode_label(mode: RuntimeMode) -> &'static str {
        if mode.is_strict() {
            "strict"
        } else {
            "permissive"
        }
    }
}

async fn connect_database(config: &crate::config::DatabaseConfig) -> Result<PgUserRepository> {
    let repository = PgUserRepository::connect(config).await?;
    repository.ping().await?;
    info!("Connected to durable backend");
    Ok(repository)
}

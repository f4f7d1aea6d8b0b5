// src/storage/redis.rs

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client, Script};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::info;

use crate::backend_op;
use crate::config::RedisConfig;
use crate::error::{GuardError, Result};
use crate::storage::{with_deadline, FastBackend, WindowRequest};

/// Trim, count and conditionally record in a single server-side step.
///
/// KEYS[1] = log key
/// ARGV    = now_ms, window_start_ms, capacity, ttl_secs, member
const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window_start = tonumber(ARGV[2])
local capacity = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

redis.call('ZREMRANGEBYSCORE', key, '-inf', window_start)
local count = redis.call('ZCARD', key)
if count < capacity then
    redis.call('ZADD', key, now, ARGV[5])
    redis.call('EXPIRE', key, ttl)
    return 1
end
return 0
"#;

#[derive(Clone)]
pub struct RedisStorage {
    connection: ConnectionManager,
    script: Script,
    config: RedisConfig,
}

impl fmt::Debug for RedisStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStorage")
            .field("url", &self.config.url)
            .field("operation_timeout", &self.config.operation_timeout)
            .finish()
    }
}

impl RedisStorage {
    /// Connects to Redis, failing if the connection can't be established within
    /// `connection_timeout`.
    pub async fn connect(config: RedisConfig) -> Result<Self> {
        // Open the client - this doesn't actually connect to Redis yet
        let client = Client::open(config.url.as_str())?;

        let connection_manager =
            match tokio::time::timeout(config.connection_timeout, ConnectionManager::new(client))
                .await
            {
                Ok(result) => result?,
                Err(_) => {
                    return Err(GuardError::BackendUnavailable(format!(
                        "Connection to Redis timed out after {:?}",
                        config.connection_timeout
                    )));
                }
            };

        Ok(Self {
            connection: connection_manager,
            script: Script::new(SLIDING_WINDOW_SCRIPT),
            config,
        })
    }

    fn deadline(&self) -> Duration {
        self.config.operation_timeout
    }
}

#[async_trait]
impl FastBackend for RedisStorage {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        let reply: String = with_deadline("redis ping", self.deadline(), async {
            Ok::<_, GuardError>(redis::cmd("PING").query_async::<String>(&mut conn).await?)
        })
        .await?;

        if reply == "PONG" {
            Ok(())
        } else {
            Err(GuardError::BackendUnavailable(format!(
                "Unexpected response from Redis PING: {}",
                reply
            )))
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let started = Instant::now();
        let mut conn = self.connection.clone();
        let result = with_deadline("redis get", self.deadline(), async {
            Ok::<_, GuardError>(conn.get::<_, Option<String>>(key).await?)
        })
        .await;
        backend_op!("get", "redis", key, result, started.elapsed().as_millis() as u64);
        result
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let started = Instant::now();
        let mut conn = self.connection.clone();
        let result = with_deadline("redis set", self.deadline(), async {
            match ttl {
                // SETEX rejects 0, so sub-second TTLs round up
                Some(ttl) => conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1)).await?,
                None => conn.set::<_, _, ()>(key, value).await?,
            }
            Ok::<_, GuardError>(())
        })
        .await;
        backend_op!("set", "redis", key, result, started.elapsed().as_millis() as u64);
        result
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let removed: i64 = with_deadline("redis del", self.deadline(), async {
            Ok::<_, GuardError>(conn.del::<_, i64>(key).await?)
        })
        .await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        with_deadline("redis exists", self.deadline(), async {
            Ok::<_, GuardError>(conn.exists::<_, bool>(key).await?)
        })
        .await
    }

    async fn admit(&self, key: &str, request: &WindowRequest) -> Result<bool> {
        let started = Instant::now();
        let mut conn = self.connection.clone();

        let mut invocation = self.script.prepare_invoke();
        invocation
            .key(key)
            .arg(request.now_millis)
            .arg(request.window_start_millis())
            .arg(request.capacity)
            .arg(request.window.as_secs().max(1))
            .arg(&request.member);

        let result = with_deadline("redis sliding window", self.deadline(), async {
            Ok::<_, GuardError>(invocation.invoke_async::<i64>(&mut conn).await?)
        })
        .await;
        backend_op!("admit", "redis", key, result, started.elapsed().as_millis() as u64);

        Ok(result? == 1)
    }
}

/// Redis that was unreachable at startup.
///
/// Each `ping` retries the connection, so the health monitor reconnects it once
/// the server comes up. Until then every other call fails fast as unavailable.
pub struct LazyRedisStorage {
    config: RedisConfig,
    storage: OnceCell<RedisStorage>,
}

impl fmt::Debug for LazyRedisStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyRedisStorage")
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl LazyRedisStorage {
    pub fn new(config: RedisConfig) -> Self {
        Self {
            config,
            storage: OnceCell::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.storage.initialized()
    }

    async fn connect(&self) -> Result<&RedisStorage> {
        self.storage
            .get_or_try_init(|| async {
                let storage = RedisStorage::connect(self.config.clone()).await?;
                info!("Connected to fast backend after startup");
                Ok::<_, GuardError>(storage)
            })
            .await
    }

    fn connected(&self) -> Result<&RedisStorage> {
        self.storage.get().ok_or_else(|| {
            GuardError::BackendUnavailable("Redis is not connected yet".to_string())
        })
    }
}

#[async_trait]
impl FastBackend for LazyRedisStorage {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn ping(&self) -> Result<()> {
        self.connect().await?.ping().await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.connected()?.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.connected()?.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.connected()?.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.connected()?.exists(key).await
    }

    async fn admit(&self, key: &str, request: &WindowRequest) -> Result<bool> {
        self.connected()?.admit(key, request).await
    }
}

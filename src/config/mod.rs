// src/config/mod.rs

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{GuardError, Result};

/// How the layer reacts to durable-store and startup failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeMode {
    /// Production: durable write failures surface, missing backends are fatal
    Strict,
    /// Development: every backend fault is logged and degraded
    #[default]
    Permissive,
}

impl RuntimeMode {
    pub fn is_strict(self) -> bool {
        matches!(self, RuntimeMode::Strict)
    }
}

impl FromStr for RuntimeMode {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" | "production" | "prod" => Ok(RuntimeMode::Strict),
            "permissive" | "development" | "dev" => Ok(RuntimeMode::Permissive),
            other => Err(GuardError::Misconfiguration(format!(
                "unknown GUARD_MODE '{}'",
                other
            ))),
        }
    }
}

/// Configuration for the Redis fast backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,

    /// Connection timeout
    #[serde(default = "default_conn_timeout", with = "duration_serde")]
    pub connection_timeout: Duration,

    /// Deadline for every individual command
    #[serde(default = "default_op_timeout", with = "duration_serde")]
    pub operation_timeout: Duration,
}

fn default_conn_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_op_timeout() -> Duration {
    Duration::from_millis(500)
}

/// Configuration for the relational durable backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres connection URL
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Deadline for acquiring a connection and for every query
    #[serde(default = "default_db_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

fn default_max_connections() -> u32 {
    10
}

fn default_db_timeout() -> Duration {
    Duration::from_secs(3)
}

/// Configuration for the fast backend health probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// How often to probe the fast backend
    #[serde(default = "default_check_interval", with = "duration_serde")]
    pub check_interval: Duration,
    /// Timeout for a single probe
    #[serde(default = "default_check_timeout", with = "duration_serde")]
    pub check_timeout: Duration,
}

fn default_check_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_check_timeout() -> Duration {
    Duration::from_secs(1)
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            check_timeout: default_check_timeout(),
        }
    }
}

/// Configuration for the fast-path circuit breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive in-flight failures before the circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u64,
    /// How long to stay open before letting a trial request through
    #[serde(default = "default_reset_timeout", with = "duration_serde")]
    pub reset_timeout: Duration,
    /// Successes in half-open state required to close the circuit
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u64,
}

fn default_failure_threshold() -> u64 {
    5
}

fn default_reset_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_success_threshold() -> u64 {
    3
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout: default_reset_timeout(),
            success_threshold: default_success_threshold(),
        }
    }
}

/// Configuration for the admission controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Key prefix used for sliding window logs in the fast backend
    #[serde(default = "default_rate_limit_prefix")]
    pub key_prefix: String,

    /// Identities that are always admitted and never recorded
    #[serde(default = "default_exempt")]
    pub exempt_identities: Vec<String>,

    /// Deadline for the admission script round trip
    #[serde(default = "default_op_timeout", with = "duration_serde")]
    pub operation_timeout: Duration,

    /// How often idle local buckets are evicted
    #[serde(default = "default_janitor_interval", with = "duration_serde")]
    pub janitor_interval: Duration,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

fn default_rate_limit_prefix() -> String {
    "ratelimit".to_string()
}

fn default_exempt() -> Vec<String> {
    vec![
        "127.0.0.1".to_string(),
        "::1".to_string(),
        "localhost".to_string(),
    ]
}

fn default_janitor_interval() -> Duration {
    Duration::from_secs(300)
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_rate_limit_prefix(),
            exempt_identities: default_exempt(),
            operation_timeout: default_op_timeout(),
            janitor_interval: default_janitor_interval(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Configuration for the refresh credential store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenStoreConfig {
    #[serde(default = "default_token_prefix")]
    pub key_prefix: String,

    /// Deadline for fast backend reads and writes
    #[serde(default = "default_op_timeout", with = "duration_serde")]
    pub operation_timeout: Duration,
}

fn default_token_prefix() -> String {
    "refresh_token".to_string()
}

impl Default for TokenStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_token_prefix(),
            operation_timeout: default_op_timeout(),
        }
    }
}

/// Top level configuration for the resilience layer
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub mode: RuntimeMode,

    /// Absent means no fast backend is configured
    #[serde(default)]
    pub redis: Option<RedisConfig>,

    /// Absent means an in-process repository (permissive mode only)
    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    #[serde(default)]
    pub health_check: HealthCheckConfig,

    #[serde(default)]
    pub rate_limiter: RateLimiterConfig,

    #[serde(default)]
    pub token_store: TokenStoreConfig,
}

impl AppConfig {
    /// Build the configuration from the process environment (and `.env`, if present).
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mode = match env::var("GUARD_MODE") {
            Ok(value) => value.parse()?,
            Err(_) => RuntimeMode::default(),
        };

        let backend_timeout = Duration::from_millis(env_number("BACKEND_TIMEOUT_MS", 500)?);

        let redis = non_empty_var("REDIS_URL").map(|url| RedisConfig {
            url,
            connection_timeout: default_conn_timeout(),
            operation_timeout: backend_timeout,
        });

        let database = non_empty_var("DATABASE_URL")
            .map(|url| -> Result<DatabaseConfig> {
                Ok(DatabaseConfig {
                    url,
                    max_connections: env_number("DATABASE_MAX_CONNECTIONS", 10)? as u32,
                    timeout: Duration::from_millis(env_number("DATABASE_TIMEOUT_MS", 3000)?),
                })
            })
            .transpose()?;

        let health_check = HealthCheckConfig {
            check_interval: Duration::from_secs(env_number("HEALTH_CHECK_INTERVAL_SECS", 60)?),
            check_timeout: Duration::from_millis(env_number("HEALTH_CHECK_TIMEOUT_MS", 1000)?),
        };

        let mut rate_limiter = RateLimiterConfig {
            operation_timeout: backend_timeout,
            ..RateLimiterConfig::default()
        };
        if let Some(prefix) = non_empty_var("RATE_LIMIT_KEY_PREFIX") {
            rate_limiter.key_prefix = prefix;
        }
        if let Ok(list) = env::var("RATE_LIMIT_EXEMPT") {
            rate_limiter.exempt_identities = parse_list(&list);
        }

        let mut token_store = TokenStoreConfig {
            operation_timeout: backend_timeout,
            ..TokenStoreConfig::default()
        };
        if let Some(prefix) = non_empty_var("TOKEN_KEY_PREFIX") {
            token_store.key_prefix = prefix;
        }

        Ok(Self {
            mode,
            redis,
            database,
            health_check,
            rate_limiter,
            token_store,
        })
    }

    /// Load the configuration from a JSON document.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| GuardError::Misconfiguration(format!("invalid config JSON: {}", e)))
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_number(name: &str, default: u64) -> Result<u64> {
    match non_empty_var(name) {
        Some(raw) => raw.parse::<u64>().map_err(|e| {
            GuardError::Misconfiguration(format!("{} must be an integer: {}", name, e))
        }),
        None => Ok(default),
    }
}

pub(crate) fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// Helper module to serialize/deserialize Duration with serde
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

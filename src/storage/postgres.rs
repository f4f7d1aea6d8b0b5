// src/storage/postgres.rs

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::fmt;
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::error::{GuardError, Result};
use crate::storage::{with_deadline, DurableBackend, UserRecord};

/// Postgres-backed user repository. Only touches `users.id` and `users.refresh_token`.
#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
    timeout: Duration,
}

impl fmt::Debug for PgUserRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgUserRepository")
            .field("pool_size", &self.pool.size())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl PgUserRepository {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.timeout)
            .connect(&config.url)
            .await?;

        Ok(Self::from_pool(pool, config.timeout))
    }

    pub fn from_pool(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }
}

/// A durable call that ran out of time is a durable failure, whatever stalled it
pub(crate) fn durable_deadline(err: GuardError) -> GuardError {
    match err {
        GuardError::BackendTimeout { operation, elapsed } => {
            GuardError::DurableFailure(format!("{} timed out after {:?}", operation, elapsed))
        }
        other => other,
    }
}

#[async_trait]
impl DurableBackend for PgUserRepository {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> Result<()> {
        with_deadline("postgres ping", self.timeout, async {
            sqlx::query("SELECT 1").execute(&self.pool).await?;
            Ok::<_, GuardError>(())
        })
        .await
        .map_err(durable_deadline)
    }

    async fn find_by_user_id(&self, user_id: i64) -> Result<Option<UserRecord>> {
        with_deadline("postgres find_by_user_id", self.timeout, async {
            let record = sqlx::query_as::<_, UserRecord>(
                "SELECT id, refresh_token FROM users WHERE id = $1",
            )
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok::<_, GuardError>(record)
        })
        .await
        .map_err(durable_deadline)
    }

    async fn save(&self, record: &UserRecord) -> Result<()> {
        let updated = with_deadline("postgres save", self.timeout, async {
            let result = sqlx::query("UPDATE users SET refresh_token = $2 WHERE id = $1")
                .bind(record.id)
                .bind(record.refresh_token.as_deref())
                .execute(&self.pool)
                .await?;
            Ok::<_, GuardError>(result.rows_affected())
        })
        .await
        .map_err(durable_deadline)?;

        if updated == 0 {
            tracing::error!(user_id = record.id, "No user row to save refresh token on");
            return Err(GuardError::DurableFailure(format!(
                "user {} not found",
                record.id
            )));
        }
        Ok(())
    }
}

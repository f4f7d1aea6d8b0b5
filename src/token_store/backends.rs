// src/token_store/backends.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{GuardError, Result};
use crate::storage::{with_deadline, DurableBackend, FastBackend, UserRecord};

/// The credential as it is cached in the fast backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub user_id: i64,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// One place refresh credentials can live.
#[async_trait]
pub trait CredentialBackend: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    async fn store(&self, record: &RefreshTokenRecord, ttl: Duration) -> Result<()>;

    async fn load(&self, user_id: i64) -> Result<Option<String>>;

    async fn remove(&self, user_id: i64) -> Result<()>;
}

/// Credentials cached in the fast backend with a TTL.
#[derive(Debug, Clone)]
pub struct FastCredentials {
    backend: Arc<dyn FastBackend>,
    key_prefix: String,
    timeout: Duration,
}

impl FastCredentials {
    pub fn new(backend: Arc<dyn FastBackend>, key_prefix: String, timeout: Duration) -> Self {
        Self {
            backend,
            key_prefix,
            timeout,
        }
    }

    pub fn key_for(&self, user_id: i64) -> String {
        format!("{}:{}", self.key_prefix, user_id)
    }

    pub async fn contains(&self, user_id: i64) -> Result<bool> {
        with_deadline(
            "token exists",
            self.timeout,
            self.backend.exists(&self.key_for(user_id)),
        )
        .await
    }
}

#[async_trait]
impl CredentialBackend for FastCredentials {
    fn name(&self) -> &'static str {
        self.backend.name()
    }

    async fn store(&self, record: &RefreshTokenRecord, ttl: Duration) -> Result<()> {
        let json = serde_json::to_string(record)?;
        with_deadline(
            "token set",
            self.timeout,
            self.backend
                .set(&self.key_for(record.user_id), &json, Some(ttl)),
        )
        .await
    }

    async fn load(&self, user_id: i64) -> Result<Option<String>> {
        let raw = with_deadline(
            "token get",
            self.timeout,
            self.backend.get(&self.key_for(user_id)),
        )
        .await?;

        match raw {
            Some(json) => {
                let record: RefreshTokenRecord = serde_json::from_str(&json)?;
                Ok(Some(record.token))
            }
            None => Ok(None),
        }
    }

    async fn remove(&self, user_id: i64) -> Result<()> {
        with_deadline(
            "token delete",
            self.timeout,
            self.backend.delete(&self.key_for(user_id)),
        )
        .await?;
        Ok(())
    }
}

/// Credentials persisted on the user's row. No expiry: the value stays until replaced or nulled.
#[derive(Debug, Clone)]
pub struct DurableCredentials {
    repository: Arc<dyn DurableBackend>,
}

impl DurableCredentials {
    pub fn new(repository: Arc<dyn DurableBackend>) -> Self {
        Self { repository }
    }

    async fn user(&self, user_id: i64) -> Result<Option<UserRecord>> {
        self.repository.find_by_user_id(user_id).await
    }
}

#[async_trait]
impl CredentialBackend for DurableCredentials {
    fn name(&self) -> &'static str {
        self.repository.name()
    }

    async fn store(&self, record: &RefreshTokenRecord, _ttl: Duration) -> Result<()> {
        let mut user = self
            .user(record.user_id)
            .await?
            .ok_or_else(|| GuardError::DurableFailure(format!("user {} not found", record.user_id)))?;

        user.refresh_token = Some(record.token.clone());
        self.repository.save(&user).await
    }

    async fn load(&self, user_id: i64) -> Result<Option<String>> {
        Ok(self.user(user_id).await?.and_then(|user| user.refresh_token))
    }

    async fn remove(&self, user_id: i64) -> Result<()> {
        match self.user(user_id).await? {
            Some(mut user) if user.refresh_token.is_some() => {
                user.refresh_token = None;
                self.repository.save(&user).await
            }
            _ => Ok(()),
        }
    }
}

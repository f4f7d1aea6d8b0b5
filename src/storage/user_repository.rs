// src/storage/user_repository.rs

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;
use crate::storage::DurableBackend;

/// The slice of the user entity the credential store reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserRecord {
    pub id: i64,
    pub refresh_token: Option<String>,
}

impl UserRecord {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            refresh_token: None,
        }
    }
}

/// Durable backend held in process memory. Used when no database is configured
/// in permissive mode, and in tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryUserRepository {
    users: Arc<DashMap<i64, UserRecord>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user row, as account creation would.
    pub fn insert_user(&self, id: i64) {
        self.users.entry(id).or_insert_with(|| UserRecord::new(id));
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl DurableBackend for MemoryUserRepository {
    fn name(&self) -> &'static str {
        "memory-repository"
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn find_by_user_id(&self, user_id: i64) -> Result<Option<UserRecord>> {
        Ok(self.users.get(&user_id).map(|r| r.clone()))
    }

    async fn save(&self, record: &UserRecord) -> Result<()> {
        self.users.insert(record.id, record.clone());
        Ok(())
    }
}

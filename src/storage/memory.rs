// src/storage/memory.rs

// In-process stand-in for the fast backend, used for development and tests.
// It mirrors the Redis semantics the layer relies on: TTL'd string values and
// sliding window logs that are trimmed and appended atomically per key.
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task;
use tokio::time;

use crate::clock::{duration_millis, Clock, SystemClock};
use crate::error::{GuardError, Result};
use crate::storage::{FastBackend, WindowRequest};

#[derive(Debug)]
enum MemoryValue {
    Text(String),
    /// Admission timestamps, oldest first
    Log(VecDeque<i64>),
}

/// Entry in the in-memory storage
#[derive(Debug)]
struct MemoryEntry {
    value: MemoryValue,
    expires_at: Option<i64>,
}

impl MemoryEntry {
    fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

#[derive(Debug, Clone)]
pub struct MemoryStorage {
    data: Arc<DashMap<String, MemoryEntry>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryStorage {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Remove every expired entry. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.data.len();
        self.data.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.data.len())
    }

    /// Run [`purge_expired`](Self::purge_expired) on a fixed interval.
    pub fn spawn_cleanup(&self, every: Duration) -> task::JoinHandle<()> {
        let storage = self.clone();
        task::spawn(async move {
            let mut interval = time::interval(every);
            loop {
                interval.tick().await;
                let purged = storage.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "Purged expired in-memory entries");
                }
            }
        })
    }

    /// Number of timestamps currently recorded for `key`, without trimming.
    pub fn log_len(&self, key: &str) -> usize {
        self.data
            .get(key)
            .map(|entry| match &entry.value {
                MemoryValue::Log(log) => log.len(),
                MemoryValue::Text(_) => 0,
            })
            .unwrap_or(0)
    }

    fn expiry_from(&self, ttl: Option<Duration>) -> Option<i64> {
        ttl.map(|ttl| self.clock.now_millis().saturating_add(duration_millis(ttl)))
    }
}

fn wrong_type(key: &str) -> GuardError {
    GuardError::BackendUnavailable(format!(
        "WRONGTYPE Operation against a key holding the wrong kind of value: {}",
        key
    ))
}

#[async_trait]
impl FastBackend for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now_millis();
        // remove_if avoids holding a read guard while taking the write lock
        if self
            .data
            .remove_if(key, |_, entry| entry.is_expired(now))
            .is_some()
        {
            return Ok(None);
        }

        match self.data.get(key) {
            Some(entry) => match &entry.value {
                MemoryValue::Text(text) => Ok(Some(text.clone())),
                MemoryValue::Log(_) => Err(wrong_type(key)),
            },
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.data.insert(
            key.to_string(),
            MemoryEntry {
                value: MemoryValue::Text(value.to_string()),
                expires_at: self.expiry_from(ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = self.clock.now_millis();
        Ok(self
            .data
            .remove(key)
            .map(|(_, entry)| !entry.is_expired(now))
            .unwrap_or(false))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let now = self.clock.now_millis();
        Ok(self
            .data
            .get(key)
            .map(|entry| !entry.is_expired(now))
            .unwrap_or(false))
    }

    async fn admit(&self, key: &str, request: &WindowRequest) -> Result<bool> {
        let now = self.clock.now_millis();
        let window_start = request.window_start_millis();

        // The entry guard holds the shard lock, which makes trim+count+append atomic per key.
        let mut entry = self
            .data
            .entry(key.to_string())
            .or_insert_with(|| MemoryEntry {
                value: MemoryValue::Log(VecDeque::new()),
                expires_at: None,
            });

        if entry.is_expired(now) {
            entry.value = MemoryValue::Log(VecDeque::new());
            entry.expires_at = None;
        }

        let log = match &mut entry.value {
            MemoryValue::Log(log) => log,
            MemoryValue::Text(_) => return Err(wrong_type(key)),
        };

        while matches!(log.front(), Some(&ts) if ts <= window_start) {
            log.pop_front();
        }

        if (log.len() as u64) < request.capacity {
            log.push_back(request.now_millis);
            let ttl = Duration::from_secs(request.window.as_secs().max(1));
            entry.expires_at = Some(now.saturating_add(duration_millis(ttl)));
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

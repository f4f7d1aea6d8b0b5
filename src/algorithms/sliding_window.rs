// src/algorithms/sliding_window.rs

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::Result;
use crate::storage::{FastBackend, WindowRequest};

/// Sliding window log kept in the fast backend.
///
/// Every admission is recorded as one timestamp under the identity's key. A request is
/// admitted when fewer than `capacity` timestamps fall inside the trailing window. The
/// trim/count/record sequence runs as one atomic backend operation, so concurrent requests
/// for the same identity can't all observe spare capacity.
#[derive(Debug, Clone)]
pub struct SlidingWindowLog {
    backend: Arc<dyn FastBackend>,
    key_prefix: String,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLog {
    pub fn new(backend: Arc<dyn FastBackend>, key_prefix: String, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            key_prefix,
            clock,
        }
    }

    pub fn key_for(&self, identity: &str) -> String {
        format!("{}:{}", self.key_prefix, identity)
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub async fn try_admit(&self, identity: &str, capacity: u64, window: Duration) -> Result<bool> {
        let now_millis = self.clock.now_millis();
        let request = WindowRequest {
            now_millis,
            window,
            capacity,
            member: format!("{}-{}", now_millis, Uuid::new_v4()),
        };

        self.backend.admit(&self.key_for(identity), &request).await
    }

    /// Drop the whole log for `identity`
    pub async fn clear(&self, identity: &str) -> Result<bool> {
        self.backend.delete(&self.key_for(identity)).await
    }
}

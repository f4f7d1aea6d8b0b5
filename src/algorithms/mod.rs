// src/algorithms/mod.rs

pub mod sliding_window;
pub mod token_bucket;

#[cfg(test)]
mod tests;

pub use sliding_window::SlidingWindowLog;
pub use token_bucket::{LocalBucket, LocalBuckets};

/// Which path produced an admission decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionPath {
    /// Identity is on the exemption list
    Exempt,
    /// Sliding window log in the fast backend
    FastPath,
    /// Local token bucket
    Fallback,
    /// Fast backend failed mid-call and the request was let through
    FailOpen,
}

impl DecisionPath {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionPath::Exempt => "exempt",
            DecisionPath::FastPath => "fast",
            DecisionPath::Fallback => "fallback",
            DecisionPath::FailOpen => "fail_open",
        }
    }
}

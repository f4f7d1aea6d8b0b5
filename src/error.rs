// for error definitions
use std::time::Duration;
use thiserror::Error;

/// Coarse classification of a failure, used by callers to pick a recovery path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Fast backend not configured, not reachable, or rejected the command
    Unavailable,
    /// An in-flight call exceeded its deadline
    Timeout,
    /// The system of record failed to read or write
    DurableFailure,
    /// Strict mode could not start with the given configuration
    Misconfiguration,
    /// A cached record could not be encoded or decoded
    Codec,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::DurableFailure => "durable_failure",
            ErrorKind::Misconfiguration => "misconfiguration",
            ErrorKind::Codec => "codec",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum GuardError {
    /// The fast backend is absent or refused the operation
    #[error("Fast backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A backend call did not complete in time
    #[error("{operation} timed out after {elapsed:?}")]
    BackendTimeout {
        operation: &'static str,
        elapsed: Duration,
    },

    /// Errors from the durable (relational) store
    #[error("Durable backend failure: {0}")]
    DurableFailure(String),

    /// Startup configuration errors
    #[error("Startup misconfiguration: {0}")]
    Misconfiguration(String),

    /// Data serialization/deserialization errors
    #[error("Data serialization error: {0}")]
    Codec(String),
}

impl GuardError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GuardError::BackendUnavailable(_) => ErrorKind::Unavailable,
            GuardError::BackendTimeout { .. } => ErrorKind::Timeout,
            GuardError::DurableFailure(_) => ErrorKind::DurableFailure,
            GuardError::Misconfiguration(_) => ErrorKind::Misconfiguration,
            GuardError::Codec(_) => ErrorKind::Codec,
        }
    }

    pub fn timeout(operation: &'static str, elapsed: Duration) -> Self {
        GuardError::BackendTimeout { operation, elapsed }
    }
}

impl From<redis::RedisError> for GuardError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            GuardError::BackendTimeout {
                operation: "redis",
                elapsed: Duration::ZERO,
            }
        } else {
            // connection, auth and command failures all mean "don't trust redis right now"
            GuardError::BackendUnavailable(err.to_string())
        }
    }
}

impl From<sqlx::Error> for GuardError {
    fn from(err: sqlx::Error) -> Self {
        GuardError::DurableFailure(err.to_string())
    }
}

impl From<serde_json::Error> for GuardError {
    fn from(err: serde_json::Error) -> Self {
        GuardError::Codec(err.to_string())
    }
}

// define a Result type alias for convenience
pub type Result<T> = std::result::Result<T, GuardError>;

use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Ensure initialization happens only once
static INIT: Once = Once::new();

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the logging system with sensible defaults.
///
/// Log level can be set using the RUST_LOG environment variable.
/// Example: RUST_LOG=debug,approval_guard=trace
pub fn init() {
    INIT.call_once(|| {
        tracing_subscriber::registry()
            .with(default_filter())
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true) // Useful for debugging concurrency issues
                    .with_line_number(true),
            )
            .init();

        tracing::info!("Logging initialized");
    });
}

/// Same as [`init`] but emits one JSON object per line, for log shipping in production.
pub fn init_json() {
    INIT.call_once(|| {
        tracing_subscriber::registry()
            .with(default_filter())
            .with(fmt::layer().json().with_current_span(false))
            .init();

        tracing::info!("JSON logging initialized");
    });
}

/// Macro for logging admission decisions
#[macro_export]
macro_rules! rate_limit_event {
    ($identity:expr, $admitted:expr, $capacity:expr, $window:expr, $path:expr) => {
        tracing::debug!(
            identity = $identity,
            admitted = $admitted,
            capacity = $capacity,
            window_seconds = $window,
            path = $path,
            "Rate limit check"
        )
    };
}

/// Macro for logging backend operations with timing
#[macro_export]
macro_rules! backend_op {
    ($operation:expr, $backend:expr, $key:expr, $result:expr, $elapsed_ms:expr) => {
        tracing::trace!(
            operation = $operation,
            backend = $backend,
            key = $key,
            success = $result.is_ok(),
            elapsed_ms = $elapsed_ms,
            "Backend operation"
        )
    };
}

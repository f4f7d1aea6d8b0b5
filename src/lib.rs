// library entry
pub mod algorithms;
pub mod clock;
pub mod config;
pub mod error;
pub mod layer;
pub mod logging;
pub mod rate_limiter;
pub mod resilience;
pub mod storage;
pub mod token_store;

#[cfg(test)]
pub(crate) mod test_utils;

#[cfg(test)]
mod tests;

// Re-export key components for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, RuntimeMode};
pub use error::{ErrorKind, GuardError, Result};
pub use layer::{BackgroundTasks, ResilienceLayer};
pub use logging::init as init_logging;
pub use rate_limiter::{RateLimiter, RateLimiterStats};
pub use resilience::{HealthMonitor, HealthStatus};
pub use token_store::TokenStore;

// src/resilience/mod.rs
//! Backend health tracking for the fast path.
//!
//! 1. **Health Monitor** - a single background task pings the fast backend on a fixed
//!    schedule and publishes the result through atomics
//! 2. **Circuit Breaking** - stops sending admission traffic to a fast backend that keeps
//!    failing between probes

mod circuit_breaker;
mod health_monitor;

#[cfg(test)]
mod tests;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use health_monitor::{HealthMonitor, HealthStatus, ProbeOutcome};

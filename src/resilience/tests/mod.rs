// src/resilience/tests/mod.rs
//! Tests for health monitoring and circuit breaking

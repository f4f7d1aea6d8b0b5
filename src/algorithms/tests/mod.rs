// src/algorithms/tests/mod.rs

/// Tests for the local token bucket fallback
mod token_bucket_tests;

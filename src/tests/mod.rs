// src/tests/mod.rs
//! Cross-component tests for the assembled layer

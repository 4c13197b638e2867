//! Integration test suite for xdeps
//!
//! End-to-end tests for the `xdeps` binary and the library pipeline. Every
//! test builds its templates in a temporary directory.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **cli**: Binary invocation, JSON-lines output and failure reporting
//! - **engine**: Batch driver, sandbox guarantees and determinism through
//!   the library API
//! - **templates**: Realistic template idioms evaluated end to end

mod cli;
mod engine;
mod templates;

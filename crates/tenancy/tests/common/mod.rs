//! Test infrastructure for the tenancy crate.
//!
//! Provides a fault-injecting storage engine and router fixtures shared by
//! the integration tests.

#![allow(dead_code)]

pub mod engine;
pub mod fixtures;

// Re-export commonly used items
pub use engine::*;
pub use fixtures::*;

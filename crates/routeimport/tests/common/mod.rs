//! Shared test utilities for routeimport integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated runs with a temp blob store and database
//! - Builders for import rows and the sheets that carry them

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;

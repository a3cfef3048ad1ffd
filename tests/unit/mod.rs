// Test code is allowed to panic on failure
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

//! Unit tests for the pgcluster operator
//!
//! Covers the pure, public surface:
//! - CRD field names as stored on the platform
//! - Configuration parsing
//! - Patch-path conversion
//! - Validation
//! - Resource builders
//! - Strategy registry

#[path = "../common/mod.rs"]
mod common;

mod config;
mod crd;
mod registry;
mod resources;
mod validation;

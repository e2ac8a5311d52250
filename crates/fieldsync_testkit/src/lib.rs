//! # FieldSync Testkit
//!
//! Test utilities for FieldSync.
//!
//! This crate provides:
//! - A sync harness wiring a table, a mock remote and an orchestrator
//! - Survey-domain fixtures
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fieldsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn pushes_new_records() {
//!     let harness = SyncHarness::<Phrase>::memory();
//!     harness.table.add("p-1", phrase("Slipped tiles")).unwrap();
//!     harness.sync().await.unwrap();
//!     assert!(harness.remote.remote("p-1").is_some());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use fieldsync_core::models::{Component, Element, Location, Phrase, Section, Survey};
}

pub use fixtures::*;
pub use generators::*;

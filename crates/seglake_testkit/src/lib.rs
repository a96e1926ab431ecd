//! # seglake Testkit
//!
//! Test utilities for seglake.
//!
//! This crate provides:
//! - Partition fixtures and scenario builders
//! - Property-based test generators using proptest
//! - Fault-injecting directories
//! - Cross-crate integration test helpers
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust,ignore
//! use seglake_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_partition() {
//!     with_temp_partition(scenarios::catalog_schema(), |partition| {
//!         let segment = partition.build_segment(&scenarios::numbered_docs("t", 0..3));
//!         partition.commit(&[segment.id]);
//!         // ... test operations
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faulty;
pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faulty::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
}

pub use faulty::*;
pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;

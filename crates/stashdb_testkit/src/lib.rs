//! # stashdb testkit
//!
//! Test utilities for stashdb.
//!
//! This crate provides:
//! - Fixtures: the [`Bean`] sample type with its identifier and codec,
//!   stores, backends and temporary crash-dump directories
//! - Property-based generators using proptest
//! - Helpers for asserting on background threads and listener events
//!
//! ## Usage
//!
//! ```rust
//! use stashdb_testkit::prelude::*;
//!
//! let store = bean_store();
//! store.store(bean("b1", "arabica", 3)).unwrap();
//! assert_eq!(store.get("b1").unwrap().grams, 3);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;

//! # BerryDB Testkit
//!
//! Test utilities for BerryDB.
//!
//! This crate provides:
//! - Test fixtures: in-memory and temporary-directory environments
//! - Property-based test generators using proptest
//! - A model-checked harness for secondary index consistency
//! - Crash recovery helpers that damage and reopen log files
//! - Concurrent stress runs for lock conflicts and bounded retry
//! - End-to-end scenarios (duplicates, students by last name, joins)
//!
//! ## Usage
//!
//! ```rust
//! use berrydb_testkit::prelude::*;
//! use berrydb_core::{PutFlags, StoreConfig};
//!
//! with_temp_env(|env| {
//!     let store = env.open_store("test", StoreConfig::btree()).unwrap();
//!     store.put(None, b"k", b"v", PutFlags::Replace).unwrap();
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod scenarios;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::scenarios::*;
    pub use crate::stress::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use scenarios::*;
pub use stress::*;

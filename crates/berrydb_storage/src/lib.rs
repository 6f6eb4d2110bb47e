//! # BerryDB Storage
//!
//! Byte-store backends and named file sets for BerryDB.
//!
//! This crate is the lowest layer of BerryDB. Backends are **opaque byte
//! stores**: they append, read, flush and truncate bytes without knowing
//! anything about log records or checkpoint images. File sets group named
//! backends the way an environment home directory groups its files.
//!
//! ## Available Backends
//!
//! - [`MemoryBackend`] - Shared buffers for in-memory environments and tests
//! - [`FileBackend`] - One file of a directory environment
//!
//! ## Available File Sets
//!
//! - [`MemoryFileSet`] - Named in-memory buffers
//! - [`DirectoryFileSet`] - Files inside one directory
//!
//! ## Example
//!
//! ```rust
//! use berrydb_storage::{FileSet, MemoryFileSet, StorageBackend};
//!
//! let files = MemoryFileSet::new();
//! let mut log = files.open("log.0000000001").unwrap();
//! let offset = log.append(b"hello world").unwrap();
//! assert_eq!(log.read_at(offset, 5).unwrap(), b"hello");
//! assert_eq!(files.list().unwrap(), vec!["log.0000000001".to_string()]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod fileset;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use fileset::{DirectoryFileSet, FileSet, MemoryFileSet};
pub use memory::MemoryBackend;

//! # BerryDB Core
//!
//! Transactional record stores for BerryDB.
//!
//! This crate provides:
//! - Record stores (B-tree, hash and record-number access) with duplicate keys
//! - Cursors with positional reads, writes and bulk retrieval
//! - Secondary indexes kept consistent with their primary inside transactions
//! - Equality joins over secondary indexes
//! - Nested transactions with strict two-phase locking, deadlock detection and
//!   bounded retry
//! - A write-ahead log with checkpoints, log archival and crash recovery
//! - Background checkpoint and log reclamation threads
//!
//! ## Example
//!
//! ```rust
//! use berrydb_core::{
//!     CursorOp, Duplicates, EnvConfig, Environment, Extracted, JoinFlags, PutFlags, StoreConfig,
//! };
//! use std::sync::Arc;
//!
//! let env = Environment::open_in_memory(EnvConfig::default())?;
//! let students = env.open_store("students", StoreConfig::btree())?;
//! let by_lastname = env.open_store(
//!     "lastname",
//!     StoreConfig::btree().duplicates(Duplicates::Sorted),
//! )?;
//! env.associate(
//!     &students,
//!     &by_lastname,
//!     Arc::new(|_key: &[u8], value: &[u8]| match value.split(|b| *b == b' ').nth(1) {
//!         Some(last) => Extracted::Key(last.to_vec()),
//!         None => Extracted::Skip,
//!     }),
//! )?;
//!
//! env.with_retry(|txn| students.put(Some(txn), b"WC42", b"Winston Churchill", PutFlags::Replace))?;
//!
//! let txn = env.begin(None)?;
//! let mut cursor = by_lastname.cursor(Some(&txn))?;
//! let (_, pkey, value) = cursor
//!     .get_with_primary(CursorOp::Set(b"Churchill"))?
//!     .expect("indexed");
//! assert_eq!(pkey, b"WC42");
//! assert_eq!(value, b"Winston Churchill");
//!
//! let join = students.join(vec![cursor], JoinFlags::new())?;
//! for cursor in join.close() {
//!     cursor.close()?;
//! }
//! txn.commit()?;
//! # Ok::<(), berrydb_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod checkpoint;
mod codec;
mod config;
mod dir;
mod env;
mod error;
mod join;
mod lock;
pub mod log;
mod maintenance;
mod manifest;
mod secondary;
mod stats;
mod store;
mod transaction;
mod types;

pub use checkpoint::{ArchiveMode, CheckpointInfo, CheckpointOptions};
pub use codec::compute_crc32;
pub use config::{AccessMethod, Comparator, Duplicates, EnvConfig, MaintenanceConfig, StoreConfig};
pub use env::Environment;
pub use error::{first_error, ConflictReason, CoreError, CoreResult, ErrorKind};
pub use join::{JoinCursor, JoinFlags, JoinState};
pub use maintenance::{
    CheckpointTask, LogReclaimTask, MaintenanceHandle, MaintenanceScheduler, PeriodicTask,
    TaskExit,
};
pub use secondary::{Extracted, Extractor};
pub use stats::{EnvStats, StatsSnapshot};
pub use store::{BulkBatch, BulkDirection, BulkIter, Cursor, CursorOp, PutFlags, Store};
pub use transaction::{RetryPolicy, Transaction, TransactionState};
pub use types::{key_recno, recno_key, Lsn, RecordNumber, SequenceNumber, StoreId, TransactionId};

//! Write-ahead log.
//!
//! The log is a sequence of numbered files (`log.0000000001`, ...). Each file
//! holds CRC-framed records:
//!
//! ```text
//! | magic "BLOG" (4) | version (2) | type (1) | len (4) | payload | crc32 (4) |
//! ```
//!
//! A transaction's changes are appended as `Put`/`Delete` records followed by
//! one `Commit`, in a single write. Recovery applies a transaction only when
//! its `Commit` record is present.

mod reader;
mod record;
mod writer;

pub use reader::LogFileReader;
pub use record::{LogRecord, LogRecordType, LOG_MAGIC, LOG_VERSION};
pub use writer::{list_log_files, log_file_name, parse_log_file_name, LogManager};

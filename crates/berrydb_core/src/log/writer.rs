//! Segmented log writer.

use crate::error::CoreResult;
use crate::log::record::LogRecord;
use crate::types::Lsn;
use berrydb_storage::{FileSet, StorageBackend};
use std::fmt;
use std::sync::Arc;

const FILE_PREFIX: &str = "log.";

/// Returns the file name of log file `number`.
#[must_use]
pub fn log_file_name(number: u32) -> String {
    format!("{FILE_PREFIX}{number:010}")
}

/// Parses a log file name back into its number.
#[must_use]
pub fn parse_log_file_name(name: &str) -> Option<u32> {
    let digits = name.strip_prefix(FILE_PREFIX)?;
    if digits.len() != 10 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Lists the numbers of all log files in ascending order.
pub fn list_log_files(files: &dyn FileSet) -> CoreResult<Vec<u32>> {
    let mut numbers: Vec<u32> = files
        .list()?
        .iter()
        .filter_map(|name| parse_log_file_name(name))
        .collect();
    numbers.sort_unstable();
    Ok(numbers)
}

/// Appends records to the current log file and switches to a new file on
/// checkpoint or when the current one grows past its size limit.
///
/// The writer is not internally synchronized; the transaction manager keeps
/// it behind the mutex that also serializes commit application.
pub struct LogManager {
    files: Arc<dyn FileSet>,
    current: u32,
    backend: Box<dyn StorageBackend>,
    max_file_size: u64,
    bytes_since_checkpoint: u64,
}

impl LogManager {
    /// Opens log file `current` for appending, creating it if missing.
    pub fn open(files: Arc<dyn FileSet>, current: u32, max_file_size: u64) -> CoreResult<Self> {
        let backend = files.open(&log_file_name(current))?;
        Ok(Self {
            files,
            current,
            backend,
            max_file_size,
            bytes_since_checkpoint: 0,
        })
    }

    /// Number of the file currently appended to.
    #[must_use]
    pub fn current_file(&self) -> u32 {
        self.current
    }

    /// Position the next record will be written at.
    pub fn position(&self) -> CoreResult<Lsn> {
        Ok(Lsn::new(self.current, self.backend.size()?))
    }

    /// Bytes appended since the last checkpoint (or since open).
    #[must_use]
    pub fn bytes_since_checkpoint(&self) -> u64 {
        self.bytes_since_checkpoint
    }

    /// Counts bytes replayed during recovery as logged since the checkpoint.
    pub(crate) fn add_recovered_bytes(&mut self, bytes: u64) {
        self.bytes_since_checkpoint += bytes;
    }

    /// Appends records as one contiguous write.
    ///
    /// Returns the position of the first record.
    pub fn append_all(&mut self, records: &[LogRecord]) -> CoreResult<Lsn> {
        let mut data = Vec::new();
        for record in records {
            data.extend(record.encode()?);
        }
        let offset = self.backend.append(&data)?;
        self.bytes_since_checkpoint += data.len() as u64;
        Ok(Lsn::new(self.current, offset))
    }

    /// Flushes appended records, syncing them to durable storage if asked.
    pub fn flush(&mut self, sync: bool) -> CoreResult<()> {
        self.backend.flush()?;
        if sync {
            self.backend.sync()?;
        }
        Ok(())
    }

    /// Syncs the current file and starts the next one.
    ///
    /// Returns the new file number.
    pub fn rotate(&mut self) -> CoreResult<u32> {
        self.flush(true)?;
        let next = self.current + 1;
        self.backend = self.files.open(&log_file_name(next))?;
        self.current = next;
        tracing::debug!(file = next, "switched to new log file");
        Ok(next)
    }

    /// Rotates if the current file has reached its size limit.
    pub fn rotate_if_full(&mut self) -> CoreResult<bool> {
        if self.backend.size()? >= self.max_file_size {
            self.rotate()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Resets the byte counter after a checkpoint.
    pub(crate) fn mark_checkpoint(&mut self) {
        self.bytes_since_checkpoint = 0;
    }
}

impl fmt::Debug for LogManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogManager")
            .field("current", &self.current)
            .field("max_file_size", &self.max_file_size)
            .field("bytes_since_checkpoint", &self.bytes_since_checkpoint)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::reader::LogFileReader;
    use crate::types::{SequenceNumber, TransactionId};
    use berrydb_storage::MemoryFileSet;

    fn commit(txid: u64) -> LogRecord {
        LogRecord::Commit {
            txid: TransactionId::new(txid),
            sequence: SequenceNumber::new(txid),
        }
    }

    #[test]
    fn file_names_roundtrip() {
        assert_eq!(log_file_name(1), "log.0000000001");
        assert_eq!(parse_log_file_name("log.0000000042"), Some(42));
        assert_eq!(parse_log_file_name("log.42"), None);
        assert_eq!(parse_log_file_name("MANIFEST"), None);
    }

    #[test]
    fn append_then_read_back() {
        let files: Arc<dyn FileSet> = Arc::new(MemoryFileSet::new());
        let mut log = LogManager::open(Arc::clone(&files), 1, 1 << 20).unwrap();
        let lsn = log.append_all(&[commit(1), commit(2)]).unwrap();
        assert_eq!(lsn, Lsn::new(1, 0));
        log.flush(false).unwrap();

        let data = files.read(&log_file_name(1)).unwrap().unwrap();
        let records: Vec<_> = LogFileReader::new(&data)
            .map(|r| r.map(|(_, record)| record))
            .collect::<CoreResult<_>>()
            .unwrap();
        assert_eq!(records, vec![commit(1), commit(2)]);
        assert_eq!(log.bytes_since_checkpoint(), data.len() as u64);
    }

    #[test]
    fn rotates_when_full() {
        let files: Arc<dyn FileSet> = Arc::new(MemoryFileSet::new());
        let mut log = LogManager::open(Arc::clone(&files), 1, 16).unwrap();
        log.append_all(&[commit(1)]).unwrap();
        assert!(log.rotate_if_full().unwrap());
        assert_eq!(log.current_file(), 2);
        assert!(!log.rotate_if_full().unwrap());
        assert_eq!(list_log_files(files.as_ref()).unwrap(), vec![1, 2]);
    }
}

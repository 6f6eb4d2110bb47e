//! Byte store held in memory.

use crate::backend::{check_range, check_truncate, StorageBackend};
use crate::error::StorageResult;
use parking_lot::RwLock;
use std::sync::Arc;

/// Buffer shared by every handle on one in-memory file.
pub(crate) type SharedBuffer = Arc<RwLock<Vec<u8>>>;

/// A handle on an in-memory file.
///
/// Clones share the buffer. [`crate::MemoryFileSet`] hands out a new handle
/// over the same buffer each time a name is opened, so a log file written
/// through one handle is readable through the next. `flush` and `sync` do
/// nothing.
///
/// # Example
///
/// ```rust
/// use berrydb_storage::{MemoryBackend, StorageBackend};
///
/// let mut log = MemoryBackend::new();
/// let reader = log.clone();
/// log.append(b"put").unwrap();
/// assert_eq!(log.append(b"commit").unwrap(), 3);
/// assert_eq!(reader.read_all().unwrap(), b"putcommit");
/// ```
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    buf: SharedBuffer,
}

impl MemoryBackend {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a buffer holding `bytes`, e.g. a hand-crafted log tail.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            buf: Arc::new(RwLock::new(bytes)),
        }
    }

    pub(crate) fn shared(buf: SharedBuffer) -> Self {
        Self { buf }
    }

    /// Copies out the current content.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.buf.read().clone()
    }
}

impl StorageBackend for MemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let buf = self.buf.read();
        check_range(offset, len, buf.len() as u64)?;
        let start = offset as usize;
        Ok(buf[start..start + len].to_vec())
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        let mut buf = self.buf.write();
        let offset = buf.len() as u64;
        buf.extend_from_slice(bytes);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.buf.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut buf = self.buf.write();
        check_truncate(new_size, buf.len() as u64)?;
        buf.truncate(new_size as usize);
        Ok(())
    }
}

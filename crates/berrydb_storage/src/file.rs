//! File-backed byte store.

use crate::backend::{check_range, check_truncate, StorageBackend};
use crate::error::StorageResult;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug)]
struct FileState {
    file: File,
    len: u64,
    /// Bytes appended or cut since the last `sync`.
    unsynced: bool,
}

/// One file of a directory environment, such as a log file.
///
/// The length is tracked in memory so appends and bounds checks never stat
/// the file. `sync` is skipped when nothing changed since the previous one,
/// which keeps back-to-back commits with `sync_on_commit` cheap.
///
/// # Example
///
/// ```no_run
/// use berrydb_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut log = FileBackend::open(Path::new("log.0000000001")).unwrap();
/// log.append(b"commit record").unwrap();
/// log.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    state: Mutex<FileState>,
}

impl FileBackend {
    /// Opens `path` for reading and appending, creating it if missing.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(FileState {
                file,
                len,
                unsynced: false,
            }),
        })
    }

    /// Returns the path of the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut state = self.state.lock();
        check_range(offset, len, state.len)?;
        let mut buf = vec![0u8; len];
        if len > 0 {
            state.file.seek(SeekFrom::Start(offset))?;
            state.file.read_exact(&mut buf)?;
        }
        Ok(buf)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let state = self.state.get_mut();
        let offset = state.len;
        if !data.is_empty() {
            state.file.write_all(data)?;
            state.len += data.len() as u64;
            state.unsynced = true;
        }
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.state.get_mut().file.flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.state.lock().len)
    }

    fn sync(&mut self) -> StorageResult<()> {
        let state = self.state.get_mut();
        if state.unsynced {
            state.file.sync_data()?;
            state.unsynced = false;
        }
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let state = self.state.get_mut();
        check_truncate(new_size, state.len)?;
        if new_size < state.len {
            state.file.set_len(new_size)?;
            state.file.sync_all()?;
            state.len = new_size;
            state.unsynced = false;
        }
        Ok(())
    }
}

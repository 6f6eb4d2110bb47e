//! Named file sets.
//!
//! An environment keeps several files side by side: numbered log files, the
//! checkpoint image, the catalog. A [`FileSet`] names those files and hands
//! out [`StorageBackend`]s over them, so the engine does not care whether the
//! environment lives in a directory or in memory.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::file::FileBackend;
use crate::memory::{MemoryBackend, SharedBuffer};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A flat namespace of files.
///
/// Names are plain file names without separators. Implementations must be
/// `Send + Sync`; the log writer and the maintenance threads share one set.
pub trait FileSet: Send + Sync + fmt::Debug {
    /// Opens the named file for appending, creating it if missing.
    fn open(&self, name: &str) -> StorageResult<Box<dyn StorageBackend>>;

    /// Returns whether the named file exists.
    fn exists(&self, name: &str) -> bool;

    /// Reads the whole named file, or `None` if it does not exist.
    fn read(&self, name: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Replaces the content of the named file atomically.
    ///
    /// Readers observe either the old or the new content, never a mix.
    fn write_atomic(&self, name: &str, data: &[u8]) -> StorageResult<()>;

    /// Removes the named file.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::FileNotFound`] if the file does not exist.
    fn remove(&self, name: &str) -> StorageResult<()>;

    /// Lists all file names in ascending order.
    fn list(&self) -> StorageResult<Vec<String>>;

    /// Returns the path a caller would use to refer to the named file.
    fn path(&self, name: &str) -> PathBuf;
}

fn validate_name(name: &str) -> StorageResult<()> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name == "." || name == ".."
    {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// File set backed by named in-memory buffers.
///
/// Paths are the bare file names since there is no directory behind them.
#[derive(Debug, Default, Clone)]
pub struct MemoryFileSet {
    files: Arc<RwLock<BTreeMap<String, SharedBuffer>>>,
}

impl MemoryFileSet {
    /// Creates an empty file set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl FileSet for MemoryFileSet {
    fn open(&self, name: &str) -> StorageResult<Box<dyn StorageBackend>> {
        validate_name(name)?;
        let buffer = Arc::clone(self.files.write().entry(name.to_string()).or_default());
        Ok(Box::new(MemoryBackend::shared(buffer)))
    }

    fn exists(&self, name: &str) -> bool {
        self.files.read().contains_key(name)
    }

    fn read(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.files.read().get(name).map(|buf| buf.read().clone()))
    }

    fn write_atomic(&self, name: &str, data: &[u8]) -> StorageResult<()> {
        validate_name(name)?;
        let buffer = Arc::new(RwLock::new(data.to_vec()));
        self.files.write().insert(name.to_string(), buffer);
        Ok(())
    }

    fn remove(&self, name: &str) -> StorageResult<()> {
        match self.files.write().remove(name) {
            Some(_) => Ok(()),
            None => Err(StorageError::FileNotFound(name.to_string())),
        }
    }

    fn list(&self) -> StorageResult<Vec<String>> {
        Ok(self.files.read().keys().cloned().collect())
    }

    fn path(&self, name: &str) -> PathBuf {
        PathBuf::from(name)
    }
}

/// File set backed by the files of one directory.
#[derive(Debug, Clone)]
pub struct DirectoryFileSet {
    root: PathBuf,
}

impl DirectoryFileSet {
    /// Creates a file set over an existing directory.
    ///
    /// The path is canonicalized so that [`FileSet::path`] yields absolute
    /// paths.
    pub fn new(root: &Path) -> StorageResult<Self> {
        let root = fs::canonicalize(root)?;
        if !root.is_dir() {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a directory: {}", root.display()),
            )));
        }
        Ok(Self { root })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn sync_directory(&self) -> StorageResult<()> {
        // Directory fsync is not available on every platform.
        #[cfg(unix)]
        File::open(&self.root)?.sync_all()?;
        Ok(())
    }
}

impl FileSet for DirectoryFileSet {
    fn open(&self, name: &str) -> StorageResult<Box<dyn StorageBackend>> {
        validate_name(name)?;
        Ok(Box::new(FileBackend::open(&self.root.join(name))?))
    }

    fn exists(&self, name: &str) -> bool {
        validate_name(name).is_ok() && self.root.join(name).is_file()
    }

    fn read(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_name(name)?;
        match fs::read(self.root.join(name)) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn write_atomic(&self, name: &str, data: &[u8]) -> StorageResult<()> {
        validate_name(name)?;
        let target = self.root.join(name);
        let temp = self.root.join(format!("{name}.tmp"));

        let mut file = File::create(&temp)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp, &target)?;
        self.sync_directory()
    }

    fn remove(&self, name: &str) -> StorageResult<()> {
        validate_name(name)?;
        match fs::remove_file(self.root.join(name)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::FileNotFound(name.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn list(&self) -> StorageResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

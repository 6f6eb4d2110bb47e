//! Environment home management.
//!
//! A directory-backed environment lays out its files like this:
//!
//! ```text
//! <home>/
//! ├─ LOCK              # Advisory lock for single-process access
//! ├─ MANIFEST          # Store catalog
//! ├─ CHECKPOINT        # Latest checkpoint image
//! ├─ log.0000000001    # Log files
//! └─ log.0000000002
//! ```
//!
//! In-memory environments keep the same files in a [`MemoryFileSet`].

use crate::checkpoint::CheckpointImage;
use crate::error::{CoreError, CoreResult};
use crate::manifest::Manifest;
use berrydb_storage::{DirectoryFileSet, FileSet, MemoryFileSet};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const LOCK_FILE: &str = "LOCK";
const MANIFEST_FILE: &str = "MANIFEST";
const CHECKPOINT_FILE: &str = "CHECKPOINT";

/// The files of one environment plus, for directories, the held lock.
#[derive(Debug)]
pub struct EnvHome {
    files: Arc<dyn FileSet>,
    root: Option<PathBuf>,
    _lock_file: Option<File>,
}

impl EnvHome {
    /// Opens a home directory, taking its exclusive lock.
    ///
    /// # Errors
    ///
    /// - `InvalidFormat` if the directory is missing and `create_if_missing`
    ///   is false, or if the path is not a directory
    /// - `EnvironmentLocked` if another process holds the lock
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "environment directory does not exist: {}",
                    path.display()
                )));
            }
        }
        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::EnvironmentLocked);
        }

        let files = DirectoryFileSet::new(path)?;
        let root = files.root().to_path_buf();
        Ok(Self {
            files: Arc::new(files),
            root: Some(root),
            _lock_file: Some(lock_file),
        })
    }

    /// Creates an in-memory home.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            files: Arc::new(MemoryFileSet::new()),
            root: None,
            _lock_file: None,
        }
    }

    /// Returns the file set holding the environment files.
    #[must_use]
    pub fn files(&self) -> &Arc<dyn FileSet> {
        &self.files
    }

    /// Returns the home directory, or `None` for in-memory environments.
    #[must_use]
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Loads the catalog. Returns `None` for a new environment.
    pub fn load_manifest(&self) -> CoreResult<Option<Manifest>> {
        match self.files.read(MANIFEST_FILE)? {
            Some(data) if !data.is_empty() => Ok(Some(Manifest::decode(&data)?)),
            _ => Ok(None),
        }
    }

    /// Saves the catalog atomically.
    pub fn save_manifest(&self, manifest: &Manifest) -> CoreResult<()> {
        self.files.write_atomic(MANIFEST_FILE, &manifest.encode()?)?;
        Ok(())
    }

    /// Loads the latest checkpoint image, if one was ever written.
    pub fn load_checkpoint(&self) -> CoreResult<Option<CheckpointImage>> {
        match self.files.read(CHECKPOINT_FILE)? {
            Some(data) if !data.is_empty() => Ok(Some(CheckpointImage::decode(&data)?)),
            _ => Ok(None),
        }
    }

    /// Replaces the checkpoint image atomically.
    pub fn save_checkpoint(&self, image: &CheckpointImage) -> CoreResult<()> {
        self.files.write_atomic(CHECKPOINT_FILE, &image.encode()?)?;
        Ok(())
    }
}

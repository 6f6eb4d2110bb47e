//! Test fixtures and environment helpers.
//!
//! Provides convenience functions for setting up test environments
//! and common test data.

use berrydb_core::{CursorOp, EnvConfig, Environment, Store};
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Installs a test subscriber honoring `RUST_LOG`, once per process.
///
/// Output goes through the test harness writer, so it only shows for failing
/// tests (or with `--nocapture`).
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// A test environment with automatic cleanup.
pub struct TestEnv {
    /// The environment.
    pub env: Environment,
    config: EnvConfig,
    /// The temporary directory (kept alive to prevent cleanup).
    dir: Option<TempDir>,
}

impl TestEnv {
    /// Creates a new in-memory environment.
    pub fn memory() -> Self {
        Self::memory_with(EnvConfig::default())
    }

    /// Creates a new in-memory environment with `config`.
    pub fn memory_with(config: EnvConfig) -> Self {
        init_tracing();
        Self {
            env: Environment::open_in_memory(config.clone())
                .expect("Failed to open in-memory environment"),
            config,
            dir: None,
        }
    }

    /// Creates a new environment in a temporary directory.
    pub fn directory() -> Self {
        Self::directory_with(EnvConfig::default())
    }

    /// Creates a new environment in a temporary directory with `config`.
    pub fn directory_with(config: EnvConfig) -> Self {
        init_tracing();
        let dir = TempDir::new().expect("Failed to create temp directory");
        let env = Environment::open(dir.path(), config.clone())
            .expect("Failed to open directory environment");
        Self {
            env,
            config,
            dir: Some(dir),
        }
    }

    /// Returns the home directory if directory-backed.
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(TempDir::path)
    }

    /// Returns the path of a file in the home directory.
    pub fn file(&self, name: &str) -> PathBuf {
        self.path()
            .expect("File access needs a directory environment")
            .join(name)
    }

    /// Closes the environment and opens it again from its directory,
    /// running recovery.
    ///
    /// Every store handle of the old environment must be dropped first, or
    /// the directory lock is still held.
    pub fn reopen(self) -> Self {
        let Self { env, config, dir } = self;
        drop(env);
        let dir = dir.expect("Only directory environments can be reopened");
        let env = Environment::open(dir.path(), config.clone()).expect("Failed to reopen environment");
        Self {
            env,
            config,
            dir: Some(dir),
        }
    }
}

impl std::ops::Deref for TestEnv {
    type Target = Environment;

    fn deref(&self) -> &Self::Target {
        &self.env
    }
}

/// Runs a test with a temporary in-memory environment.
pub fn with_temp_env<F, R>(f: F) -> R
where
    F: FnOnce(&Environment) -> R,
{
    let test_env = TestEnv::memory();
    f(&test_env.env)
}

/// Runs a test with an environment in a temporary directory.
pub fn with_dir_env<F, R>(f: F) -> R
where
    F: FnOnce(&Environment, &Path) -> R,
{
    let test_env = TestEnv::directory();
    let path = test_env.path().expect("Directory environment should have a path").to_path_buf();
    f(&test_env.env, &path)
}

/// Collects every key/value pair of a store in cursor order, using committed
/// data.
pub fn collect_pairs(store: &Store) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut cursor = store.cursor(None).expect("Failed to open cursor");
    let mut pairs = Vec::new();
    while let Some(pair) = cursor.get(CursorOp::Next).expect("Cursor step failed") {
        pairs.push(pair);
    }
    pairs
}

/// Polls `condition` until it holds or `timeout` passes; returns whether it
/// held.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

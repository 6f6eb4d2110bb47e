//! Crash recovery testing for BerryDB.
//!
//! This module provides utilities for testing crash recovery behavior.
//! A crash is simulated by dropping an environment and then damaging its
//! home directory the way an interrupted process or an operator would,
//! before opening it again.
//!
//! ## Test Strategy
//!
//! 1. **Crash after commit** - Ensures committed data survives
//! 2. **Crash before commit** - Ensures uncommitted data is discarded
//! 3. **Torn log tail** - A partial record at the end of the log is cut off
//! 4. **Reclaimed logs** - Recovery works from a checkpoint after archived
//!    log files were removed
//! 5. **Lost log file** - Recovery refuses to run with a gap in the log
//!
//! ## Usage
//!
//! ```rust
//! use berrydb_testkit::crash::CrashRecoveryHarness;
//!
//! let mut harness = CrashRecoveryHarness::new().unwrap();
//! harness.run_all_tests();
//! assert!(harness.all_passed(), "{}", harness.summary());
//! ```

use berrydb_core::log::{log_file_name, parse_log_file_name, LOG_MAGIC};
use berrydb_core::{
    ArchiveMode, CheckpointOptions, CoreError, CoreResult, EnvConfig, Environment, PutFlags,
    StoreConfig,
};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

/// Ways a log can be damaged between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// The process died with a transaction still open.
    BeforeCommit,
    /// The process died after commits returned.
    AfterCommit,
    /// The process died mid-append, leaving a partial record.
    DuringLogWrite,
    /// A log file recovery needs was deleted.
    LostLogFile,
}

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Test description.
    pub description: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Expected number of records after recovery.
    pub expected_records: usize,
    /// Actual number of records after recovery.
    pub actual_records: usize,
    /// Error message if any.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    /// Creates a passing result.
    pub fn pass(description: &str, records: usize) -> Self {
        Self {
            description: description.to_string(),
            passed: true,
            expected_records: records,
            actual_records: records,
            error: None,
        }
    }

    /// Creates a failing result.
    pub fn fail(description: &str, expected: usize, actual: usize, error: &str) -> Self {
        Self {
            description: description.to_string(),
            passed: false,
            expected_records: expected,
            actual_records: actual,
            error: Some(error.to_string()),
        }
    }

    fn from_count(description: &str, expected: usize, actual: usize) -> Self {
        if expected == actual {
            Self::pass(description, expected)
        } else {
            Self::fail(description, expected, actual, "record count mismatch")
        }
    }
}

/// Returns the number of the newest log file in `home`.
pub fn newest_log_file(home: &Path) -> std::io::Result<Option<u32>> {
    let mut newest = None;
    for entry in std::fs::read_dir(home)? {
        let name = entry?.file_name();
        if let Some(number) = name.to_str().and_then(parse_log_file_name) {
            newest = newest.max(Some(number));
        }
    }
    Ok(newest)
}

/// Appends a partial log record to the newest log file in `home`.
pub fn tear_log_tail(home: &Path) -> std::io::Result<()> {
    let newest = newest_log_file(home)?.unwrap_or(1);
    let mut file = OpenOptions::new()
        .append(true)
        .open(home.join(log_file_name(newest)))?;
    file.write_all(&LOG_MAGIC)?;
    file.write_all(&[0x01, 0x00, 0x02, 0xff])?;
    file.sync_all()
}

/// Test harness for crash recovery scenarios.
pub struct CrashRecoveryHarness {
    dir: TempDir,
    config: EnvConfig,
    /// Results of crash recovery tests.
    pub results: Vec<CrashRecoveryResult>,
}

impl CrashRecoveryHarness {
    /// Creates a harness over a fresh temporary directory.
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            dir: TempDir::new()?,
            config: EnvConfig::default(),
            results: Vec::new(),
        })
    }

    /// Returns the environment home.
    pub fn home(&self) -> &Path {
        self.dir.path()
    }

    fn open_fresh(&self) -> CoreResult<Environment> {
        for entry in std::fs::read_dir(self.home())? {
            std::fs::remove_file(entry?.path())?;
        }
        Environment::open(self.home(), self.config.clone())
    }

    fn reopen(&self) -> CoreResult<Environment> {
        Environment::open(self.home(), self.config.clone())
    }

    fn count(env: &Environment) -> CoreResult<usize> {
        env.open_store("records", StoreConfig::btree())?.len(None)
    }

    fn record(
        &mut self,
        description: &str,
        expected: usize,
        run: impl FnOnce(&Self) -> CoreResult<CrashRecoveryResult>,
    ) -> CrashRecoveryResult {
        let result = run(self).unwrap_or_else(|e| {
            CrashRecoveryResult::fail(description, expected, 0, &e.to_string())
        });
        self.results.push(result.clone());
        result
    }

    /// Tests that committed data survives a crash.
    pub fn test_committed_data_survives(&mut self) -> CrashRecoveryResult {
        const DESC: &str = "Committed data survives crash";
        self.record(DESC, 10, |h| {
            {
                let env = h.open_fresh()?;
                let store = env.open_store("records", StoreConfig::btree())?;
                for i in 0..10u8 {
                    env.with_retry(|txn| store.put(Some(txn), &[i], &[i; 100], PutFlags::Replace))?;
                }
            }
            let env = h.reopen()?;
            let store = env.open_store("records", StoreConfig::btree())?;
            let mut found = 0;
            for i in 0..10u8 {
                if store.get(None, &[i])? == Some(vec![i; 100]) {
                    found += 1;
                }
            }
            Ok(CrashRecoveryResult::from_count(DESC, 10, found))
        })
    }

    /// Tests that data of a transaction open at the crash is discarded.
    pub fn test_uncommitted_data_discarded(&mut self) -> CrashRecoveryResult {
        const DESC: &str = "Uncommitted data discarded";
        self.record(DESC, 1, |h| {
            {
                let env = h.open_fresh()?;
                let store = env.open_store("records", StoreConfig::btree())?;
                store.put(None, b"committed", b"1", PutFlags::Replace)?;
                let txn = env.begin(None)?;
                store.put(Some(&txn), b"pending", b"2", PutFlags::Replace)?;
                // Dropping the open transaction stands in for the crash.
                drop(txn);
            }
            let env = h.reopen()?;
            Ok(CrashRecoveryResult::from_count(DESC, 1, Self::count(&env)?))
        })
    }

    /// Tests that a partial record at the end of the log is cut off and the
    /// log stays writable.
    pub fn test_torn_log_tail(&mut self) -> CrashRecoveryResult {
        const DESC: &str = "Torn log tail truncated";
        self.record(DESC, 6, |h| {
            {
                let env = h.open_fresh()?;
                let store = env.open_store("records", StoreConfig::btree())?;
                for i in 0..5u8 {
                    store.put(None, &[i], b"v", PutFlags::Replace)?;
                }
            }
            tear_log_tail(h.home())?;
            {
                let env = h.reopen()?;
                let store = env.open_store("records", StoreConfig::btree())?;
                store.put(None, b"later", b"v", PutFlags::Replace)?;
            }
            let env = h.reopen()?;
            Ok(CrashRecoveryResult::from_count(DESC, 6, Self::count(&env)?))
        })
    }

    /// Tests recovery after a checkpoint and removal of every archivable log
    /// file.
    pub fn test_recover_after_reclaim(&mut self) -> CrashRecoveryResult {
        const DESC: &str = "Recovery after log reclamation";
        self.record(DESC, 20, |h| {
            {
                let env = h.open_fresh()?;
                let store = env.open_store("records", StoreConfig::btree())?;
                for i in 0..10u8 {
                    store.put(None, &[b'a', i], b"v", PutFlags::Replace)?;
                }
                env.checkpoint(&CheckpointOptions::forced())?;
                for i in 0..10u8 {
                    store.put(None, &[b'b', i], b"v", PutFlags::Replace)?;
                }
                for path in env.log_archive(ArchiveMode::Absolute)? {
                    env.remove_log_file(&path)?;
                }
            }
            let env = h.reopen()?;
            Ok(CrashRecoveryResult::from_count(DESC, 20, Self::count(&env)?))
        })
    }

    /// Tests that a deleted live log file stops recovery.
    pub fn test_lost_log_file(&mut self) -> CrashRecoveryResult {
        const DESC: &str = "Lost log file detected";
        self.record(DESC, 0, |h| {
            {
                let env = h.open_fresh()?;
                let store = env.open_store("records", StoreConfig::btree())?;
                store.put(None, b"k", b"v", PutFlags::Replace)?;
                env.checkpoint(&CheckpointOptions::forced())?;
                store.put(None, b"k2", b"v", PutFlags::Replace)?;
            }
            let newest = newest_log_file(h.home())?.unwrap_or(1);
            std::fs::remove_file(h.home().join(log_file_name(newest)))?;
            std::fs::write(h.home().join(log_file_name(newest + 1)), b"")?;

            Ok(match h.reopen() {
                Err(CoreError::LogFileMissing { .. }) => CrashRecoveryResult::pass(DESC, 0),
                Err(e) => CrashRecoveryResult::fail(DESC, 0, 0, &e.to_string()),
                Ok(_) => CrashRecoveryResult::fail(DESC, 0, 0, "recovery ignored the gap"),
            })
        })
    }

    /// Tests that a committed delete survives a crash.
    pub fn test_delete_survives_crash(&mut self) -> CrashRecoveryResult {
        const DESC: &str = "Delete survives crash";
        self.record(DESC, 2, |h| {
            {
                let env = h.open_fresh()?;
                let store = env.open_store("records", StoreConfig::btree())?;
                for key in [b"a", b"b", b"c"] {
                    store.put(None, key, b"v", PutFlags::Replace)?;
                }
                env.checkpoint(&CheckpointOptions::forced())?;
                store.delete(None, b"b")?;
            }
            let env = h.reopen()?;
            Ok(CrashRecoveryResult::from_count(DESC, 2, Self::count(&env)?))
        })
    }

    /// Runs a scenario for `point`.
    pub fn run(&mut self, point: CrashPoint) -> CrashRecoveryResult {
        match point {
            CrashPoint::BeforeCommit => self.test_uncommitted_data_discarded(),
            CrashPoint::AfterCommit => self.test_committed_data_survives(),
            CrashPoint::DuringLogWrite => self.test_torn_log_tail(),
            CrashPoint::LostLogFile => self.test_lost_log_file(),
        }
    }

    /// Runs all crash recovery tests.
    pub fn run_all_tests(&mut self) -> Vec<CrashRecoveryResult> {
        self.results.clear();

        self.test_committed_data_survives();
        self.test_uncommitted_data_discarded();
        self.test_torn_log_tail();
        self.test_recover_after_reclaim();
        self.test_lost_log_file();
        self.test_delete_survives_crash();

        self.results.clone()
    }

    /// Returns a summary of test results.
    pub fn summary(&self) -> String {
        let passed = self.results.iter().filter(|r| r.passed).count();
        let mut summary = format!(
            "\n=== Crash Recovery Test Summary ===\nPassed: {}/{}\n\n",
            passed,
            self.results.len()
        );
        for result in &self.results {
            let status = if result.passed { "ok" } else { "FAILED" };
            summary.push_str(&format!(
                "[{status}] {}\n  Expected: {} records, Actual: {} records\n",
                result.description, result.expected_records, result.actual_records
            ));
            if let Some(error) = &result.error {
                summary.push_str(&format!("  Error: {error}\n"));
            }
        }
        summary
    }

    /// Returns whether all tests passed.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_crash_scenarios_pass() {
        crate::fixtures::init_tracing();
        let mut harness = CrashRecoveryHarness::new().unwrap();
        harness.run_all_tests();
        assert_eq!(harness.results.len(), 6);
        assert!(harness.all_passed(), "{}", harness.summary());
    }

    #[test]
    fn each_crash_point_runs_alone() {
        for point in [
            CrashPoint::BeforeCommit,
            CrashPoint::AfterCommit,
            CrashPoint::DuringLogWrite,
            CrashPoint::LostLogFile,
        ] {
            let mut harness = CrashRecoveryHarness::new().unwrap();
            let result = harness.run(point);
            assert!(result.passed, "{point:?}: {:?}", result.error);
        }
    }

    #[test]
    fn failing_result_is_reported() {
        let result = CrashRecoveryResult::from_count("x", 3, 2);
        assert!(!result.passed);
        assert_eq!(result.error.as_deref(), Some("record count mismatch"));
    }
}

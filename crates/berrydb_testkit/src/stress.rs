//! Stress tests for BerryDB.
//!
//! These tests verify locking, deadlock handling and bounded retry under
//! concurrent access.

use berrydb_core::{
    first_error, CoreError, CoreResult, Duplicates, Environment, Extracted, PutFlags,
    RetryPolicy, Store, StoreConfig, Transaction,
};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Operations per thread.
    pub operations: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Number of distinct counters the threads contend on.
    pub counters: usize,
    /// Retry policy for each operation.
    pub retry: RetryPolicy,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 200,
            threads: 4,
            counters: 2,
            retry: RetryPolicy::new().max_attempts(1_000),
        }
    }
}

fn counter_key(i: usize) -> Vec<u8> {
    format!("counter-{i:04}").into_bytes()
}

/// Reads a little-endian counter, treating a missing key as zero.
pub fn read_counter(store: &Store, txn: Option<&Transaction<'_>>, key: &[u8]) -> CoreResult<u64> {
    Ok(store
        .get(txn, key)?
        .and_then(|bytes| bytes.try_into().ok())
        .map(u64::from_le_bytes)
        .unwrap_or(0))
}

/// Runs concurrent read-modify-write increments of shared counters.
///
/// Readers take shared locks and upgrade them on write, so contending
/// threads deadlock regularly; every increment runs under the retry
/// combinator.
pub fn stress_concurrent_increments(env: &Environment, config: &StressConfig) -> StressTestResult {
    let store = env
        .open_store("counters", StoreConfig::btree())
        .expect("Failed to open counters");
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let env = env.clone();
            let store = store.clone();
            let config = config.clone();
            thread::spawn(move || {
                let mut successful = 0usize;
                let mut failed = 0usize;
                for op in 0..config.operations {
                    let key = counter_key((t + op) % config.counters.max(1));
                    let result = env.with_retry_policy(&config.retry, |txn| {
                        let value = read_counter(&store, Some(txn), &key)?;
                        store.put(Some(txn), &key, &(value + 1).to_le_bytes(), PutFlags::Replace)
                    });
                    match result {
                        Ok(()) => successful += 1,
                        Err(_) => failed += 1,
                    }
                }
                (successful, failed)
            })
        })
        .collect();

    let (successful, failed) = handles
        .into_iter()
        .map(|h| h.join().expect("Increment thread panicked"))
        .fold((0, 0), |(s, f), (ts, tf)| (s + ts, f + tf));
    StressTestResult::new(successful, failed, start.elapsed())
}

/// Runs two transactions that lock `a` and `b` in opposite orders and
/// returns how each ended.
///
/// Both first write their own key, then wait for each other before writing
/// the other key, so the two requests always form a cycle.
pub fn opposite_order_writers(env: &Environment) -> (CoreResult<()>, CoreResult<()>) {
    let store = env
        .open_store("deadlock", StoreConfig::btree())
        .expect("Failed to open store");
    let barrier = Arc::new(Barrier::new(2));

    let spawn = |first: &'static [u8], second: &'static [u8]| {
        let env = env.clone();
        let store = store.clone();
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            let txn = env.begin(None)?;
            store.put(Some(&txn), first, b"1", PutFlags::Replace)?;
            barrier.wait();
            match store.put(Some(&txn), second, b"1", PutFlags::Replace) {
                Ok(()) => txn.commit(),
                Err(err) => first_error(Err(err), txn.abort()),
            }
        })
    };

    let left = spawn(&b"a"[..], &b"b"[..]);
    let right = spawn(&b"b"[..], &b"a"[..]);
    (
        left.join().expect("Writer panicked"),
        right.join().expect("Writer panicked"),
    )
}

/// Runs concurrent writers on disjoint keys of an indexed store and returns
/// the primary and secondary record counts.
pub fn stress_indexed_writers(env: &Environment, config: &StressConfig) -> (usize, usize) {
    let primary = env
        .open_store("items", StoreConfig::btree())
        .expect("Failed to open primary");
    let secondary = env
        .open_store("items_by_thread", StoreConfig::btree().duplicates(Duplicates::Sorted))
        .expect("Failed to open secondary");
    env.associate(
        &primary,
        &secondary,
        Arc::new(|_: &[u8], value: &[u8]| match value.first() {
            Some(t) => Extracted::Key(vec![*t]),
            None => Extracted::Skip,
        }),
    )
    .expect("Failed to associate");

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let env = env.clone();
            let primary = primary.clone();
            let config = config.clone();
            thread::spawn(move || {
                for op in 0..config.operations {
                    let key = format!("{t:02}-{op:06}").into_bytes();
                    env.with_retry_policy(&config.retry, |txn| {
                        primary.put(Some(txn), &key, &[t as u8, 0], PutFlags::Replace)
                    })
                    .expect("Indexed write failed");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("Writer panicked");
    }

    (
        primary.len(None).expect("Failed to count primary"),
        secondary.len(None).expect("Failed to count secondary"),
    )
}

/// Returns true if `result` failed with a lock conflict.
pub fn is_lock_conflict(result: &CoreResult<()>) -> bool {
    matches!(result, Err(CoreError::LockConflict { .. }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestEnv;
    use berrydb_core::{ConflictReason, EnvConfig, ErrorKind};
    use std::cell::Cell;

    fn env_with_timeout() -> TestEnv {
        TestEnv::memory_with(EnvConfig::default().lock_timeout(Some(Duration::from_millis(20))))
    }

    #[test]
    fn test_concurrent_increments() {
        let env = TestEnv::memory();
        let config = StressConfig::default();
        let result = stress_concurrent_increments(&env, &config);
        result.print_summary("Concurrent Increments");

        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, config.threads * config.operations);

        let store = env.open_store("counters", StoreConfig::btree()).unwrap();
        let total: u64 = (0..config.counters)
            .map(|i| read_counter(&store, None, &counter_key(i)).unwrap())
            .sum();
        assert_eq!(total, (config.threads * config.operations) as u64);
    }

    #[test]
    fn test_opposite_order_deadlock() {
        let env = TestEnv::memory();
        let (left, right) = opposite_order_writers(&env);

        let conflicts = [&left, &right].iter().filter(|r| is_lock_conflict(r)).count();
        assert_eq!(conflicts, 1, "left: {left:?}, right: {right:?}");
        let victim = if left.is_err() { &left } else { &right };
        assert!(matches!(
            victim,
            Err(CoreError::LockConflict {
                reason: ConflictReason::Deadlock,
                ..
            })
        ));
        assert!(left.is_ok() || right.is_ok());
        assert_eq!(env.stats().deadlocks, 1);

        let store = env.open_store("deadlock", StoreConfig::btree()).unwrap();
        assert_eq!(store.len(None).unwrap(), 2);
    }

    #[test]
    fn test_retry_gives_up_after_max_attempts() {
        let env = env_with_timeout();
        let store = env.open_store("kv", StoreConfig::btree()).unwrap();
        let blocker = env.begin(None).unwrap();
        store.put(Some(&blocker), b"hot", b"held", PutFlags::Replace).unwrap();

        let attempts = Cell::new(0u32);
        let policy = RetryPolicy::new().max_attempts(3);
        let result = env.with_retry_policy(&policy, |txn| {
            attempts.set(attempts.get() + 1);
            store.put(Some(txn), b"hot", b"mine", PutFlags::Replace)
        });

        assert_eq!(result.unwrap_err().kind(), ErrorKind::LockConflict);
        assert_eq!(attempts.get(), 3);
        assert_eq!(env.stats().retries, 2);
        blocker.abort().unwrap();
    }

    #[test]
    fn test_retry_keeps_only_the_successful_attempt() {
        let env = env_with_timeout();
        let store = env.open_store("kv", StoreConfig::btree()).unwrap();
        let blocker = env.begin(None).unwrap();
        store.put(Some(&blocker), b"hot", b"held", PutFlags::Replace).unwrap();

        let attempts = Cell::new(0u32);
        let policy = RetryPolicy::new().max_attempts(5);
        let winner = env
            .with_retry_policy(&policy, |txn| {
                let attempt = attempts.get() + 1;
                attempts.set(attempt);
                store.put(Some(txn), format!("trace-{attempt}").as_bytes(), b"x", PutFlags::Replace)?;
                if attempt < 3 {
                    store.put(Some(txn), b"hot", b"mine", PutFlags::Replace)?;
                }
                Ok(attempt)
            })
            .unwrap();
        blocker.abort().unwrap();

        assert_eq!(winner, 3);
        assert_eq!(store.get(None, b"trace-1").unwrap(), None);
        assert_eq!(store.get(None, b"trace-2").unwrap(), None);
        assert_eq!(store.get(None, b"trace-3").unwrap(), Some(b"x".to_vec()));
        assert_eq!(store.get(None, b"hot").unwrap(), None);
    }

    #[test]
    fn test_non_conflict_errors_are_not_retried() {
        let env = TestEnv::memory();
        let store = env.open_store("kv", StoreConfig::btree()).unwrap();
        store.put(None, b"k", b"v", PutFlags::Replace).unwrap();

        let attempts = Cell::new(0u32);
        let err = env
            .with_retry(|txn| {
                attempts.set(attempts.get() + 1);
                store.put(Some(txn), b"k", b"w", PutFlags::NoOverwrite)
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyExists);
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_indexed_writers() {
        let env = TestEnv::memory();
        let config = StressConfig {
            operations: 100,
            ..Default::default()
        };
        let (primary, secondary) = stress_indexed_writers(&env, &config);
        assert_eq!(primary, config.threads * config.operations);
        assert_eq!(secondary, primary);
    }
}

//! Bounded retry of whole transactions on lock conflicts.

use crate::env::EnvShared;
use crate::error::{first_error, CoreResult};
use crate::transaction::Transaction;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// How often and how patiently a transaction body is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first (at least 1).
    pub max_attempts: u32,
    /// Delay before the second attempt; attempt `n` waits `n - 1` times
    /// this long.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the total number of attempts.
    #[must_use]
    pub const fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the backoff step.
    #[must_use]
    pub const fn backoff(mut self, delay: Duration) -> Self {
        self.backoff = delay;
        self
    }
}

/// Runs `body` in a fresh top-level transaction and commits it.
///
/// On a lock conflict the attempt is aborted and the body runs again from
/// scratch, up to `policy.max_attempts` attempts in total; the last conflict
/// is returned if all attempts fail. Any other error aborts and propagates at
/// once.
pub(crate) fn run<T, F>(env: &Arc<EnvShared>, policy: &RetryPolicy, mut body: F) -> CoreResult<T>
where
    F: FnMut(&Transaction<'_>) -> CoreResult<T>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let txn = Transaction::begin(env, None)?;
        let err = match body(&txn) {
            Ok(value) => match txn.commit() {
                Ok(()) => return Ok(value),
                Err(err) => err,
            },
            Err(err) => {
                if let Err(abort_err) = txn.abort() {
                    return first_error(Err(err), Err(abort_err));
                }
                err
            }
        };

        if !err.is_retryable() {
            return Err(err);
        }
        if attempt >= max_attempts {
            tracing::warn!(attempts = attempt, error = %err, "lock conflict persisted, giving up");
            return Err(err);
        }

        env.stats.record_retry();
        tracing::warn!(attempt, max_attempts, error = %err, "lock conflict, retrying transaction");
        if !policy.backoff.is_zero() {
            thread::sleep(policy.backoff * attempt);
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert!(policy.backoff.is_zero());
    }

    #[test]
    fn builder() {
        let policy = RetryPolicy::new()
            .max_attempts(3)
            .backoff(Duration::from_millis(2));
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff, Duration::from_millis(2));
    }
}

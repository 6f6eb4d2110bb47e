//! Transactions.
//!
//! BerryDB transactions use strict two-phase locking:
//! - **Atomicity**: writes are buffered and applied all at once on commit
//! - **Isolation**: readers see committed data plus their own writes; keys
//!   they touch stay locked until the top-level transaction ends
//! - **Durability**: commits are logged before they are applied
//!
//! Lock conflicts (deadlock victims and lock timeouts) are the only
//! retryable failure. [`RetryPolicy`] drives the bounded retry performed by
//! [`crate::Environment::with_retry`].

mod manager;
pub(crate) mod retry;
mod state;

pub(crate) use manager::{RecoveredState, TransactionManager};
pub use retry::RetryPolicy;
pub use state::{Transaction, TransactionState};
pub(crate) use state::{Staged, WriteSet};

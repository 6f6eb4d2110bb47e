//! Lock management.

mod manager;

pub use manager::{LockManager, LockMode, LockOwner, Resource};

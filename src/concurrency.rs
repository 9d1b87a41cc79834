//! Page-granularity locking for strict two-phase transactions.

pub mod lock;

pub use lock::{LockManager, LockMode};

//! Transaction identity.
//!
//! Transactions themselves live in the callers; this module only provides the
//! unique id that tags lock ownership and dirty pages. Completion (commit or
//! abort) is driven through `storage::buffer::BufferPool`.

pub mod id;

pub use id::{TransactionId, TransactionIdGenerator};

//! Storage layer error types.

use thiserror::Error;

use crate::catalog::TableId;
use crate::storage::page::PageId;
use crate::transaction::TransactionId;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Lock not granted within the bounded wait. The transaction must abort;
    /// it may be retried from the top.
    #[error("{txn} aborted: lock on {page_id} not granted within {waited_ms}ms")]
    LockTimeout {
        txn: TransactionId,
        page_id: PageId,
        waited_ms: u64,
    },

    /// A shared-to-exclusive upgrade was requested while other transactions
    /// also hold shared locks. Waiting would deadlock against a symmetric
    /// upgrader, so the requester aborts immediately.
    #[error("{txn} aborted: cannot upgrade lock on {page_id} with other readers present")]
    UpgradeConflict { txn: TransactionId, page_id: PageId },

    /// Requested page lies outside the file's extent, or the read came up
    /// short.
    #[error("invalid page {page_id}: {reason}")]
    InvalidPage { page_id: PageId, reason: String },

    /// Every cached page is dirty; under no-steal none can be evicted. The
    /// pool is undersized relative to the active working set.
    #[error("buffer pool exhausted: all {capacity} cached pages are dirty")]
    PoolExhausted { capacity: usize },

    #[error("page is full: requires {required} bytes but only {available} available")]
    PageFull { required: usize, available: usize },

    #[error("slot {slot_id} is empty or deleted")]
    EmptySlot { slot_id: u16 },

    #[error("invalid slot id {slot_id} (page has {slot_count} slots)")]
    InvalidSlot { slot_id: u16, slot_count: u16 },

    #[error("no file registered for table {0}")]
    UnknownTable(TableId),

    #[error("invalid storage configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAL encoding error: {0}")]
    WalEncoding(#[from] bincode::Error),
}

impl StorageError {
    /// True for conditions that signal the caller to abort the whole
    /// transaction and possibly retry it, as opposed to fatal errors.
    pub fn is_transaction_abort(&self) -> bool {
        matches!(
            self,
            StorageError::LockTimeout { .. } | StorageError::UpgradeConflict { .. }
        )
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

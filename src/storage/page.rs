pub mod slotted;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::catalog::TableId;
use crate::transaction::TransactionId;

/// Identity of a page: the owning table plus its position in that table's
/// file. Used as the cache key and the lock key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId {
    pub table_id: TableId,
    pub page_no: u32,
}

impl PageId {
    pub fn new(table_id: TableId, page_no: u32) -> Self {
        Self { table_id, page_no }
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "page {}:{}", self.table_id.0, self.page_no)
    }
}

/// An in-memory page: fixed-size content, the transaction that last dirtied
/// it, and a snapshot of its content from before that transaction's
/// modifications.
///
/// A page is dirty iff `dirty_by` is `Some`. The before-image is captured
/// when the page is materialized from disk and refreshed after every
/// successful flush, so it always reflects the last committed on-disk state.
#[derive(Debug)]
pub struct HeapPage {
    id: PageId,
    data: Vec<u8>,
    dirty_by: Option<TransactionId>,
    before_image: Bytes,
}

impl HeapPage {
    /// Wraps bytes just read from (or about to be appended to) disk. The
    /// buffer length is the page size.
    pub fn new(id: PageId, data: Vec<u8>) -> Self {
        let before_image = Bytes::copy_from_slice(&data);
        Self {
            id,
            data,
            dirty_by: None,
            before_image,
        }
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// The transaction that dirtied this page, or `None` if it is clean.
    pub fn dirty_by(&self) -> Option<TransactionId> {
        self.dirty_by
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty_by.is_some()
    }

    pub fn mark_dirty(&mut self, txn: TransactionId) {
        self.dirty_by = Some(txn);
    }

    pub fn mark_clean(&mut self) {
        self.dirty_by = None;
    }

    /// Snapshot of the page content prior to the dirtying transaction's
    /// modifications, for write-ahead logging.
    pub fn before_image(&self) -> Bytes {
        self.before_image.clone()
    }

    /// Re-snapshots the current content as the new before-image. Called once
    /// the content has been made durable.
    pub fn set_before_image(&mut self) {
        self.before_image = Bytes::copy_from_slice(&self.data);
    }

    /// Replaces the content with bytes re-read from disk, discarding the
    /// in-memory modifications. Used by the abort path.
    pub fn overwrite_from(&mut self, data: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(data);
        self.dirty_by = None;
        self.before_image = Bytes::copy_from_slice(data);
    }
}

//! Slotted tuple layout within a page.
//!
//! Tuple bytes grow forward from the header; the slot directory grows
//! backward from the page tail. Each 4-byte slot stores `(offset, len)` in
//! little-endian; `(0, 0)` marks a deleted tuple. A freshly allocated page is
//! all zeros, which this view reads as an empty page.

use crate::storage::error::{StorageError, StorageResult};

/// Header: `[tuple_count: u16][free_ptr: u16][reserved: 4]`.
pub const HEADER_SIZE: usize = 8;

const TUPLE_COUNT_OFFSET: usize = 0;
const FREE_PTR_OFFSET: usize = 2;

/// Slot: 2 bytes offset, 2 bytes length.
pub const SLOT_SIZE: usize = 4;

/// A mutable slotted view over one page's bytes. The caller holds the page
/// lock for the lifetime of the view.
pub struct SlottedPage<'a> {
    data: &'a mut [u8],
}

impl<'a> SlottedPage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    pub fn tuple_count(&self) -> u16 {
        u16::from_le_bytes([
            self.data[TUPLE_COUNT_OFFSET],
            self.data[TUPLE_COUNT_OFFSET + 1],
        ])
    }

    fn set_tuple_count(&mut self, count: u16) {
        self.data[TUPLE_COUNT_OFFSET..TUPLE_COUNT_OFFSET + 2]
            .copy_from_slice(&count.to_le_bytes());
    }

    fn free_ptr(&self) -> u16 {
        let raw = u16::from_le_bytes([self.data[FREE_PTR_OFFSET], self.data[FREE_PTR_OFFSET + 1]]);
        // An all-zero page has never been initialized; content starts after
        // the header.
        raw.max(HEADER_SIZE as u16)
    }

    fn set_free_ptr(&mut self, ptr: u16) {
        self.data[FREE_PTR_OFFSET..FREE_PTR_OFFSET + 2].copy_from_slice(&ptr.to_le_bytes());
    }

    fn slot_offset(&self, slot_id: u16) -> usize {
        self.data.len() - ((slot_id as usize + 1) * SLOT_SIZE)
    }

    fn slot(&self, slot_id: u16) -> (u16, u16) {
        let base = self.slot_offset(slot_id);
        let offset = u16::from_le_bytes([self.data[base], self.data[base + 1]]);
        let len = u16::from_le_bytes([self.data[base + 2], self.data[base + 3]]);
        (offset, len)
    }

    /// Bytes available for one more tuple plus its slot entry.
    pub fn free_space(&self) -> usize {
        let slot_array_start = self.data.len() - (self.tuple_count() as usize * SLOT_SIZE);
        slot_array_start.saturating_sub(self.free_ptr() as usize)
    }

    /// Whether a tuple of `len` bytes fits on this page.
    pub fn has_room_for(&self, len: usize) -> bool {
        self.free_space() >= len + SLOT_SIZE
    }

    /// Appends a tuple, returning its slot id.
    pub fn insert_tuple(&mut self, tuple: &[u8]) -> StorageResult<u16> {
        let required = tuple.len() + SLOT_SIZE;
        let available = self.free_space();
        if tuple.len() > u16::MAX as usize || available < required {
            return Err(StorageError::PageFull {
                required,
                available,
            });
        }

        let tuple_count = self.tuple_count();
        let offset = self.free_ptr();
        self.data[offset as usize..offset as usize + tuple.len()].copy_from_slice(tuple);
        self.set_free_ptr(offset + tuple.len() as u16);

        let base = self.slot_offset(tuple_count);
        self.data[base..base + 2].copy_from_slice(&offset.to_le_bytes());
        self.data[base + 2..base + 4].copy_from_slice(&(tuple.len() as u16).to_le_bytes());

        self.set_tuple_count(tuple_count + 1);
        Ok(tuple_count)
    }

    /// Returns the tuple bytes in `slot_id`, or an error if the slot is out
    /// of range or tombstoned.
    pub fn get_tuple(&self, slot_id: u16) -> StorageResult<&[u8]> {
        let slot_count = self.tuple_count();
        if slot_id >= slot_count {
            return Err(StorageError::InvalidSlot {
                slot_id,
                slot_count,
            });
        }
        let (offset, len) = self.slot(slot_id);
        if offset == 0 && len == 0 {
            return Err(StorageError::EmptySlot { slot_id });
        }
        Ok(&self.data[offset as usize..(offset + len) as usize])
    }

    /// True if the slot holds a live tuple.
    pub fn is_live(&self, slot_id: u16) -> bool {
        if slot_id >= self.tuple_count() {
            return false;
        }
        self.slot(slot_id) != (0, 0)
    }

    /// Tombstones the tuple in `slot_id`. The slot is not reused; the space
    /// is reclaimed only when the page is rewritten wholesale.
    pub fn delete_tuple(&mut self, slot_id: u16) -> StorageResult<()> {
        let slot_count = self.tuple_count();
        if slot_id >= slot_count {
            return Err(StorageError::InvalidSlot {
                slot_id,
                slot_count,
            });
        }
        if !self.is_live(slot_id) {
            return Err(StorageError::EmptySlot { slot_id });
        }
        let base = self.slot_offset(slot_id);
        self.data[base..base + SLOT_SIZE].fill(0);
        Ok(())
    }

    /// Collects `(slot_id, bytes)` for every live tuple, in slot order.
    pub fn live_tuples(&self) -> Vec<(u16, Vec<u8>)> {
        (0..self.tuple_count())
            .filter_map(|slot_id| {
                self.get_tuple(slot_id)
                    .ok()
                    .map(|bytes| (slot_id, bytes.to_vec()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE_SIZE: usize = 512;

    #[test]
    fn test_zeroed_page_reads_empty() {
        let mut data = vec![0u8; PAGE_SIZE];
        let page = SlottedPage::new(&mut data);
        assert_eq!(page.tuple_count(), 0);
        assert_eq!(page.free_space(), PAGE_SIZE - HEADER_SIZE);
        assert!(page.live_tuples().is_empty());
    }

    #[test]
    fn test_insert_and_get() {
        let mut data = vec![0u8; PAGE_SIZE];
        let mut page = SlottedPage::new(&mut data);

        let slot1 = page.insert_tuple(b"hello").unwrap();
        let slot2 = page.insert_tuple(b"world!").unwrap();
        assert_eq!(slot1, 0);
        assert_eq!(slot2, 1);

        assert_eq!(page.get_tuple(slot1).unwrap(), b"hello");
        assert_eq!(page.get_tuple(slot2).unwrap(), b"world!");
        assert_eq!(page.tuple_count(), 2);
    }

    #[test]
    fn test_delete_leaves_tombstone() {
        let mut data = vec![0u8; PAGE_SIZE];
        let mut page = SlottedPage::new(&mut data);

        let slot = page.insert_tuple(b"doomed").unwrap();
        page.insert_tuple(b"survivor").unwrap();
        page.delete_tuple(slot).unwrap();

        assert!(matches!(
            page.get_tuple(slot),
            Err(StorageError::EmptySlot { .. })
        ));
        assert!(!page.is_live(slot));
        // Double delete errors rather than silently passing
        assert!(page.delete_tuple(slot).is_err());

        let live = page.live_tuples();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0], (1, b"survivor".to_vec()));
    }

    #[test]
    fn test_page_full() {
        let mut data = vec![0u8; PAGE_SIZE];
        let mut page = SlottedPage::new(&mut data);

        let tuple = vec![0xAA; 100];
        let mut inserted = 0;
        while page.has_room_for(tuple.len()) {
            page.insert_tuple(&tuple).unwrap();
            inserted += 1;
        }
        assert!(inserted > 0);
        assert!(matches!(
            page.insert_tuple(&tuple),
            Err(StorageError::PageFull { .. })
        ));
    }

    #[test]
    fn test_invalid_slot() {
        let mut data = vec![0u8; PAGE_SIZE];
        let page = SlottedPage::new(&mut data);
        assert!(matches!(
            page.get_tuple(0),
            Err(StorageError::InvalidSlot { .. })
        ));
    }

    #[test]
    fn test_survives_reload() {
        let mut data = vec![0u8; PAGE_SIZE];
        {
            let mut page = SlottedPage::new(&mut data);
            page.insert_tuple(b"persistent").unwrap();
        }
        // Same bytes, fresh view
        let page = SlottedPage::new(&mut data);
        assert_eq!(page.tuple_count(), 1);
        assert_eq!(page.get_tuple(0).unwrap(), b"persistent");
    }
}

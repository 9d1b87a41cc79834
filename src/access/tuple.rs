use crate::storage::page::PageId;
use std::cmp::Ordering;

/// Unique identifier for a tuple: the owning page plus a slot within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TupleId {
    pub page_id: PageId,
    pub slot_id: u16,
}

impl TupleId {
    pub fn new(page_id: PageId, slot_id: u16) -> Self {
        Self { page_id, slot_id }
    }
}

impl PartialOrd for TupleId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TupleId {
    fn cmp(&self, other: &Self) -> Ordering {
        // Page order first, then slot order within the page
        (self.page_id.table_id, self.page_id.page_no, self.slot_id).cmp(&(
            other.page_id.table_id,
            other.page_id.page_no,
            other.slot_id,
        ))
    }
}

/// A row as the storage core sees it: opaque bytes plus its location.
///
/// Value encoding and schemas belong to the layers above; deletes route back
/// through the embedded `tuple_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuple {
    pub tuple_id: TupleId,
    pub data: Vec<u8>,
}

impl Tuple {
    pub fn new(tuple_id: TupleId, data: Vec<u8>) -> Self {
        Self { tuple_id, data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TableId;

    fn pid(table: u32, page: u32) -> PageId {
        PageId::new(TableId(table), page)
    }

    #[test]
    fn test_tuple_id_equality() {
        let tid1 = TupleId::new(pid(1, 2), 3);
        let tid2 = TupleId::new(pid(1, 2), 3);
        let tid3 = TupleId::new(pid(1, 2), 4);
        let tid4 = TupleId::new(pid(2, 2), 3);

        assert_eq!(tid1, tid2);
        assert_ne!(tid1, tid3);
        assert_ne!(tid1, tid4);
    }

    #[test]
    fn test_tuple_id_ordering() {
        let tid1 = TupleId::new(pid(1, 1), 5);
        let tid2 = TupleId::new(pid(1, 1), 10);
        let tid3 = TupleId::new(pid(1, 2), 0);

        assert!(tid1 < tid2);
        assert!(tid2 < tid3);
        assert!(tid1 < tid3);
    }

    #[test]
    fn test_tuple_creation() {
        let tid = TupleId::new(pid(1, 0), 0);
        let tuple = Tuple::new(tid, vec![1, 2, 3]);
        assert_eq!(tuple.tuple_id, tid);
        assert_eq!(tuple.data, vec![1, 2, 3]);
    }
}

use crate::storage::page::PageId;
use std::cmp::Ordering;
use std::fmt;

/// Address of a row inside table storage: the heap page and the slot in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowId {
    pub page_id: PageId,
    pub slot_num: u32,
}

impl RowId {
    pub fn new(page_id: PageId, slot_num: u32) -> Self {
        Self { page_id, slot_num }
    }
}

impl PartialOrd for RowId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RowId {
    fn cmp(&self, other: &Self) -> Ordering {
        // First compare by page_id, then by slot_num
        match self.page_id.0.cmp(&other.page_id.0) {
            Ordering::Equal => self.slot_num.cmp(&other.slot_num),
            other => other,
        }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot_num)
    }
}

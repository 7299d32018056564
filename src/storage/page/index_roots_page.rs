//! Index roots page: the persistent `index_id -> root page id` map.
//!
//! Layout: `count u32 @0`, then `count` packed `(index_id u32, root u32)`
//! records in insertion order.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use crate::storage::PAGE_SIZE;
use byteorder::{ByteOrder, LittleEndian};

const COUNT_OFFSET: usize = 0;
const ENTRIES_OFFSET: usize = 4;
const ENTRY_SIZE: usize = 8;

pub const MAX_INDEX_ROOTS: usize = (PAGE_SIZE - ENTRIES_OFFSET) / ENTRY_SIZE;

pub struct IndexRootsPage<D> {
    data: D,
}

impl<D: AsRef<[u8]>> IndexRootsPage<D> {
    pub fn from_data(data: D) -> Self {
        Self { data }
    }

    pub fn into_inner(self) -> D {
        self.data
    }

    pub fn count(&self) -> usize {
        LittleEndian::read_u32(&self.data.as_ref()[COUNT_OFFSET..]) as usize
    }

    fn entry(&self, index: usize) -> (u32, PageId) {
        let offset = ENTRIES_OFFSET + index * ENTRY_SIZE;
        let data = self.data.as_ref();
        (
            LittleEndian::read_u32(&data[offset..]),
            PageId(LittleEndian::read_u32(&data[offset + 4..])),
        )
    }

    fn position(&self, index_id: u32) -> Option<usize> {
        (0..self.count()).find(|&i| self.entry(i).0 == index_id)
    }

    pub fn get_root_id(&self, index_id: u32) -> Option<PageId> {
        self.position(index_id).map(|i| self.entry(i).1)
    }

    pub fn entries(&self) -> Vec<(u32, PageId)> {
        (0..self.count()).map(|i| self.entry(i)).collect()
    }
}

impl<D: AsRef<[u8]> + AsMut<[u8]>> IndexRootsPage<D> {
    pub fn init(&mut self) {
        LittleEndian::write_u32(&mut self.data.as_mut()[COUNT_OFFSET..], 0);
    }

    fn set_entry(&mut self, index: usize, index_id: u32, root: PageId) {
        let offset = ENTRIES_OFFSET + index * ENTRY_SIZE;
        let data = self.data.as_mut();
        LittleEndian::write_u32(&mut data[offset..], index_id);
        LittleEndian::write_u32(&mut data[offset + 4..], root.0);
    }

    fn set_count(&mut self, count: usize) {
        LittleEndian::write_u32(&mut self.data.as_mut()[COUNT_OFFSET..], count as u32);
    }

    /// Add a new mapping. Returns `false` if `index_id` is already present.
    pub fn insert(&mut self, index_id: u32, root: PageId) -> StorageResult<bool> {
        if self.position(index_id).is_some() {
            return Ok(false);
        }
        let count = self.count();
        if count >= MAX_INDEX_ROOTS {
            return Err(StorageError::PageOverflow {
                required: ENTRIES_OFFSET + (count + 1) * ENTRY_SIZE,
                available: PAGE_SIZE,
            });
        }
        self.set_entry(count, index_id, root);
        self.set_count(count + 1);
        Ok(true)
    }

    /// Point an existing mapping at a new root. Returns `false` if absent.
    pub fn update(&mut self, index_id: u32, root: PageId) -> bool {
        match self.position(index_id) {
            Some(i) => {
                self.set_entry(i, index_id, root);
                true
            }
            None => false,
        }
    }

    pub fn delete(&mut self, index_id: u32) -> bool {
        let Some(i) = self.position(index_id) else {
            return false;
        };
        let count = self.count();
        let start = ENTRIES_OFFSET + (i + 1) * ENTRY_SIZE;
        let end = ENTRIES_OFFSET + count * ENTRY_SIZE;
        self.data
            .as_mut()
            .copy_within(start..end, start - ENTRY_SIZE);
        self.set_count(count - 1);
        true
    }
}

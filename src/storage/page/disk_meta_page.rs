//! Allocator meta page stored at physical page 0.
//!
//! Layout: `allocated_pages u32 @0`, `extent_count u32 @4`, then one
//! `u32` allocated-page counter per extent starting at byte 8.

use crate::storage::PAGE_SIZE;
use byteorder::{ByteOrder, LittleEndian};

const ALLOCATED_PAGES_OFFSET: usize = 0;
const EXTENT_COUNT_OFFSET: usize = 4;
const EXTENT_COUNTERS_OFFSET: usize = 8;

/// Number of extents the meta page can describe.
pub const MAX_EXTENTS: usize = (PAGE_SIZE - EXTENT_COUNTERS_OFFSET) / 4;

pub struct DiskMetaPage<D> {
    data: D,
}

impl<D: AsRef<[u8]>> DiskMetaPage<D> {
    pub fn from_data(data: D) -> Self {
        Self { data }
    }

    pub fn into_inner(self) -> D {
        self.data
    }

    pub fn allocated_pages(&self) -> u32 {
        LittleEndian::read_u32(&self.data.as_ref()[ALLOCATED_PAGES_OFFSET..])
    }

    /// Number of extents currently holding at least one allocated page.
    pub fn extent_count(&self) -> u32 {
        LittleEndian::read_u32(&self.data.as_ref()[EXTENT_COUNT_OFFSET..])
    }

    pub fn extent_used_pages(&self, extent: usize) -> u32 {
        let offset = EXTENT_COUNTERS_OFFSET + extent * 4;
        LittleEndian::read_u32(&self.data.as_ref()[offset..])
    }
}

impl<D: AsRef<[u8]> + AsMut<[u8]>> DiskMetaPage<D> {
    pub fn set_allocated_pages(&mut self, count: u32) {
        LittleEndian::write_u32(&mut self.data.as_mut()[ALLOCATED_PAGES_OFFSET..], count);
    }

    pub fn set_extent_count(&mut self, count: u32) {
        LittleEndian::write_u32(&mut self.data.as_mut()[EXTENT_COUNT_OFFSET..], count);
    }

    pub fn set_extent_used_pages(&mut self, extent: usize, count: u32) {
        let offset = EXTENT_COUNTERS_OFFSET + extent * 4;
        LittleEndian::write_u32(&mut self.data.as_mut()[offset..], count);
    }
}

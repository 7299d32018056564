//! Free-space bitmap for one extent of data pages.
//!
//! Layout: `allocated u32 @0`, `next_free_page u32 @4`, then one bit per data
//! page starting at byte 8, most significant bit first.

use crate::storage::PAGE_SIZE;
use byteorder::{ByteOrder, LittleEndian};

const BITMAP_HEADER_SIZE: usize = 8;
const ALLOCATED_OFFSET: usize = 0;
const NEXT_FREE_OFFSET: usize = 4;

/// Number of data pages tracked by one bitmap page.
pub const BITMAP_CAPACITY: usize = (PAGE_SIZE - BITMAP_HEADER_SIZE) * 8;

pub struct BitmapPage<D> {
    data: D,
}

impl<D: AsRef<[u8]>> BitmapPage<D> {
    pub fn from_data(data: D) -> Self {
        Self { data }
    }

    pub fn into_inner(self) -> D {
        self.data
    }

    pub fn capacity(&self) -> usize {
        BITMAP_CAPACITY
    }

    pub fn allocated(&self) -> usize {
        LittleEndian::read_u32(&self.data.as_ref()[ALLOCATED_OFFSET..]) as usize
    }

    /// Hint for the next allocation. Equals the capacity when the extent is full.
    pub fn next_free_page(&self) -> usize {
        LittleEndian::read_u32(&self.data.as_ref()[NEXT_FREE_OFFSET..]) as usize
    }

    pub fn is_page_free(&self, offset: usize) -> bool {
        if offset >= BITMAP_CAPACITY {
            return false;
        }
        let byte = self.data.as_ref()[BITMAP_HEADER_SIZE + offset / 8];
        byte & (0x80 >> (offset % 8)) == 0
    }

    /// Recount the set bits. Used by consistency checks, never on the hot path.
    pub fn count_allocated(&self) -> usize {
        self.data.as_ref()[BITMAP_HEADER_SIZE..BITMAP_HEADER_SIZE + BITMAP_CAPACITY / 8]
            .iter()
            .map(|b| b.count_ones() as usize)
            .sum()
    }

    fn find_free_from(&self, start: usize) -> usize {
        (start..BITMAP_CAPACITY)
            .chain(0..start.min(BITMAP_CAPACITY))
            .find(|&i| self.is_page_free(i))
            .unwrap_or(BITMAP_CAPACITY)
    }
}

impl<D: AsRef<[u8]> + AsMut<[u8]>> BitmapPage<D> {
    fn set_allocated(&mut self, count: usize) {
        LittleEndian::write_u32(
            &mut self.data.as_mut()[ALLOCATED_OFFSET..],
            count as u32,
        );
    }

    fn set_next_free_page(&mut self, offset: usize) {
        LittleEndian::write_u32(
            &mut self.data.as_mut()[NEXT_FREE_OFFSET..],
            offset as u32,
        );
    }

    fn set_bit(&mut self, offset: usize, used: bool) {
        let byte = &mut self.data.as_mut()[BITMAP_HEADER_SIZE + offset / 8];
        let mask = 0x80u8 >> (offset % 8);
        if used {
            *byte |= mask;
        } else {
            *byte &= !mask;
        }
    }

    /// Take the hinted free slot. Returns `None` when the extent is full or the
    /// hint does not name a free page.
    pub fn allocate_page(&mut self) -> Option<usize> {
        let allocated = self.allocated();
        if allocated >= BITMAP_CAPACITY {
            return None;
        }

        let offset = self.next_free_page();
        if !self.is_page_free(offset) {
            return None;
        }

        self.set_bit(offset, true);
        self.set_allocated(allocated + 1);
        let next = if allocated + 1 == BITMAP_CAPACITY {
            BITMAP_CAPACITY
        } else {
            self.find_free_from(offset + 1)
        };
        self.set_next_free_page(next);
        Some(offset)
    }

    /// Release a page. Returns `false` if it was not allocated.
    pub fn deallocate_page(&mut self, offset: usize) -> bool {
        if offset >= BITMAP_CAPACITY || self.is_page_free(offset) {
            return false;
        }

        self.set_bit(offset, false);
        self.set_allocated(self.allocated() - 1);
        // Prefer the lowest free slot so freed pages are reused first.
        if offset < self.next_free_page() {
            self.set_next_free_page(offset);
        }
        true
    }
}

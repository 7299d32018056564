//! B+ tree leaf page.
//!
//! The common header is followed by the next-leaf pointer at byte 24 and
//! then `size` packed `(key, row id)` pairs sorted by key. A row id is
//! stored as `page_id u32` then `slot_num u32`.

use crate::access::RowId;
use crate::storage::error::StorageResult;
use crate::storage::page::btree_page::{BTreePage, BTreePageType, BTREE_HEADER_SIZE};
use crate::storage::page::{read_page_id, write_page_id, PageId};
use crate::storage::PAGE_SIZE;
use byteorder::{ByteOrder, LittleEndian};
use std::cmp::Ordering;
use std::ops::{Deref, DerefMut};

const NEXT_PAGE_ID_OFFSET: usize = BTREE_HEADER_SIZE;
const LEAF_HEADER_SIZE: usize = BTREE_HEADER_SIZE + 4;
const ROW_ID_SIZE: usize = 8;

/// Largest leaf max size for `key_size`, keeping room for the overflow entry
/// a split needs. `None` when not even that fits.
pub fn leaf_max_size_for(key_size: usize) -> Option<usize> {
    ((PAGE_SIZE - LEAF_HEADER_SIZE) / (key_size + ROW_ID_SIZE)).checked_sub(1)
}

pub struct BTreeLeafPage<D> {
    page: BTreePage<D>,
}

impl<D> Deref for BTreeLeafPage<D> {
    type Target = BTreePage<D>;

    fn deref(&self) -> &Self::Target {
        &self.page
    }
}

impl<D> DerefMut for BTreeLeafPage<D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.page
    }
}

impl<D: AsRef<[u8]>> BTreeLeafPage<D> {
    pub fn from_data(data: D) -> Self {
        Self {
            page: BTreePage::from_data(data),
        }
    }

    pub fn from_data_checked(data: D) -> StorageResult<Self> {
        let page = BTreePage::from_data(data);
        page.expect_type(BTreePageType::Leaf)?;
        Ok(Self { page })
    }

    pub fn into_inner(self) -> D {
        self.page.into_inner()
    }

    pub fn next_page_id(&self) -> Option<PageId> {
        read_page_id(self.page.data.as_ref(), NEXT_PAGE_ID_OFFSET)
    }

    fn pair_size(&self) -> usize {
        self.key_size() + ROW_ID_SIZE
    }

    fn pair_offset(&self, index: usize) -> usize {
        LEAF_HEADER_SIZE + index * self.pair_size()
    }

    pub fn key_at(&self, index: usize) -> &[u8] {
        let offset = self.pair_offset(index);
        &self.page.data.as_ref()[offset..offset + self.key_size()]
    }

    pub fn value_at(&self, index: usize) -> RowId {
        let offset = self.pair_offset(index) + self.key_size();
        let data = self.page.data.as_ref();
        RowId::new(
            PageId(LittleEndian::read_u32(&data[offset..])),
            LittleEndian::read_u32(&data[offset + 4..]),
        )
    }

    pub fn item(&self, index: usize) -> (&[u8], RowId) {
        (self.key_at(index), self.value_at(index))
    }

    /// First index whose key is greater than or equal to `key`; `size` if
    /// every key is smaller.
    pub fn key_index<F>(&self, key: &[u8], cmp: F) -> usize
    where
        F: Fn(&[u8], &[u8]) -> Ordering,
    {
        let mut low = 0;
        let mut high = self.size();
        while low < high {
            let mid = low + (high - low) / 2;
            if cmp(self.key_at(mid), key) == Ordering::Less {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        low
    }

    pub fn lookup<F>(&self, key: &[u8], cmp: F) -> Option<RowId>
    where
        F: Fn(&[u8], &[u8]) -> Ordering,
    {
        let index = self.key_index(key, &cmp);
        (index < self.size() && cmp(self.key_at(index), key) == Ordering::Equal)
            .then(|| self.value_at(index))
    }
}

impl<D: AsRef<[u8]> + AsMut<[u8]>> BTreeLeafPage<D> {
    pub fn init(
        &mut self,
        page_id: PageId,
        parent_page_id: Option<PageId>,
        key_size: usize,
        max_size: usize,
    ) {
        self.page
            .init_header(BTreePageType::Leaf, page_id, parent_page_id, key_size, max_size);
        self.set_next_page_id(None);
    }

    pub fn set_next_page_id(&mut self, next: Option<PageId>) {
        write_page_id(self.page.data.as_mut(), NEXT_PAGE_ID_OFFSET, next);
    }

    fn set_pair_at(&mut self, index: usize, key: &[u8], value: RowId) {
        let offset = self.pair_offset(index);
        let key_size = self.key_size();
        let data = self.page.data.as_mut();
        data[offset..offset + key_size].copy_from_slice(&key[..key_size]);
        LittleEndian::write_u32(&mut data[offset + key_size..], value.page_id.0);
        LittleEndian::write_u32(&mut data[offset + key_size + 4..], value.slot_num);
    }

    fn shift_right(&mut self, from: usize) {
        let size = self.size();
        let start = self.pair_offset(from);
        let end = self.pair_offset(size);
        let pair_size = self.pair_size();
        self.page
            .data
            .as_mut()
            .copy_within(start..end, start + pair_size);
    }

    fn remove_at(&mut self, index: usize) {
        let size = self.size();
        let start = self.pair_offset(index + 1);
        let end = self.pair_offset(size);
        let dest = self.pair_offset(index);
        self.page.data.as_mut().copy_within(start..end, dest);
        self.set_size(size - 1);
    }

    /// Insert in sorted position. The caller rejects duplicates beforehand.
    /// Returns the new size, which may exceed `max_size` by one.
    pub fn insert<F>(&mut self, key: &[u8], value: RowId, cmp: F) -> usize
    where
        F: Fn(&[u8], &[u8]) -> Ordering,
    {
        let index = self.key_index(key, cmp);
        self.shift_right(index);
        self.set_pair_at(index, key, value);
        let size = self.size() + 1;
        self.set_size(size);
        size
    }

    /// Delete `key` if present. Returns the size afterwards.
    pub fn remove_and_delete_record<F>(&mut self, key: &[u8], cmp: F) -> usize
    where
        F: Fn(&[u8], &[u8]) -> Ordering,
    {
        let index = self.key_index(key, &cmp);
        if index < self.size() && cmp(self.key_at(index), key) == Ordering::Equal {
            self.remove_at(index);
        }
        self.size()
    }

    /// Move the upper half into the empty right sibling `recipient`. The
    /// caller links the sibling into the leaf chain.
    pub fn move_half_to<E>(&mut self, recipient: &mut BTreeLeafPage<E>)
    where
        E: AsRef<[u8]> + AsMut<[u8]>,
    {
        let size = self.size();
        let keep = size / 2;
        self.copy_pairs_to(keep, size - keep, recipient, 0);
        recipient.set_size(size - keep);
        self.set_size(keep);
    }

    /// Append every pair to the left sibling `recipient`, which takes over
    /// this page's place in the leaf chain.
    pub fn move_all_to<E>(&mut self, recipient: &mut BTreeLeafPage<E>)
    where
        E: AsRef<[u8]> + AsMut<[u8]>,
    {
        let size = self.size();
        let start = recipient.size();
        self.copy_pairs_to(0, size, recipient, start);
        recipient.set_size(start + size);
        recipient.set_next_page_id(self.next_page_id());
        self.set_size(0);
    }

    /// Move the first pair to the end of the left sibling `recipient`.
    pub fn move_first_to_end_of<E>(&mut self, recipient: &mut BTreeLeafPage<E>)
    where
        E: AsRef<[u8]> + AsMut<[u8]>,
    {
        let end = recipient.size();
        self.copy_pairs_to(0, 1, recipient, end);
        recipient.set_size(end + 1);
        self.remove_at(0);
    }

    /// Move the last pair to the front of the right sibling `recipient`.
    pub fn move_last_to_front_of<E>(&mut self, recipient: &mut BTreeLeafPage<E>)
    where
        E: AsRef<[u8]> + AsMut<[u8]>,
    {
        let last = self.size() - 1;
        recipient.shift_right(0);
        self.copy_pairs_to(last, 1, recipient, 0);
        let size = recipient.size();
        recipient.set_size(size + 1);
        self.set_size(last);
    }

    fn copy_pairs_to<E>(&self, from: usize, count: usize, recipient: &mut BTreeLeafPage<E>, to: usize)
    where
        E: AsRef<[u8]> + AsMut<[u8]>,
    {
        let src = self.pair_offset(from);
        let len = count * self.pair_size();
        let dest = recipient.pair_offset(to);
        recipient.page.data.as_mut()[dest..dest + len]
            .copy_from_slice(&self.page.data.as_ref()[src..src + len]);
    }
}

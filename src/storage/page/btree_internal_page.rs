//! B+ tree internal page.
//!
//! After the common header the page stores `size` packed `(key, child)`
//! pairs, each `key_size + 4` bytes wide. The key of pair 0 is unused: child
//! 0 covers everything below key 1, child `i` covers `[key i, key i+1)`.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::btree_page::{BTreePage, BTreePageType, BTREE_HEADER_SIZE};
use crate::storage::page::PageId;
use crate::storage::PAGE_SIZE;
use byteorder::{ByteOrder, LittleEndian};
use std::cmp::Ordering;
use std::ops::{Deref, DerefMut};

const CHILD_SIZE: usize = 4;

/// Largest max size that still leaves room for the one overflow entry a
/// split needs. `None` when not even one entry fits.
pub fn internal_max_size_for(key_size: usize) -> Option<usize> {
    ((PAGE_SIZE - BTREE_HEADER_SIZE) / (key_size + CHILD_SIZE)).checked_sub(1)
}

pub struct BTreeInternalPage<D> {
    page: BTreePage<D>,
}

impl<D> Deref for BTreeInternalPage<D> {
    type Target = BTreePage<D>;

    fn deref(&self) -> &Self::Target {
        &self.page
    }
}

impl<D> DerefMut for BTreeInternalPage<D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.page
    }
}

impl<D: AsRef<[u8]>> BTreeInternalPage<D> {
    /// View `data` as an internal page without checking the type tag.
    pub fn from_data(data: D) -> Self {
        Self {
            page: BTreePage::from_data(data),
        }
    }

    /// View `data` as an internal page, failing on any other type tag.
    pub fn from_data_checked(data: D) -> StorageResult<Self> {
        let page = BTreePage::from_data(data);
        page.expect_type(BTreePageType::Internal)?;
        Ok(Self { page })
    }

    pub fn into_inner(self) -> D {
        self.page.into_inner()
    }

    fn pair_size(&self) -> usize {
        self.key_size() + CHILD_SIZE
    }

    fn pair_offset(&self, index: usize) -> usize {
        BTREE_HEADER_SIZE + index * self.pair_size()
    }

    pub fn key_at(&self, index: usize) -> &[u8] {
        let offset = self.pair_offset(index);
        &self.page.data.as_ref()[offset..offset + self.key_size()]
    }

    pub fn value_at(&self, index: usize) -> PageId {
        let offset = self.pair_offset(index) + self.key_size();
        PageId(LittleEndian::read_u32(&self.page.data.as_ref()[offset..]))
    }

    /// Position of `child` among this page's children.
    pub fn value_index(&self, child: PageId) -> Option<usize> {
        (0..self.size()).find(|&i| self.value_at(i) == child)
    }

    pub fn children(&self) -> Vec<PageId> {
        (0..self.size()).map(|i| self.value_at(i)).collect()
    }

    /// Child whose subtree may contain `key`: the rightmost child whose
    /// separator is less than or equal to `key`.
    pub fn lookup<F>(&self, key: &[u8], cmp: F) -> PageId
    where
        F: Fn(&[u8], &[u8]) -> Ordering,
    {
        // First index in 1..size whose key is greater than the search key.
        let mut low = 1;
        let mut high = self.size();
        while low < high {
            let mid = low + (high - low) / 2;
            if cmp(self.key_at(mid), key) == Ordering::Greater {
                high = mid;
            } else {
                low = mid + 1;
            }
        }
        self.value_at(low - 1)
    }
}

impl<D: AsRef<[u8]> + AsMut<[u8]>> BTreeInternalPage<D> {
    pub fn init(
        &mut self,
        page_id: PageId,
        parent_page_id: Option<PageId>,
        key_size: usize,
        max_size: usize,
    ) {
        self.page.init_header(
            BTreePageType::Internal,
            page_id,
            parent_page_id,
            key_size,
            max_size,
        );
    }

    pub fn set_key_at(&mut self, index: usize, key: &[u8]) {
        let offset = self.pair_offset(index);
        let key_size = self.key_size();
        self.page.data.as_mut()[offset..offset + key_size].copy_from_slice(&key[..key_size]);
    }

    pub fn set_value_at(&mut self, index: usize, child: PageId) {
        let offset = self.pair_offset(index) + self.key_size();
        LittleEndian::write_u32(&mut self.page.data.as_mut()[offset..], child.0);
    }

    /// Fill a fresh root with two children after its only child split.
    pub fn populate_new_root(&mut self, left: PageId, key: &[u8], right: PageId) {
        self.set_value_at(0, left);
        self.set_key_at(1, key);
        self.set_value_at(1, right);
        self.set_size(2);
    }

    /// Insert `(key, new_child)` right after `old_child`. Returns the new size.
    pub fn insert_node_after(
        &mut self,
        old_child: PageId,
        key: &[u8],
        new_child: PageId,
    ) -> StorageResult<usize> {
        let index = self.value_index(old_child).ok_or_else(|| {
            StorageError::Corrupted(format!(
                "page {} is not a child of internal page {}",
                old_child,
                self.page_id()
            ))
        })? + 1;

        let size = self.size();
        let start = self.pair_offset(index);
        let end = self.pair_offset(size);
        let pair_size = self.pair_size();
        self.page
            .data
            .as_mut()
            .copy_within(start..end, start + pair_size);

        self.set_key_at(index, key);
        self.set_value_at(index, new_child);
        self.set_size(size + 1);
        Ok(size + 1)
    }

    /// Drop the pair at `index`, closing the gap.
    pub fn remove(&mut self, index: usize) {
        let size = self.size();
        let start = self.pair_offset(index + 1);
        let end = self.pair_offset(size);
        let dest = self.pair_offset(index);
        self.page.data.as_mut().copy_within(start..end, dest);
        self.set_size(size - 1);
    }

    /// Empty a root that is down to one child and hand that child back.
    pub fn remove_and_return_only_child(&mut self) -> PageId {
        let child = self.value_at(0);
        self.set_size(0);
        child
    }

    /// Move the upper half of the pairs into the empty `recipient`. The key
    /// of the recipient's first pair is the separator to push up. Returns
    /// the children that changed parent.
    pub fn move_half_to<E>(&mut self, recipient: &mut BTreeInternalPage<E>) -> Vec<PageId>
    where
        E: AsRef<[u8]> + AsMut<[u8]>,
    {
        let size = self.size();
        let keep = size / 2;
        self.copy_pairs_to(keep, size - keep, recipient, 0);
        recipient.set_size(size - keep);
        self.set_size(keep);
        recipient.children()
    }

    /// Append every pair to `recipient`, using `middle_key` as the separator
    /// for this page's first child. Returns the children that changed parent.
    pub fn move_all_to<E>(
        &mut self,
        recipient: &mut BTreeInternalPage<E>,
        middle_key: &[u8],
    ) -> Vec<PageId>
    where
        E: AsRef<[u8]> + AsMut<[u8]>,
    {
        self.set_key_at(0, middle_key);
        let size = self.size();
        let start = recipient.size();
        self.copy_pairs_to(0, size, recipient, start);
        recipient.set_size(start + size);
        let moved = self.children();
        self.set_size(0);
        moved
    }

    /// Rotate this page's first child to the end of the left sibling
    /// `recipient`. `middle_key` is the parent's separator between the two
    /// pages; afterwards this page's key 0 is the new separator. Returns the
    /// moved child.
    pub fn move_first_to_end_of<E>(
        &mut self,
        recipient: &mut BTreeInternalPage<E>,
        middle_key: &[u8],
    ) -> PageId
    where
        E: AsRef<[u8]> + AsMut<[u8]>,
    {
        let child = self.value_at(0);
        let end = recipient.size();
        recipient.set_key_at(end, middle_key);
        recipient.set_value_at(end, child);
        recipient.set_size(end + 1);
        self.remove(0);
        child
    }

    /// Rotate this page's last child to the front of the right sibling
    /// `recipient`. `middle_key` is the parent's separator between the two
    /// pages; afterwards the recipient's key 0 is the new separator. Returns
    /// the moved child.
    pub fn move_last_to_front_of<E>(
        &mut self,
        recipient: &mut BTreeInternalPage<E>,
        middle_key: &[u8],
    ) -> PageId
    where
        E: AsRef<[u8]> + AsMut<[u8]>,
    {
        let last = self.size() - 1;
        let child = self.value_at(last);
        let last_key = self.key_at(last).to_vec();

        let size = recipient.size();
        let start = recipient.pair_offset(0);
        let end = recipient.pair_offset(size);
        let pair_size = recipient.pair_size();
        recipient
            .page
            .data
            .as_mut()
            .copy_within(start..end, start + pair_size);
        recipient.set_key_at(1, middle_key);
        recipient.set_key_at(0, &last_key);
        recipient.set_value_at(0, child);
        recipient.set_size(size + 1);

        self.set_size(last);
        child
    }

    fn copy_pairs_to<E>(
        &self,
        from: usize,
        count: usize,
        recipient: &mut BTreeInternalPage<E>,
        to: usize,
    ) where
        E: AsRef<[u8]> + AsMut<[u8]>,
    {
        let src = self.pair_offset(from);
        let len = count * self.pair_size();
        let dest = recipient.pair_offset(to);
        recipient.page.data.as_mut()[dest..dest + len]
            .copy_from_slice(&self.page.data.as_ref()[src..src + len]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_SIZE: usize = 4;

    fn key(k: u32) -> [u8; KEY_SIZE] {
        k.to_be_bytes()
    }

    fn cmp(a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn internal(page_id: u32, max_size: usize) -> BTreeInternalPage<Vec<u8>> {
        let mut page = BTreeInternalPage::from_data(vec![0u8; PAGE_SIZE]);
        page.init(PageId(page_id), None, KEY_SIZE, max_size);
        page
    }

    /// Children 100, 101, ... separated by keys 10, 20, ...
    fn filled(page_id: u32, children: u32) -> BTreeInternalPage<Vec<u8>> {
        let mut page = internal(page_id, 8);
        page.populate_new_root(PageId(100), &key(10), PageId(101));
        for i in 2..children {
            page.insert_node_after(PageId(99 + i), &key(10 * i), PageId(100 + i))
                .unwrap();
        }
        page
    }

    #[test]
    fn test_populate_new_root() {
        let mut page = internal(5, 4);
        page.populate_new_root(PageId(1), &key(50), PageId(2));

        assert_eq!(page.size(), 2);
        assert_eq!(page.value_at(0), PageId(1));
        assert_eq!(page.key_at(1), &key(50));
        assert_eq!(page.value_at(1), PageId(2));
        assert_eq!(page.value_index(PageId(2)), Some(1));
        assert_eq!(page.value_index(PageId(3)), None);
    }

    #[test]
    fn test_lookup_routes_to_rightmost_le() {
        let page = filled(1, 4);

        assert_eq!(page.lookup(&key(5), cmp), PageId(100));
        assert_eq!(page.lookup(&key(10), cmp), PageId(101));
        assert_eq!(page.lookup(&key(15), cmp), PageId(101));
        assert_eq!(page.lookup(&key(30), cmp), PageId(103));
        assert_eq!(page.lookup(&key(99), cmp), PageId(103));
    }

    #[test]
    fn test_insert_node_after_keeps_order() {
        let mut page = filled(1, 3);
        let size = page
            .insert_node_after(PageId(100), &key(5), PageId(200))
            .unwrap();

        assert_eq!(size, 4);
        assert_eq!(
            page.children(),
            vec![PageId(100), PageId(200), PageId(101), PageId(102)]
        );
        assert_eq!(page.key_at(1), &key(5));
        assert_eq!(page.key_at(2), &key(10));

        assert!(page
            .insert_node_after(PageId(77), &key(1), PageId(300))
            .is_err());
    }

    #[test]
    fn test_remove_and_only_child() {
        let mut page = filled(1, 3);
        page.remove(1);
        assert_eq!(page.children(), vec![PageId(100), PageId(102)]);
        assert_eq!(page.key_at(1), &key(20));

        page.remove(1);
        assert_eq!(page.size(), 1);
        assert_eq!(page.remove_and_return_only_child(), PageId(100));
        assert_eq!(page.size(), 0);
    }

    #[test]
    fn test_move_half_to() {
        let mut left = filled(1, 5);
        let mut right = internal(2, 8);

        let moved = left.move_half_to(&mut right);

        assert_eq!(left.size(), 2);
        assert_eq!(right.size(), 3);
        assert_eq!(moved, vec![PageId(102), PageId(103), PageId(104)]);
        // Separator to push up
        assert_eq!(right.key_at(0), &key(20));
        assert_eq!(right.key_at(1), &key(30));
    }

    #[test]
    fn test_move_all_to() {
        let mut left = filled(1, 2);
        let mut right = internal(2, 8);
        right.populate_new_root(PageId(200), &key(60), PageId(201));

        let moved = right.move_all_to(&mut left, &key(50));

        assert_eq!(moved, vec![PageId(200), PageId(201)]);
        assert_eq!(right.size(), 0);
        assert_eq!(
            left.children(),
            vec![PageId(100), PageId(101), PageId(200), PageId(201)]
        );
        assert_eq!(left.key_at(2), &key(50));
        assert_eq!(left.key_at(3), &key(60));
    }

    #[test]
    fn test_move_first_to_end_of() {
        let mut left = filled(1, 2);
        let mut right = internal(2, 8);
        right.populate_new_root(PageId(200), &key(60), PageId(201));
        right
            .insert_node_after(PageId(201), &key(70), PageId(202))
            .unwrap();

        let moved = right.move_first_to_end_of(&mut left, &key(50));

        assert_eq!(moved, PageId(200));
        assert_eq!(left.children(), vec![PageId(100), PageId(101), PageId(200)]);
        assert_eq!(left.key_at(2), &key(50));
        assert_eq!(right.children(), vec![PageId(201), PageId(202)]);
        // New separator between the two pages
        assert_eq!(right.key_at(0), &key(60));
        assert_eq!(right.key_at(1), &key(70));
    }

    #[test]
    fn test_move_last_to_front_of() {
        let mut left = filled(1, 3);
        let mut right = internal(2, 8);
        right.populate_new_root(PageId(200), &key(60), PageId(201));

        let moved = left.move_last_to_front_of(&mut right, &key(50));

        assert_eq!(moved, PageId(102));
        assert_eq!(left.children(), vec![PageId(100), PageId(101)]);
        assert_eq!(
            right.children(),
            vec![PageId(102), PageId(200), PageId(201)]
        );
        assert_eq!(right.key_at(0), &key(20));
        assert_eq!(right.key_at(1), &key(50));
        assert_eq!(right.key_at(2), &key(60));
    }

    #[test]
    fn test_checked_view_and_max_size() {
        let page = internal(3, 4);
        let raw = page.into_inner();
        assert!(BTreeInternalPage::from_data_checked(&raw[..]).is_ok());

        let zeroed = vec![0u8; PAGE_SIZE];
        assert!(BTreeInternalPage::from_data_checked(&zeroed[..]).is_err());

        let max = internal_max_size_for(KEY_SIZE).unwrap();
        assert!(BTREE_HEADER_SIZE + (max + 1) * (KEY_SIZE + CHILD_SIZE) <= PAGE_SIZE);
    }

    #[test]
    fn test_capacity_for_oversized_keys() {
        assert_eq!(internal_max_size_for(PAGE_SIZE), None);
        assert_eq!(internal_max_size_for(1400), Some(1));
    }
}

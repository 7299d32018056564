use crate::access::btree::key::GenericKey;
use crate::access::RowId;
use crate::storage::buffer::{BufferPoolManager, PageReadGuard};
use crate::storage::page::btree_leaf_page::BTreeLeafPage;
use crate::storage::page::PageId;
use anyhow::Result;
use std::marker::PhantomData;

/// Forward cursor over the leaf level of a B+ tree.
///
/// The leaf the cursor sits on stays pinned through its guard; moving to the
/// next leaf releases the previous one. The end position holds no page and
/// compares equal to [`crate::access::BPlusTree::end`]. Borrowing the tree
/// keeps structural changes out while the cursor is alive.
pub struct IndexIterator<'a> {
    buffer_pool: BufferPoolManager,
    leaf: Option<PageReadGuard>,
    slot: usize,
    _tree: PhantomData<&'a ()>,
}

impl<'a> IndexIterator<'a> {
    /// Position on `slot` of `leaf_id`, skipping forward if the slot is past
    /// the end of that leaf.
    pub(crate) fn new(
        buffer_pool: BufferPoolManager,
        leaf_id: PageId,
        slot: usize,
    ) -> Result<Self> {
        let guard = buffer_pool.fetch_page(leaf_id)?;
        BTreeLeafPage::from_data_checked(&guard[..])?;

        let mut iter = Self {
            buffer_pool,
            leaf: Some(guard),
            slot,
            _tree: PhantomData,
        };
        iter.skip_exhausted_leaves()?;
        Ok(iter)
    }

    pub(crate) fn end(buffer_pool: BufferPoolManager) -> Self {
        Self {
            buffer_pool,
            leaf: None,
            slot: 0,
            _tree: PhantomData,
        }
    }

    pub fn is_end(&self) -> bool {
        self.leaf.is_none()
    }

    /// Page the cursor is on, `None` at the end.
    pub fn page_id(&self) -> Option<PageId> {
        self.leaf.as_ref().map(|guard| guard.page_id())
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Entry under the cursor.
    pub fn current(&self) -> Option<(GenericKey, RowId)> {
        let guard = self.leaf.as_ref()?;
        let leaf = BTreeLeafPage::from_data(&guard[..]);
        let (key, row_id) = leaf.item(self.slot);
        Some((GenericKey::from_bytes(key), row_id))
    }

    /// Step to the next entry, crossing into the next leaf when needed.
    pub fn advance(&mut self) -> Result<()> {
        if self.leaf.is_none() {
            return Ok(());
        }
        self.slot += 1;
        self.skip_exhausted_leaves()
    }

    fn skip_exhausted_leaves(&mut self) -> Result<()> {
        while let Some(guard) = &self.leaf {
            let leaf = BTreeLeafPage::from_data(&guard[..]);
            if self.slot < leaf.size() {
                return Ok(());
            }
            let next = leaf.next_page_id();

            // Unpin before pinning the next leaf.
            self.leaf = None;
            self.slot = 0;
            if let Some(next_id) = next {
                self.leaf = Some(self.buffer_pool.fetch_page(next_id)?);
            }
        }
        Ok(())
    }
}

impl PartialEq for IndexIterator<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.page_id() == other.page_id() && self.slot == other.slot
    }
}

impl Iterator for IndexIterator<'_> {
    type Item = Result<(GenericKey, RowId)>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.current()?;
        if let Err(e) = self.advance() {
            self.leaf = None;
            self.slot = 0;
            return Some(Err(e));
        }
        Some(Ok(item))
    }
}

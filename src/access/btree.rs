pub mod iterator;
pub mod key;

pub use self::iterator::IndexIterator;
pub use self::key::{GenericKey, KeyManager};

use crate::access::RowId;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::btree_internal_page::{internal_max_size_for, BTreeInternalPage};
use crate::storage::page::btree_leaf_page::{leaf_max_size_for, BTreeLeafPage};
use crate::storage::page::btree_page::{BTreePage, BTreePageType};
use crate::storage::page::{IndexRootsPage, PageId, INDEX_ROOTS_PAGE_ID};
use anyhow::{anyhow, bail, Context, Result};
use log::debug;
use std::cmp::Ordering;
use std::collections::VecDeque;

/// Disk-resident B+ tree mapping unique fixed-width keys to [`RowId`]s.
///
/// Every node is one buffer pool page. The root page id is mirrored in the
/// index roots page whenever it changes, so [`BPlusTree::new`] can reopen an
/// existing index. Structural changes take `&mut self`: one writer per index.
pub struct BPlusTree {
    index_id: u32,
    buffer_pool: BufferPoolManager,
    key_manager: KeyManager,
    root_page_id: Option<PageId>,
    leaf_max_size: usize,
    internal_max_size: usize,
}

impl BPlusTree {
    /// Open the index `index_id`, picking up its root from the index roots
    /// page. Max sizes default to what fits in a page for this key width.
    pub fn new(
        index_id: u32,
        buffer_pool: BufferPoolManager,
        key_manager: KeyManager,
        leaf_max_size: Option<usize>,
        internal_max_size: Option<usize>,
    ) -> Result<Self> {
        let (leaf_max_size, internal_max_size) =
            Self::resolve_max_sizes(key_manager.key_size(), leaf_max_size, internal_max_size)?;

        let root_page_id = {
            let guard = buffer_pool
                .fetch_page(INDEX_ROOTS_PAGE_ID)
                .context("Failed to read index roots page")?;
            IndexRootsPage::from_data(&guard[..]).get_root_id(index_id)
        };

        Ok(Self {
            index_id,
            buffer_pool,
            key_manager,
            root_page_id,
            leaf_max_size,
            internal_max_size,
        })
    }

    /// Check requested fan-outs against what a page can hold for `key_size`
    /// byte keys, filling in the page-derived default for `None`.
    pub fn resolve_max_sizes(
        key_size: usize,
        leaf_max_size: Option<usize>,
        internal_max_size: Option<usize>,
    ) -> Result<(usize, usize)> {
        let leaf_limit = leaf_max_size_for(key_size)
            .filter(|&limit| limit >= 2)
            .ok_or_else(|| anyhow!("{} byte keys are too wide for a leaf page", key_size))?;
        let internal_limit = internal_max_size_for(key_size)
            .filter(|&limit| limit >= 3)
            .ok_or_else(|| anyhow!("{} byte keys are too wide for an internal page", key_size))?;
        let leaf_max_size = leaf_max_size.unwrap_or(leaf_limit);
        let internal_max_size = internal_max_size.unwrap_or(internal_limit);

        if !(2..=leaf_limit).contains(&leaf_max_size) {
            bail!(
                "Leaf max size {} out of range 2..={} for {} byte keys",
                leaf_max_size,
                leaf_limit,
                key_size
            );
        }
        if !(3..=internal_limit).contains(&internal_max_size) {
            bail!(
                "Internal max size {} out of range 3..={} for {} byte keys",
                internal_max_size,
                internal_limit,
                key_size
            );
        }
        Ok((leaf_max_size, internal_max_size))
    }

    pub fn index_id(&self) -> u32 {
        self.index_id
    }

    pub fn key_manager(&self) -> &KeyManager {
        &self.key_manager
    }

    pub fn root_page_id(&self) -> Option<PageId> {
        self.root_page_id
    }

    pub fn leaf_max_size(&self) -> usize {
        self.leaf_max_size
    }

    pub fn internal_max_size(&self) -> usize {
        self.internal_max_size
    }

    pub fn is_empty(&self) -> bool {
        self.root_page_id.is_none()
    }

    fn comparator(&self) -> impl Fn(&[u8], &[u8]) -> Ordering + '_ {
        move |a: &[u8], b: &[u8]| self.key_manager.compare(a, b)
    }

    fn check_key(&self, key: &GenericKey) -> Result<()> {
        if key.len() != self.key_manager.key_size() {
            bail!(
                "Key is {} bytes, index {} expects {}",
                key.len(),
                self.index_id,
                self.key_manager.key_size()
            );
        }
        Ok(())
    }

    /// Point lookup.
    pub fn get_value(&self, key: &GenericKey) -> Result<Option<RowId>> {
        self.check_key(key)?;
        if self.is_empty() {
            return Ok(None);
        }

        let leaf_id = self.find_leaf_page_id(Some(key.data()))?;
        let guard = self.buffer_pool.fetch_page(leaf_id)?;
        let leaf = BTreeLeafPage::from_data_checked(&guard[..])?;
        Ok(leaf.lookup(key.data(), self.comparator()))
    }

    /// Descend from the root to the leaf that may hold `key`, or to the
    /// leftmost leaf when `key` is `None`. Holds one page at a time.
    fn find_leaf_page_id(&self, key: Option<&[u8]>) -> Result<PageId> {
        let mut page_id = self
            .root_page_id
            .ok_or_else(|| anyhow!("Index {} is empty", self.index_id))?;

        loop {
            let guard = self.buffer_pool.fetch_page(page_id)?;
            let page = BTreePage::from_data(&guard[..]);
            match page.page_type() {
                Some(BTreePageType::Leaf) => return Ok(page_id),
                Some(BTreePageType::Internal) => {
                    let internal = BTreeInternalPage::from_data(&guard[..]);
                    page_id = match key {
                        Some(key) => internal.lookup(key, self.comparator()),
                        None => internal.value_at(0),
                    };
                }
                None => bail!("Page {} is not a B+ tree page", page_id),
            }
        }
    }

    /// Insert a unique key. Returns `false` if the key is already present.
    pub fn insert(&mut self, key: &GenericKey, row_id: RowId) -> Result<bool> {
        self.check_key(key)?;
        if self.is_empty() {
            self.start_new_tree(key, row_id)?;
            return Ok(true);
        }
        self.insert_into_leaf(key, row_id)
    }

    fn start_new_tree(&mut self, key: &GenericKey, row_id: RowId) -> Result<()> {
        let (root_id, mut guard) = self
            .buffer_pool
            .new_page()
            .context("Failed to allocate root leaf")?;
        {
            let mut leaf = BTreeLeafPage::from_data(&mut guard[..]);
            leaf.init(
                root_id,
                None,
                self.key_manager.key_size(),
                self.leaf_max_size,
            );
            leaf.insert(key.data(), row_id, self.comparator());
        }
        drop(guard);

        self.root_page_id = Some(root_id);
        self.persist_root()?;
        debug!("index {}: new root leaf {}", self.index_id, root_id);
        Ok(())
    }

    fn insert_into_leaf(&mut self, key: &GenericKey, row_id: RowId) -> Result<bool> {
        let leaf_id = self.find_leaf_page_id(Some(key.data()))?;
        let mut guard = self.buffer_pool.fetch_page_write(leaf_id)?;

        if BTreeLeafPage::from_data_checked(&guard[..])?
            .lookup(key.data(), self.comparator())
            .is_some()
        {
            return Ok(false);
        }

        let size = BTreeLeafPage::from_data(&mut guard[..]).insert(
            key.data(),
            row_id,
            self.comparator(),
        );
        if size <= self.leaf_max_size {
            return Ok(true);
        }

        let (sibling_id, mut sibling_guard) = self
            .buffer_pool
            .new_page()
            .context("Failed to allocate leaf for split")?;
        let (separator, parent_id) = {
            let mut leaf = BTreeLeafPage::from_data(&mut guard[..]);
            let mut sibling = BTreeLeafPage::from_data(&mut sibling_guard[..]);
            sibling.init(
                sibling_id,
                leaf.parent_page_id(),
                self.key_manager.key_size(),
                self.leaf_max_size,
            );
            leaf.move_half_to(&mut sibling);
            sibling.set_next_page_id(leaf.next_page_id());
            leaf.set_next_page_id(Some(sibling_id));
            (sibling.key_at(0).to_vec(), leaf.parent_page_id())
        };
        drop(sibling_guard);
        drop(guard);
        debug!(
            "index {}: split leaf {} into {}",
            self.index_id, leaf_id, sibling_id
        );

        self.insert_into_parent(leaf_id, separator, sibling_id, parent_id)?;
        Ok(true)
    }

    /// Register `right`, freshly split off `left`, in their parent. Walks up
    /// while parents overflow and grows a new root when the old one splits.
    fn insert_into_parent(
        &mut self,
        mut left: PageId,
        mut separator: Vec<u8>,
        mut right: PageId,
        mut parent: Option<PageId>,
    ) -> Result<()> {
        loop {
            let Some(parent_id) = parent else {
                let (root_id, mut guard) = self
                    .buffer_pool
                    .new_page()
                    .context("Failed to allocate new root")?;
                {
                    let mut root = BTreeInternalPage::from_data(&mut guard[..]);
                    root.init(
                        root_id,
                        None,
                        self.key_manager.key_size(),
                        self.internal_max_size,
                    );
                    root.populate_new_root(left, &separator, right);
                }
                drop(guard);

                self.set_parent(left, Some(root_id))?;
                self.set_parent(right, Some(root_id))?;
                self.root_page_id = Some(root_id);
                self.persist_root()?;
                debug!("index {}: new root {}", self.index_id, root_id);
                return Ok(());
            };

            let mut guard = self.buffer_pool.fetch_page_write(parent_id)?;
            let size = BTreeInternalPage::from_data_checked(&mut guard[..])?
                .insert_node_after(left, &separator, right)?;
            if size <= self.internal_max_size {
                return Ok(());
            }

            let (sibling_id, mut sibling_guard) = self
                .buffer_pool
                .new_page()
                .context("Failed to allocate internal page for split")?;
            let (moved, middle, grandparent) = {
                let mut node = BTreeInternalPage::from_data(&mut guard[..]);
                let mut sibling = BTreeInternalPage::from_data(&mut sibling_guard[..]);
                sibling.init(
                    sibling_id,
                    node.parent_page_id(),
                    self.key_manager.key_size(),
                    self.internal_max_size,
                );
                let moved = node.move_half_to(&mut sibling);
                (moved, sibling.key_at(0).to_vec(), node.parent_page_id())
            };
            drop(sibling_guard);
            drop(guard);
            debug!(
                "index {}: split internal {} into {}",
                self.index_id, parent_id, sibling_id
            );

            for child in moved {
                self.set_parent(child, Some(sibling_id))?;
            }

            left = parent_id;
            separator = middle;
            right = sibling_id;
            parent = grandparent;
        }
    }

    fn set_parent(&self, page_id: PageId, parent: Option<PageId>) -> Result<()> {
        let mut guard = self.buffer_pool.fetch_page_write(page_id)?;
        BTreePage::from_data(&mut guard[..]).set_parent_page_id(parent);
        Ok(())
    }

    /// Mirror the current root into the index roots page.
    fn persist_root(&self) -> Result<()> {
        let mut guard = self.buffer_pool.fetch_page_write(INDEX_ROOTS_PAGE_ID)?;
        let mut roots = IndexRootsPage::from_data(&mut guard[..]);
        match self.root_page_id {
            Some(root) => {
                if !roots.update(self.index_id, root) {
                    roots.insert(self.index_id, root)?;
                }
            }
            None => {
                roots.delete(self.index_id);
            }
        }
        Ok(())
    }

    /// Delete `key`. Returns whether it was present.
    pub fn remove(&mut self, key: &GenericKey) -> Result<bool> {
        self.check_key(key)?;
        if self.is_empty() {
            return Ok(false);
        }

        let leaf_id = self.find_leaf_page_id(Some(key.data()))?;
        let underflow = {
            let mut guard = self.buffer_pool.fetch_page_write(leaf_id)?;
            if BTreeLeafPage::from_data_checked(&guard[..])?
                .lookup(key.data(), self.comparator())
                .is_none()
            {
                return Ok(false);
            }

            let mut leaf = BTreeLeafPage::from_data(&mut guard[..]);
            let size = leaf.remove_and_delete_record(key.data(), self.comparator());
            if leaf.is_root() {
                size == 0
            } else {
                size < leaf.min_size()
            }
        };

        if underflow {
            self.coalesce_or_redistribute(leaf_id)?;
        }
        Ok(true)
    }

    /// Restore occupancy starting at `node_id` and walking up while merges
    /// leave parents under-full. Each round holds the parent and two
    /// siblings; everything is released before moving up a level.
    fn coalesce_or_redistribute(&mut self, mut node_id: PageId) -> Result<()> {
        loop {
            let (parent, size, min_size, is_leaf) = {
                let guard = self.buffer_pool.fetch_page(node_id)?;
                let page = BTreePage::from_data(&guard[..]);
                (
                    page.parent_page_id(),
                    page.size(),
                    page.min_size(),
                    page.is_leaf(),
                )
            };

            let Some(parent_id) = parent else {
                return self.adjust_root(node_id);
            };
            if size >= min_size {
                return Ok(());
            }

            let mut parent_guard = self.buffer_pool.fetch_page_write(parent_id)?;
            let (index, sibling_id) = {
                let parent = BTreeInternalPage::from_data_checked(&parent_guard[..])?;
                let index = parent.value_index(node_id).ok_or_else(|| {
                    anyhow!("Page {} is not a child of its parent {}", node_id, parent_id)
                })?;
                let sibling_index = if index == 0 { 1 } else { index - 1 };
                (index, parent.value_at(sibling_index))
            };

            // The left page always survives a merge so the leaf chain stays intact.
            let (left_id, right_id, right_index) = if index == 0 {
                (node_id, sibling_id, 1)
            } else {
                (sibling_id, node_id, index)
            };

            let mut left_guard = self.buffer_pool.fetch_page_write(left_id)?;
            let mut right_guard = self.buffer_pool.fetch_page_write(right_id)?;
            let (left_size, right_size, max_size) = {
                let left = BTreePage::from_data(&left_guard[..]);
                let right = BTreePage::from_data(&right_guard[..]);
                (left.size(), right.size(), left.max_size())
            };

            if left_size + right_size <= max_size {
                let moved = if is_leaf {
                    let mut left = BTreeLeafPage::from_data(&mut left_guard[..]);
                    BTreeLeafPage::from_data(&mut right_guard[..]).move_all_to(&mut left);
                    Vec::new()
                } else {
                    let middle = BTreeInternalPage::from_data(&parent_guard[..])
                        .key_at(right_index)
                        .to_vec();
                    let mut left = BTreeInternalPage::from_data(&mut left_guard[..]);
                    BTreeInternalPage::from_data(&mut right_guard[..])
                        .move_all_to(&mut left, &middle)
                };
                BTreeInternalPage::from_data(&mut parent_guard[..]).remove(right_index);
                drop(left_guard);
                drop(right_guard);
                drop(parent_guard);

                for child in moved {
                    self.set_parent(child, Some(left_id))?;
                }
                if !self.buffer_pool.delete_page(right_id)? {
                    bail!("Merged page {} is still pinned", right_id);
                }
                debug!(
                    "index {}: merged page {} into {}",
                    self.index_id, right_id, left_id
                );

                node_id = parent_id;
                continue;
            }

            let moved = if is_leaf {
                let mut left = BTreeLeafPage::from_data(&mut left_guard[..]);
                let mut right = BTreeLeafPage::from_data(&mut right_guard[..]);
                if index == 0 {
                    right.move_first_to_end_of(&mut left);
                } else {
                    left.move_last_to_front_of(&mut right);
                }
                BTreeInternalPage::from_data(&mut parent_guard[..])
                    .set_key_at(right_index, right.key_at(0));
                None
            } else {
                let mut parent = BTreeInternalPage::from_data(&mut parent_guard[..]);
                let middle = parent.key_at(right_index).to_vec();
                let mut left = BTreeInternalPage::from_data(&mut left_guard[..]);
                let mut right = BTreeInternalPage::from_data(&mut right_guard[..]);
                let moved = if index == 0 {
                    (right.move_first_to_end_of(&mut left, &middle), left_id)
                } else {
                    (left.move_last_to_front_of(&mut right, &middle), right_id)
                };
                parent.set_key_at(right_index, right.key_at(0));
                Some(moved)
            };
            drop(left_guard);
            drop(right_guard);
            drop(parent_guard);

            if let Some((child, new_parent)) = moved {
                self.set_parent(child, Some(new_parent))?;
            }
            debug!(
                "index {}: redistributed between {} and {}",
                self.index_id, left_id, right_id
            );
            return Ok(());
        }
    }

    /// Shrink the tree at the root: an internal root with a single child
    /// hands the root role to that child, an empty leaf root empties the tree.
    fn adjust_root(&mut self, root_id: PageId) -> Result<()> {
        let mut guard = self.buffer_pool.fetch_page_write(root_id)?;
        let (is_leaf, size) = {
            let page = BTreePage::from_data(&guard[..]);
            (page.is_leaf(), page.size())
        };

        if is_leaf && size == 0 {
            drop(guard);
            self.root_page_id = None;
            debug!("index {}: tree is now empty", self.index_id);
        } else if !is_leaf && size == 1 {
            let child =
                BTreeInternalPage::from_data(&mut guard[..]).remove_and_return_only_child();
            drop(guard);
            self.set_parent(child, None)?;
            self.root_page_id = Some(child);
            debug!("index {}: root collapsed into {}", self.index_id, child);
        } else {
            return Ok(());
        }

        self.persist_root()?;
        if !self.buffer_pool.delete_page(root_id)? {
            bail!("Old root {} is still pinned", root_id);
        }
        Ok(())
    }

    /// Cursor on the smallest key.
    pub fn begin(&self) -> Result<IndexIterator<'_>> {
        if self.is_empty() {
            return Ok(self.end());
        }
        let leaf_id = self.find_leaf_page_id(None)?;
        IndexIterator::new(self.buffer_pool.clone(), leaf_id, 0)
    }

    /// Cursor on the first key greater than or equal to `key`.
    pub fn begin_at(&self, key: &GenericKey) -> Result<IndexIterator<'_>> {
        self.check_key(key)?;
        if self.is_empty() {
            return Ok(self.end());
        }
        let leaf_id = self.find_leaf_page_id(Some(key.data()))?;
        let slot = {
            let guard = self.buffer_pool.fetch_page(leaf_id)?;
            BTreeLeafPage::from_data_checked(&guard[..])?.key_index(key.data(), self.comparator())
        };
        IndexIterator::new(self.buffer_pool.clone(), leaf_id, slot)
    }

    pub fn end(&self) -> IndexIterator<'_> {
        IndexIterator::end(self.buffer_pool.clone())
    }

    /// All entries in key order.
    pub fn iter(&self) -> Result<IndexIterator<'_>> {
        self.begin()
    }

    /// Number of levels; 0 for an empty tree.
    pub fn height(&self) -> Result<usize> {
        let mut height = 0;
        let mut next = self.root_page_id;
        while let Some(page_id) = next {
            let guard = self.buffer_pool.fetch_page(page_id)?;
            height += 1;
            let page = BTreePage::from_data(&guard[..]);
            next = match page.page_type() {
                Some(BTreePageType::Internal) => {
                    Some(BTreeInternalPage::from_data(&guard[..]).value_at(0))
                }
                Some(BTreePageType::Leaf) => None,
                None => bail!("Page {} is not a B+ tree page", page_id),
            };
        }
        Ok(height)
    }

    /// Free every page of the tree and forget its root.
    pub fn destroy(&mut self) -> Result<()> {
        let mut pages = Vec::new();
        let mut pending: Vec<PageId> = self.root_page_id.into_iter().collect();
        while let Some(page_id) = pending.pop() {
            let guard = self.buffer_pool.fetch_page(page_id)?;
            let page = BTreePage::from_data(&guard[..]);
            if page.page_type() == Some(BTreePageType::Internal) {
                pending.extend(BTreeInternalPage::from_data(&guard[..]).children());
            }
            pages.push(page_id);
        }

        self.root_page_id = None;
        self.persist_root()?;
        for page_id in &pages {
            if !self.buffer_pool.delete_page(*page_id)? {
                bail!("Cannot destroy index {}: page {} is pinned", self.index_id, page_id);
            }
        }
        debug!("index {}: destroyed {} pages", self.index_id, pages.len());
        Ok(())
    }

    /// Walk the whole tree checking key order and bounds, occupancy, parent
    /// pointers, uniform leaf depth, and the leaf chain.
    pub fn check_integrity(&self) -> Result<()> {
        let Some(root_id) = self.root_page_id else {
            return Ok(());
        };

        let mut leaves = Vec::new();
        let mut leaf_depth = None;
        self.check_subtree(root_id, None, None, None, 0, &mut leaf_depth, &mut leaves)?;

        for pair in leaves.windows(2) {
            let guard = self.buffer_pool.fetch_page(pair[0])?;
            let next = BTreeLeafPage::from_data(&guard[..]).next_page_id();
            if next != Some(pair[1]) {
                bail!(
                    "Leaf {} links to {:?}, expected {}",
                    pair[0],
                    next,
                    pair[1]
                );
            }
        }
        if let Some(&last) = leaves.last() {
            let guard = self.buffer_pool.fetch_page(last)?;
            if let Some(next) = BTreeLeafPage::from_data(&guard[..]).next_page_id() {
                bail!("Last leaf {} links to {}", last, next);
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn check_subtree(
        &self,
        page_id: PageId,
        parent: Option<PageId>,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        depth: usize,
        leaf_depth: &mut Option<usize>,
        leaves: &mut Vec<PageId>,
    ) -> Result<()> {
        let cmp = self.comparator();
        let in_bounds = |key: &[u8]| {
            lower.map_or(true, |l| cmp(key, l) != Ordering::Less)
                && upper.map_or(true, |u| cmp(key, u) == Ordering::Less)
        };

        // Children and separators are copied out so the page is unpinned
        // before descending.
        let (children, separators) = {
            let guard = self.buffer_pool.fetch_page(page_id)?;
            let page = BTreePage::from_data(&guard[..]);

            if page.page_id() != page_id {
                bail!("Page {} records its id as {}", page_id, page.page_id());
            }
            if page.parent_page_id() != parent {
                bail!(
                    "Page {} has parent {:?}, expected {:?}",
                    page_id,
                    page.parent_page_id(),
                    parent
                );
            }
            if page.size() > page.max_size() {
                bail!("Page {} overflows: {} > {}", page_id, page.size(), page.max_size());
            }
            if parent.is_some() && page.size() < page.min_size() {
                bail!("Page {} underflows: {} < {}", page_id, page.size(), page.min_size());
            }

            match page.page_type() {
                Some(BTreePageType::Leaf) => {
                    let leaf = BTreeLeafPage::from_data(&guard[..]);
                    for i in 0..leaf.size() {
                        if !in_bounds(leaf.key_at(i)) {
                            bail!("Leaf {} key {} is outside its parent's range", page_id, i);
                        }
                        if i > 0 && cmp(leaf.key_at(i - 1), leaf.key_at(i)) != Ordering::Less {
                            bail!("Leaf {} keys out of order at {}", page_id, i);
                        }
                    }
                    match *leaf_depth {
                        Some(d) if d != depth => {
                            bail!("Leaf {} at depth {}, others at {}", page_id, depth, d)
                        }
                        _ => *leaf_depth = Some(depth),
                    }
                    leaves.push(page_id);
                    return Ok(());
                }
                Some(BTreePageType::Internal) => {
                    let internal = BTreeInternalPage::from_data(&guard[..]);
                    if internal.size() < 2 {
                        bail!("Internal page {} has {} children", page_id, internal.size());
                    }
                    for i in 1..internal.size() {
                        if !in_bounds(internal.key_at(i)) {
                            bail!("Internal {} key {} is outside its parent's range", page_id, i);
                        }
                        if i > 1
                            && cmp(internal.key_at(i - 1), internal.key_at(i)) != Ordering::Less
                        {
                            bail!("Internal {} keys out of order at {}", page_id, i);
                        }
                    }
                    let separators: Vec<Vec<u8>> = (0..internal.size())
                        .map(|i| internal.key_at(i).to_vec())
                        .collect();
                    (internal.children(), separators)
                }
                None => bail!("Page {} is not a B+ tree page", page_id),
            }
        };

        for (i, &child) in children.iter().enumerate() {
            let child_lower = if i == 0 {
                lower
            } else {
                Some(separators[i].as_slice())
            };
            let child_upper = separators.get(i + 1).map(Vec::as_slice).or(upper);
            self.check_subtree(
                child,
                Some(page_id),
                child_lower,
                child_upper,
                depth + 1,
                leaf_depth,
                leaves,
            )?;
        }
        Ok(())
    }

    /// Level-by-level rendering of the tree for debugging.
    pub fn dump(&self) -> Result<String> {
        let mut out = String::new();
        let mut level: VecDeque<PageId> = self.root_page_id.into_iter().collect();
        let mut depth = 0;

        while !level.is_empty() {
            let mut next_level = VecDeque::new();
            let mut nodes = Vec::new();
            while let Some(page_id) = level.pop_front() {
                let guard = self.buffer_pool.fetch_page(page_id)?;
                let page = BTreePage::from_data(&guard[..]);
                let keys: Vec<String> = if page.is_leaf() {
                    let leaf = BTreeLeafPage::from_data(&guard[..]);
                    (0..leaf.size())
                        .map(|i| self.key_manager.display(leaf.key_at(i)))
                        .collect()
                } else {
                    let internal = BTreeInternalPage::from_data(&guard[..]);
                    next_level.extend(internal.children());
                    (1..internal.size())
                        .map(|i| self.key_manager.display(internal.key_at(i)))
                        .collect()
                };
                nodes.push(format!("{}:[{}]", page_id, keys.join(" ")));
            }
            out.push_str(&format!("L{}: {}\n", depth, nodes.join(" ")));
            level = next_level;
            depth += 1;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::value::{DataType, Value};
    use crate::storage::buffer::lru::LruReplacer;
    use crate::storage::disk::DiskManager;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use tempfile::{tempdir, TempDir};

    fn create_test_buffer_pool(pool_size: usize) -> Result<(BufferPoolManager, TempDir)> {
        let dir = tempdir()?;
        let disk_manager = DiskManager::create(&dir.path().join("test.db"))?;
        let replacer = Box::new(LruReplacer::new(pool_size));
        let buffer_pool = BufferPoolManager::new(disk_manager, replacer, pool_size);

        // Reserve the catalog meta and index roots pages.
        let (_catalog, guard) = buffer_pool.new_page()?;
        drop(guard);
        let (_roots, mut guard) = buffer_pool.new_page()?;
        IndexRootsPage::from_data(&mut guard[..]).init();
        drop(guard);
        Ok((buffer_pool, dir))
    }

    fn create_test_tree(
        leaf_max: usize,
        internal_max: usize,
    ) -> Result<(BPlusTree, BufferPoolManager, TempDir)> {
        let (buffer_pool, dir) = create_test_buffer_pool(32)?;
        let key_manager = KeyManager::new(vec![DataType::Int32])?;
        let tree = BPlusTree::new(
            0,
            buffer_pool.clone(),
            key_manager,
            Some(leaf_max),
            Some(internal_max),
        )?;
        Ok((tree, buffer_pool, dir))
    }

    fn key(tree: &BPlusTree, k: i32) -> GenericKey {
        tree.key_manager().serialize(&[Value::Int32(k)]).unwrap()
    }

    fn rid(k: i32) -> RowId {
        RowId::new(PageId(k as u32), k as u32)
    }

    fn collect_keys(tree: &BPlusTree) -> Result<Vec<i32>> {
        let mut keys = Vec::new();
        for entry in tree.iter()? {
            let (key, _) = entry?;
            match tree.key_manager().deserialize(key.data())?.first() {
                Some(Value::Int32(k)) => keys.push(*k),
                other => bail!("unexpected key value {:?}", other),
            }
        }
        Ok(keys)
    }

    #[test]
    fn test_empty_tree() -> Result<()> {
        let (tree, buffer_pool, _dir) = create_test_tree(4, 4)?;

        assert!(tree.is_empty());
        assert_eq!(tree.get_value(&key(&tree, 1))?, None);
        assert!(tree.begin()? == tree.end());
        assert_eq!(tree.height()?, 0);
        assert!(buffer_pool.check_all_unpinned());
        Ok(())
    }

    #[test]
    fn test_insert_and_get() -> Result<()> {
        let (mut tree, buffer_pool, _dir) = create_test_tree(4, 4)?;

        assert!(tree.insert(&key(&tree, 42), rid(42))?);
        assert!(!tree.is_empty());
        assert_eq!(tree.get_value(&key(&tree, 42))?, Some(rid(42)));
        assert_eq!(tree.get_value(&key(&tree, 7))?, None);
        assert!(buffer_pool.check_all_unpinned());
        Ok(())
    }

    #[test]
    fn test_duplicate_rejected() -> Result<()> {
        let (mut tree, _buffer_pool, _dir) = create_test_tree(4, 4)?;

        assert!(tree.insert(&key(&tree, 1), rid(1))?);
        assert!(!tree.insert(&key(&tree, 1), rid(99))?);
        assert_eq!(tree.get_value(&key(&tree, 1))?, Some(rid(1)));
        Ok(())
    }

    #[test]
    fn test_leaf_split_scenario() -> Result<()> {
        let (mut tree, buffer_pool, _dir) = create_test_tree(4, 4)?;

        for k in 1..=4 {
            tree.insert(&key(&tree, k), rid(k))?;
        }
        assert_eq!(tree.height()?, 1);

        tree.insert(&key(&tree, 5), rid(5))?;
        assert_eq!(tree.height()?, 2);

        let root_id = tree.root_page_id().unwrap();
        let guard = buffer_pool.fetch_page(root_id)?;
        let root = BTreeInternalPage::from_data_checked(&guard[..])?;
        assert_eq!(root.size(), 2);
        let children = root.children();
        drop(guard);

        let leaf_keys = |page_id: PageId| -> Result<usize> {
            let guard = buffer_pool.fetch_page(page_id)?;
            Ok(BTreeLeafPage::from_data_checked(&guard[..])?.size())
        };
        assert_eq!(leaf_keys(children[0])?, 2);
        assert_eq!(leaf_keys(children[1])?, 3);

        assert_eq!(tree.get_value(&key(&tree, 3))?, Some(rid(3)));
        assert_eq!(tree.get_value(&key(&tree, 9))?, None);
        tree.check_integrity()?;
        assert!(buffer_pool.check_all_unpinned());
        Ok(())
    }

    #[test]
    fn test_many_inserts_grow_internal_levels() -> Result<()> {
        let (mut tree, buffer_pool, _dir) = create_test_tree(3, 3)?;

        for k in 0..200 {
            assert!(tree.insert(&key(&tree, k), rid(k))?);
        }
        tree.check_integrity()?;
        assert!(tree.height()? >= 4);
        assert_eq!(collect_keys(&tree)?, (0..200).collect::<Vec<_>>());
        for k in 0..200 {
            assert_eq!(tree.get_value(&key(&tree, k))?, Some(rid(k)));
        }
        assert!(buffer_pool.check_all_unpinned());
        Ok(())
    }

    #[test]
    fn test_reverse_inserts() -> Result<()> {
        let (mut tree, _buffer_pool, _dir) = create_test_tree(4, 3)?;

        for k in (0..100).rev() {
            tree.insert(&key(&tree, k), rid(k))?;
        }
        tree.check_integrity()?;
        assert_eq!(collect_keys(&tree)?, (0..100).collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn test_redistribute_both_directions() -> Result<()> {
        let (mut tree, buffer_pool, _dir) = create_test_tree(4, 4)?;
        for k in [10, 20, 30, 40, 50, 60] {
            tree.insert(&key(&tree, k), rid(k))?;
        }
        let root_id = tree.root_page_id().unwrap();
        let separator = || -> Result<Vec<u8>> {
            let guard = buffer_pool.fetch_page(root_id)?;
            Ok(BTreeInternalPage::from_data(&guard[..]).key_at(1).to_vec())
        };

        // Left leaf {20} borrows the first key of {30, 40, 50, 60}.
        tree.remove(&key(&tree, 10))?;
        tree.check_integrity()?;
        assert_eq!(separator()?, key(&tree, 40).data());

        // Right leaf {60} borrows the last key of {20, 21, 22, 30}.
        tree.insert(&key(&tree, 21), rid(21))?;
        tree.insert(&key(&tree, 22), rid(22))?;
        tree.remove(&key(&tree, 40))?;
        tree.remove(&key(&tree, 50))?;
        tree.check_integrity()?;
        assert_eq!(separator()?, key(&tree, 30).data());

        assert_eq!(tree.root_page_id(), Some(root_id));
        assert_eq!(collect_keys(&tree)?, vec![20, 21, 22, 30, 60]);
        assert!(buffer_pool.check_all_unpinned());
        Ok(())
    }

    #[test]
    fn test_internal_redistribute_and_merge() -> Result<()> {
        let (mut tree, buffer_pool, _dir) = create_test_tree(3, 3)?;
        let mut rng = StdRng::seed_from_u64(42);

        let mut keys: Vec<i32> = (0..120).collect();
        keys.shuffle(&mut rng);
        for &k in &keys {
            tree.insert(&key(&tree, k), rid(k))?;
        }
        keys.shuffle(&mut rng);
        for (i, &k) in keys.iter().enumerate() {
            assert!(tree.remove(&key(&tree, k))?);
            if i % 10 == 0 {
                tree.check_integrity()?;
            }
        }
        assert!(tree.is_empty());
        assert!(buffer_pool.check_all_unpinned());
        Ok(())
    }

    #[test]
    fn test_remove_with_merges() -> Result<()> {
        let (mut tree, buffer_pool, _dir) = create_test_tree(4, 4)?;

        for k in 1..=10 {
            tree.insert(&key(&tree, k), rid(k))?;
        }
        for k in [1, 2, 3, 8, 9] {
            assert!(tree.remove(&key(&tree, k))?);
            tree.check_integrity()?;
        }
        assert!(!tree.remove(&key(&tree, 2))?);

        assert_eq!(collect_keys(&tree)?, vec![4, 5, 6, 7, 10]);
        assert_eq!(tree.get_value(&key(&tree, 8))?, None);
        assert_eq!(tree.get_value(&key(&tree, 10))?, Some(rid(10)));
        assert!(buffer_pool.check_all_unpinned());
        Ok(())
    }

    #[test]
    fn test_remove_all_empties_tree() -> Result<()> {
        let (mut tree, buffer_pool, _dir) = create_test_tree(3, 3)?;

        for k in 0..50 {
            tree.insert(&key(&tree, k), rid(k))?;
        }
        for k in 0..50 {
            assert!(tree.remove(&key(&tree, k))?);
            tree.check_integrity()?;
        }
        assert!(tree.is_empty());
        assert!(tree.begin()? == tree.end());

        // Every tree page went back to the allocator.
        let allocated = buffer_pool.with_disk_manager(|dm| dm.allocated_pages());
        assert_eq!(allocated, 2);

        // Re-inserting builds a fresh single-leaf tree.
        tree.insert(&key(&tree, 7), rid(7))?;
        assert_eq!(tree.height()?, 1);
        assert_eq!(collect_keys(&tree)?, vec![7]);
        assert!(buffer_pool.check_all_unpinned());
        Ok(())
    }

    #[test]
    fn test_random_workload_keeps_invariants() -> Result<()> {
        let (mut tree, buffer_pool, _dir) = create_test_tree(5, 4)?;
        let mut rng = StdRng::seed_from_u64(7);

        let mut keys: Vec<i32> = (0..300).collect();
        keys.shuffle(&mut rng);
        for &k in &keys {
            assert!(tree.insert(&key(&tree, k), rid(k))?);
        }
        tree.check_integrity()?;

        keys.shuffle(&mut rng);
        let (removed, kept) = keys.split_at(200);
        for &k in removed {
            assert!(tree.remove(&key(&tree, k))?);
        }
        tree.check_integrity()?;

        let mut expected = kept.to_vec();
        expected.sort();
        assert_eq!(collect_keys(&tree)?, expected);
        for &k in removed.iter().take(20) {
            assert_eq!(tree.get_value(&key(&tree, k))?, None);
        }
        assert!(buffer_pool.check_all_unpinned());
        buffer_pool.with_disk_manager(|dm| dm.verify_consistency())?;
        Ok(())
    }

    #[test]
    fn test_begin_at() -> Result<()> {
        let (mut tree, _buffer_pool, _dir) = create_test_tree(4, 4)?;
        for k in (0..40).step_by(2) {
            tree.insert(&key(&tree, k), rid(k))?;
        }

        let mut iter = tree.begin_at(&key(&tree, 11))?;
        let (first, row_id) = iter.current().unwrap();
        assert_eq!(first, key(&tree, 12));
        assert_eq!(row_id, rid(12));
        iter.advance()?;
        assert_eq!(iter.current().unwrap().0, key(&tree, 14));

        let past_end = tree.begin_at(&key(&tree, 100))?;
        assert!(past_end == tree.end());
        Ok(())
    }

    #[test]
    fn test_reopen_from_roots_page() -> Result<()> {
        let (mut tree, buffer_pool, _dir) = create_test_tree(4, 4)?;
        for k in 0..20 {
            tree.insert(&key(&tree, k), rid(k))?;
        }
        let root = tree.root_page_id();
        drop(tree);

        let key_manager = KeyManager::new(vec![DataType::Int32])?;
        let reopened = BPlusTree::new(0, buffer_pool.clone(), key_manager, Some(4), Some(4))?;
        assert_eq!(reopened.root_page_id(), root);
        assert_eq!(reopened.get_value(&key(&reopened, 13))?, Some(rid(13)));

        let other = BPlusTree::new(
            1,
            buffer_pool,
            KeyManager::new(vec![DataType::Int32])?,
            None,
            None,
        )?;
        assert!(other.is_empty());
        Ok(())
    }

    #[test]
    fn test_destroy_frees_pages() -> Result<()> {
        let (mut tree, buffer_pool, _dir) = create_test_tree(3, 3)?;
        for k in 0..30 {
            tree.insert(&key(&tree, k), rid(k))?;
        }

        tree.destroy()?;
        assert!(tree.is_empty());
        assert_eq!(buffer_pool.with_disk_manager(|dm| dm.allocated_pages()), 2);

        let guard = buffer_pool.fetch_page(INDEX_ROOTS_PAGE_ID)?;
        assert_eq!(IndexRootsPage::from_data(&guard[..]).get_root_id(0), None);
        Ok(())
    }

    #[test]
    fn test_dump_and_bad_sizes() -> Result<()> {
        let (mut tree, buffer_pool, _dir) = create_test_tree(4, 4)?;
        for k in 1..=5 {
            tree.insert(&key(&tree, k), rid(k))?;
        }
        let dump = tree.dump()?;
        assert!(dump.starts_with("L0: "));
        assert!(dump.contains("[1 2]"));
        assert!(dump.contains("[3 4 5]"));

        let km = KeyManager::new(vec![DataType::Int32])?;
        assert!(BPlusTree::new(2, buffer_pool.clone(), km.clone(), Some(1), None).is_err());
        assert!(BPlusTree::new(2, buffer_pool, km, None, Some(2)).is_err());
        Ok(())
    }

    #[test]
    fn test_key_width_checked() -> Result<()> {
        let (mut tree, _buffer_pool, _dir) = create_test_tree(4, 4)?;
        let short = GenericKey::from_bytes(&[1, 2]);
        assert!(tree.insert(&short, rid(1)).is_err());
        assert!(tree.get_value(&short).is_err());
        Ok(())
    }

    #[test]
    fn test_oversized_keys_rejected() -> Result<()> {
        let (buffer_pool, _dir) = create_test_buffer_pool(8)?;

        // Fits a page once but leaves no room for a split.
        let km = KeyManager::new(vec![DataType::Char(3000)])?;
        assert!(BPlusTree::resolve_max_sizes(km.key_size(), None, None).is_err());
        assert!(BPlusTree::new(4, buffer_pool.clone(), km, None, None).is_err());

        let km = KeyManager::new(vec![DataType::Char(1000)])?;
        let (leaf_max, internal_max) = BPlusTree::resolve_max_sizes(km.key_size(), None, None)?;
        assert!(leaf_max >= 2 && internal_max >= 3);
        assert!(buffer_pool.check_all_unpinned());
        Ok(())
    }

    #[test]
    fn test_integrity_check_on_minimal_pool() -> Result<()> {
        let (buffer_pool, _dir) = create_test_buffer_pool(4)?;
        let key_manager = KeyManager::new(vec![DataType::Int32])?;
        let mut tree = BPlusTree::new(0, buffer_pool.clone(), key_manager, Some(2), Some(3))?;

        for k in 0..200 {
            tree.insert(&key(&tree, k), rid(k))?;
        }
        assert!(tree.height()? >= 5);

        tree.check_integrity()?;
        assert!(buffer_pool.check_all_unpinned());

        for k in (0..200).step_by(3) {
            assert!(tree.remove(&key(&tree, k))?);
        }
        tree.check_integrity()?;
        assert_eq!(collect_keys(&tree)?.len(), 200 - 67);
        Ok(())
    }
}

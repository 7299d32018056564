//! Header shared by B+ tree internal and leaf pages.
//!
//! Layout (little endian):
//!
//! | offset | field          |
//! |--------|----------------|
//! | 0      | page type (u8) |
//! | 4      | page id        |
//! | 8      | parent page id |
//! | 12     | size           |
//! | 16     | max size       |
//! | 20     | key size       |

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{read_page_id, write_page_id, PageId};
use byteorder::{ByteOrder, LittleEndian};

pub const BTREE_HEADER_SIZE: usize = 24;

const PAGE_TYPE_OFFSET: usize = 0;
const PAGE_ID_OFFSET: usize = 4;
const PARENT_PAGE_ID_OFFSET: usize = 8;
const SIZE_OFFSET: usize = 12;
const MAX_SIZE_OFFSET: usize = 16;
const KEY_SIZE_OFFSET: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BTreePageType {
    Internal = 1,
    Leaf = 2,
}

impl BTreePageType {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Internal),
            2 => Some(Self::Leaf),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::Leaf => "leaf",
        }
    }
}

pub struct BTreePage<D> {
    pub(super) data: D,
}

impl<D: AsRef<[u8]>> BTreePage<D> {
    pub fn from_data(data: D) -> Self {
        Self { data }
    }

    pub fn into_inner(self) -> D {
        self.data
    }

    pub fn page_type(&self) -> Option<BTreePageType> {
        BTreePageType::from_u8(self.data.as_ref()[PAGE_TYPE_OFFSET])
    }

    /// Fail unless the page carries the expected type tag.
    pub fn expect_type(&self, expected: BTreePageType) -> StorageResult<()> {
        let found = self.data.as_ref()[PAGE_TYPE_OFFSET];
        if found == expected as u8 {
            Ok(())
        } else {
            Err(StorageError::PageTypeMismatch {
                page_id: self.page_id(),
                expected: expected.name(),
                found,
            })
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.page_type() == Some(BTreePageType::Leaf)
    }

    pub fn is_root(&self) -> bool {
        self.parent_page_id().is_none()
    }

    pub fn page_id(&self) -> PageId {
        PageId(LittleEndian::read_u32(&self.data.as_ref()[PAGE_ID_OFFSET..]))
    }

    pub fn parent_page_id(&self) -> Option<PageId> {
        read_page_id(self.data.as_ref(), PARENT_PAGE_ID_OFFSET)
    }

    pub fn size(&self) -> usize {
        LittleEndian::read_u32(&self.data.as_ref()[SIZE_OFFSET..]) as usize
    }

    pub fn max_size(&self) -> usize {
        LittleEndian::read_u32(&self.data.as_ref()[MAX_SIZE_OFFSET..]) as usize
    }

    /// Fewest entries a non-root page may hold.
    pub fn min_size(&self) -> usize {
        if self.is_leaf() {
            self.max_size() / 2
        } else {
            (self.max_size() + 1) / 2
        }
    }

    pub fn key_size(&self) -> usize {
        LittleEndian::read_u32(&self.data.as_ref()[KEY_SIZE_OFFSET..]) as usize
    }
}

impl<D: AsRef<[u8]> + AsMut<[u8]>> BTreePage<D> {
    pub(super) fn init_header(
        &mut self,
        page_type: BTreePageType,
        page_id: PageId,
        parent_page_id: Option<PageId>,
        key_size: usize,
        max_size: usize,
    ) {
        self.data.as_mut()[PAGE_TYPE_OFFSET] = page_type as u8;
        LittleEndian::write_u32(&mut self.data.as_mut()[PAGE_ID_OFFSET..], page_id.0);
        self.set_parent_page_id(parent_page_id);
        self.set_size(0);
        LittleEndian::write_u32(&mut self.data.as_mut()[MAX_SIZE_OFFSET..], max_size as u32);
        LittleEndian::write_u32(&mut self.data.as_mut()[KEY_SIZE_OFFSET..], key_size as u32);
    }

    pub fn set_parent_page_id(&mut self, parent_page_id: Option<PageId>) {
        write_page_id(self.data.as_mut(), PARENT_PAGE_ID_OFFSET, parent_page_id);
    }

    pub fn set_size(&mut self, size: usize) {
        LittleEndian::write_u32(&mut self.data.as_mut()[SIZE_OFFSET..], size as u32);
    }
}

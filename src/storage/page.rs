pub mod bitmap_page;
pub mod btree_internal_page;
pub mod btree_leaf_page;
pub mod btree_page;
pub mod catalog_meta_page;
pub mod disk_meta_page;
pub mod index_roots_page;

use byteorder::{ByteOrder, LittleEndian};
use std::fmt;

/// Logical page number handed out by the disk manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId(pub u32);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// On-disk encoding of "no page".
pub const INVALID_PAGE_ID: u32 = u32::MAX;

/// Logical page holding the catalog meta page.
pub const CATALOG_META_PAGE_ID: PageId = PageId(0);

/// Logical page holding the index roots page.
pub const INDEX_ROOTS_PAGE_ID: PageId = PageId(1);

pub(crate) fn read_page_id(data: &[u8], offset: usize) -> Option<PageId> {
    match LittleEndian::read_u32(&data[offset..offset + 4]) {
        INVALID_PAGE_ID => None,
        raw => Some(PageId(raw)),
    }
}

pub(crate) fn write_page_id(data: &mut [u8], offset: usize, page_id: Option<PageId>) {
    let raw = page_id.map_or(INVALID_PAGE_ID, |p| p.0);
    LittleEndian::write_u32(&mut data[offset..offset + 4], raw);
}

pub use bitmap_page::BitmapPage;
pub use btree_internal_page::BTreeInternalPage;
pub use btree_leaf_page::BTreeLeafPage;
pub use btree_page::{BTreePage, BTreePageType};
pub use catalog_meta_page::CatalogMetaPage;
pub use disk_meta_page::DiskMetaPage;
pub use index_roots_page::IndexRootsPage;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_id_round_trip_with_invalid() {
        let mut buf = [0u8; 8];
        write_page_id(&mut buf, 0, Some(PageId(42)));
        write_page_id(&mut buf, 4, None);

        assert_eq!(read_page_id(&buf, 0), Some(PageId(42)));
        assert_eq!(read_page_id(&buf, 4), None);
        assert_eq!(&buf[4..8], &[0xFF; 4]);
    }
}

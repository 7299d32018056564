//! Catalog meta page: where each table's first heap page and each index's
//! metadata page live.
//!
//! Layout: `magic u32 @0`, `table_count u32 @4`, `index_count u32 @8`, then
//! `table_count` `(table_id u32, first_page u32)` records followed by
//! `index_count` `(index_id u32, meta_page u32)` records. The whole map is
//! rewritten on every change.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use crate::storage::PAGE_SIZE;
use byteorder::{ByteOrder, LittleEndian};
use std::collections::BTreeMap;

pub const CATALOG_METADATA_MAGIC: u32 = 89_849_871;

const MAGIC_OFFSET: usize = 0;
const TABLE_COUNT_OFFSET: usize = 4;
const INDEX_COUNT_OFFSET: usize = 8;
const ENTRIES_OFFSET: usize = 12;
const ENTRY_SIZE: usize = 8;

/// Decoded catalog meta page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogMeta {
    pub table_meta_pages: BTreeMap<u32, PageId>,
    pub index_meta_pages: BTreeMap<u32, PageId>,
}

impl CatalogMeta {
    pub fn next_table_id(&self) -> u32 {
        self.table_meta_pages
            .keys()
            .next_back()
            .map_or(0, |id| id + 1)
    }

    pub fn next_index_id(&self) -> u32 {
        self.index_meta_pages
            .keys()
            .next_back()
            .map_or(0, |id| id + 1)
    }

    fn serialized_size(&self) -> usize {
        ENTRIES_OFFSET
            + (self.table_meta_pages.len() + self.index_meta_pages.len()) * ENTRY_SIZE
    }
}

pub struct CatalogMetaPage<D> {
    data: D,
}

impl<D: AsRef<[u8]>> CatalogMetaPage<D> {
    pub fn from_data(data: D) -> Self {
        Self { data }
    }

    pub fn into_inner(self) -> D {
        self.data
    }

    pub fn magic(&self) -> u32 {
        LittleEndian::read_u32(&self.data.as_ref()[MAGIC_OFFSET..])
    }

    pub fn read(&self) -> StorageResult<CatalogMeta> {
        let data = self.data.as_ref();
        let magic = self.magic();
        if magic != CATALOG_METADATA_MAGIC {
            return Err(StorageError::Corrupted(format!(
                "catalog meta page has magic {:#x}, expected {:#x}",
                magic, CATALOG_METADATA_MAGIC
            )));
        }

        let table_count = LittleEndian::read_u32(&data[TABLE_COUNT_OFFSET..]) as usize;
        let index_count = LittleEndian::read_u32(&data[INDEX_COUNT_OFFSET..]) as usize;
        if ENTRIES_OFFSET + (table_count + index_count) * ENTRY_SIZE > PAGE_SIZE {
            return Err(StorageError::Corrupted(format!(
                "catalog meta page claims {} tables and {} indexes",
                table_count, index_count
            )));
        }

        let read_entry = |i: usize| {
            let offset = ENTRIES_OFFSET + i * ENTRY_SIZE;
            (
                LittleEndian::read_u32(&data[offset..]),
                PageId(LittleEndian::read_u32(&data[offset + 4..])),
            )
        };

        Ok(CatalogMeta {
            table_meta_pages: (0..table_count).map(read_entry).collect(),
            index_meta_pages: (table_count..table_count + index_count)
                .map(read_entry)
                .collect(),
        })
    }
}

impl<D: AsRef<[u8]> + AsMut<[u8]>> CatalogMetaPage<D> {
    pub fn write(&mut self, meta: &CatalogMeta) -> StorageResult<()> {
        let required = meta.serialized_size();
        if required > PAGE_SIZE {
            return Err(StorageError::PageOverflow {
                required,
                available: PAGE_SIZE,
            });
        }

        let data = self.data.as_mut();
        LittleEndian::write_u32(&mut data[MAGIC_OFFSET..], CATALOG_METADATA_MAGIC);
        LittleEndian::write_u32(
            &mut data[TABLE_COUNT_OFFSET..],
            meta.table_meta_pages.len() as u32,
        );
        LittleEndian::write_u32(
            &mut data[INDEX_COUNT_OFFSET..],
            meta.index_meta_pages.len() as u32,
        );

        let entries = meta
            .table_meta_pages
            .iter()
            .chain(meta.index_meta_pages.iter());
        for (i, (&id, page_id)) in entries.enumerate() {
            let offset = ENTRIES_OFFSET + i * ENTRY_SIZE;
            LittleEndian::write_u32(&mut data[offset..], id);
            LittleEndian::write_u32(&mut data[offset + 4..], page_id.0);
        }
        Ok(())
    }
}

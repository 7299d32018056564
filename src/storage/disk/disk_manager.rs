use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::bitmap_page::{BitmapPage, BITMAP_CAPACITY};
use crate::storage::page::disk_meta_page::{DiskMetaPage, MAX_EXTENTS};
use crate::storage::page::PageId;
use log::{debug, error};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const PAGE_SIZE: usize = 4096;

/// Physical page holding the allocator meta data.
const META_PHYSICAL_PAGE: u32 = 0;

/// Owns the database file. Translates logical page ids to physical pages and
/// keeps free-space bookkeeping in one bitmap page per extent.
pub struct DiskManager {
    file: File,
    path: PathBuf,
    meta: Box<[u8; PAGE_SIZE]>,
}

impl DiskManager {
    pub fn create(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let mut dm = Self {
            file,
            path: path.to_path_buf(),
            meta: Box::new([0u8; PAGE_SIZE]),
        };
        dm.write_physical_page(META_PHYSICAL_PAGE, &[0u8; PAGE_SIZE])?;
        debug!("created database file {:?}", path);
        Ok(dm)
    }

    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut dm = Self {
            file,
            path: path.to_path_buf(),
            meta: Box::new([0u8; PAGE_SIZE]),
        };
        let mut meta = [0u8; PAGE_SIZE];
        dm.read_physical_page(META_PHYSICAL_PAGE, &mut meta)?;
        dm.meta.copy_from_slice(&meta);
        debug!(
            "opened database file {:?}: {} pages in {} extents",
            path,
            dm.allocated_pages(),
            dm.extent_count()
        );
        Ok(dm)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_page(&mut self, page_id: PageId, buf: &mut [u8]) -> StorageResult<()> {
        self.read_physical_page(Self::map_page_id(page_id), buf)
    }

    pub fn write_page(&mut self, page_id: PageId, data: &[u8]) -> StorageResult<()> {
        self.write_physical_page(Self::map_page_id(page_id), data)
    }

    /// Logical to physical translation. Every extent is preceded by its bitmap
    /// page and the whole file by the meta page.
    pub fn map_page_id(page_id: PageId) -> u32 {
        let extent = page_id.0 / BITMAP_CAPACITY as u32;
        page_id.0 + 1 + (extent + 1)
    }

    fn bitmap_physical_page(extent: usize) -> u32 {
        1 + (extent * (BITMAP_CAPACITY + 1)) as u32
    }

    pub fn allocated_pages(&self) -> u32 {
        DiskMetaPage::from_data(&self.meta[..]).allocated_pages()
    }

    pub fn extent_count(&self) -> u32 {
        DiskMetaPage::from_data(&self.meta[..]).extent_count()
    }

    pub fn extent_used_pages(&self, extent: usize) -> u32 {
        DiskMetaPage::from_data(&self.meta[..]).extent_used_pages(extent)
    }

    pub fn allocate_page(&mut self) -> StorageResult<PageId> {
        let extent = (0..MAX_EXTENTS)
            .find(|&e| (self.extent_used_pages(e) as usize) < BITMAP_CAPACITY)
            .ok_or_else(|| {
                error!("disk allocation failed: all {} extents are full", MAX_EXTENTS);
                StorageError::OutOfSpace {
                    max_extents: MAX_EXTENTS,
                }
            })?;

        let bitmap_page_id = Self::bitmap_physical_page(extent);
        let mut bitmap = [0u8; PAGE_SIZE];
        self.read_physical_page(bitmap_page_id, &mut bitmap)?;

        let offset = {
            let mut bitmap_page = BitmapPage::from_data(&mut bitmap);
            bitmap_page.allocate_page().ok_or_else(|| {
                error!(
                    "bitmap of extent {} refused allocation while meta counts {} used pages",
                    extent,
                    self.extent_used_pages(extent)
                );
                StorageError::Corrupted(format!(
                    "bitmap of extent {} disagrees with meta page",
                    extent
                ))
            })?
        };

        let used = self.extent_used_pages(extent);
        let allocated = self.allocated_pages();
        let extent_count = self.extent_count();
        {
            let mut meta = DiskMetaPage::from_data(&mut self.meta[..]);
            if used == 0 {
                meta.set_extent_count(extent_count + 1);
            }
            meta.set_extent_used_pages(extent, used + 1);
            meta.set_allocated_pages(allocated + 1);
        }

        self.write_physical_page(bitmap_page_id, &bitmap)?;
        self.persist_meta()?;

        let page_id = PageId((extent * BITMAP_CAPACITY + offset) as u32);
        debug!("allocated page {} (extent {}, slot {})", page_id, extent, offset);
        Ok(page_id)
    }

    /// Release a logical page. Returns `false` if it was not allocated.
    pub fn deallocate_page(&mut self, page_id: PageId) -> StorageResult<bool> {
        let extent = page_id.0 as usize / BITMAP_CAPACITY;
        let offset = page_id.0 as usize % BITMAP_CAPACITY;
        if extent >= MAX_EXTENTS {
            return Ok(false);
        }

        let bitmap_page_id = Self::bitmap_physical_page(extent);
        let mut bitmap = [0u8; PAGE_SIZE];
        self.read_physical_page(bitmap_page_id, &mut bitmap)?;

        if !BitmapPage::from_data(&mut bitmap).deallocate_page(offset) {
            return Ok(false);
        }

        let used = self.extent_used_pages(extent);
        let allocated = self.allocated_pages();
        let extent_count = self.extent_count();
        if used == 0 || allocated == 0 {
            error!("meta counters underflow while freeing page {}", page_id);
            return Err(StorageError::Corrupted(format!(
                "meta page has no allocation recorded for page {}",
                page_id
            )));
        }
        {
            let mut meta = DiskMetaPage::from_data(&mut self.meta[..]);
            if used == 1 {
                meta.set_extent_count(extent_count.saturating_sub(1));
            }
            meta.set_extent_used_pages(extent, used - 1);
            meta.set_allocated_pages(allocated - 1);
        }

        self.write_physical_page(bitmap_page_id, &bitmap)?;
        self.persist_meta()?;
        debug!("deallocated page {}", page_id);
        Ok(true)
    }

    pub fn is_page_free(&mut self, page_id: PageId) -> StorageResult<bool> {
        let extent = page_id.0 as usize / BITMAP_CAPACITY;
        if extent >= MAX_EXTENTS {
            return Ok(true);
        }

        let mut bitmap = [0u8; PAGE_SIZE];
        self.read_physical_page(Self::bitmap_physical_page(extent), &mut bitmap)?;
        Ok(BitmapPage::from_data(&bitmap).is_page_free(page_id.0 as usize % BITMAP_CAPACITY))
    }

    /// Recount every bitmap and compare it with the meta page counters.
    pub fn verify_consistency(&mut self) -> StorageResult<()> {
        let mut total = 0u32;
        let mut non_empty = 0u32;
        for extent in 0..MAX_EXTENTS {
            let recorded = self.extent_used_pages(extent);
            let mut bitmap = [0u8; PAGE_SIZE];
            self.read_physical_page(Self::bitmap_physical_page(extent), &mut bitmap)?;
            let bitmap_page = BitmapPage::from_data(&bitmap);
            let counted = bitmap_page.count_allocated() as u32;

            if counted != recorded || bitmap_page.allocated() as u32 != recorded {
                return Err(StorageError::Corrupted(format!(
                    "extent {}: meta records {} pages, bitmap holds {}",
                    extent, recorded, counted
                )));
            }
            total += recorded;
            if recorded > 0 {
                non_empty += 1;
            }
        }

        if total != self.allocated_pages() || non_empty != self.extent_count() {
            return Err(StorageError::Corrupted(format!(
                "meta totals ({} pages, {} extents) disagree with bitmaps ({} pages, {} extents)",
                self.allocated_pages(),
                self.extent_count(),
                total,
                non_empty
            )));
        }
        Ok(())
    }

    pub fn sync(&mut self) -> StorageResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    pub fn close(mut self) -> StorageResult<()> {
        self.persist_meta()?;
        self.sync()
    }

    fn persist_meta(&mut self) -> StorageResult<()> {
        let meta = *self.meta;
        self.write_physical_page(META_PHYSICAL_PAGE, &meta)
    }

    fn read_physical_page(&mut self, physical: u32, buf: &mut [u8]) -> StorageResult<()> {
        if buf.len() != PAGE_SIZE {
            return Err(StorageError::InvalidBufferSize {
                expected: PAGE_SIZE,
                actual: buf.len(),
            });
        }

        let offset = physical as u64 * PAGE_SIZE as u64;
        let file_size = self.file.metadata()?.len();

        // Pages past the end of the file have never been written.
        if offset >= file_size {
            buf.fill(0);
            return Ok(());
        }

        self.file.seek(SeekFrom::Start(offset))?;
        let available = ((file_size - offset) as usize).min(PAGE_SIZE);
        self.file.read_exact(&mut buf[..available]).map_err(|e| {
            error!("failed to read physical page {}: {}", physical, e);
            e
        })?;
        buf[available..].fill(0);
        Ok(())
    }

    fn write_physical_page(&mut self, physical: u32, data: &[u8]) -> StorageResult<()> {
        if data.len() != PAGE_SIZE {
            return Err(StorageError::InvalidBufferSize {
                expected: PAGE_SIZE,
                actual: data.len(),
            });
        }

        let offset = physical as u64 * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file
            .write_all(data)
            .and_then(|_| self.file.flush())
            .map_err(|e| {
                error!("I/O error while writing physical page {}: {}", physical, e);
                e
            })?;
        Ok(())
    }
}

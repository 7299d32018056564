pub mod clock;
pub mod lru;
pub mod replacer;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::{DiskManager, PageId, PAGE_SIZE};
use log::{debug, error, warn};
use parking_lot::Mutex;
use replacer::{FrameId, Replacer};
use std::collections::{HashMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

struct Frame {
    data: Box<[u8; PAGE_SIZE]>,
    page_id: Option<PageId>,
    pin_count: u32,
    is_dirty: bool,
}

impl Frame {
    fn new() -> Self {
        Self {
            data: Box::new([0u8; PAGE_SIZE]),
            page_id: None,
            pin_count: 0,
            is_dirty: false,
        }
    }

    fn reset(&mut self) {
        self.page_id = None;
        self.pin_count = 0;
        self.is_dirty = false;
        self.data.fill(0);
    }
}

/// Everything a pin-count transition touches, guarded by one lock so that a
/// frame's pin count and its replacer candidacy never disagree.
struct PoolState {
    frames: Vec<Frame>,
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: Box<dyn Replacer>,
}

struct BufferPoolInner {
    state: Mutex<PoolState>,
    disk_manager: Mutex<DiskManager>,
    pool_size: usize,
}

/// Fixed-size page cache in front of the [`DiskManager`].
///
/// Pages are handed out as [`PageReadGuard`] / [`PageWriteGuard`]; each guard
/// holds one pin and releases it when dropped.
#[derive(Clone)]
pub struct BufferPoolManager {
    inner: Arc<BufferPoolInner>,
}

impl BufferPoolManager {
    pub fn new(disk_manager: DiskManager, replacer: Box<dyn Replacer>, pool_size: usize) -> Self {
        let frames = (0..pool_size).map(|_| Frame::new()).collect();
        let free_list = (0..pool_size as FrameId).collect();

        Self {
            inner: Arc::new(BufferPoolInner {
                state: Mutex::new(PoolState {
                    frames,
                    page_table: HashMap::with_capacity(pool_size),
                    free_list,
                    replacer,
                }),
                disk_manager: Mutex::new(disk_manager),
                pool_size,
            }),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.inner.pool_size
    }

    pub fn fetch_page(&self, page_id: PageId) -> StorageResult<PageReadGuard> {
        let data = self.inner.pin_page(page_id)?;
        Ok(PageReadGuard {
            inner: self.inner.clone(),
            page_id,
            data,
        })
    }

    pub fn fetch_page_write(&self, page_id: PageId) -> StorageResult<PageWriteGuard> {
        let data = self.inner.pin_page(page_id)?;
        Ok(PageWriteGuard {
            inner: self.inner.clone(),
            page_id,
            data,
            is_dirty: false,
        })
    }

    /// Allocate a fresh page on disk and pin it in a zeroed frame.
    pub fn new_page(&self) -> StorageResult<(PageId, PageWriteGuard)> {
        let mut state = self.inner.state.lock();
        let frame_id = self.inner.acquire_frame(&mut state)?;

        let page_id = match self.inner.disk_manager.lock().allocate_page() {
            Ok(page_id) => page_id,
            Err(e) => {
                state.free_list.push_back(frame_id);
                return Err(e);
            }
        };

        let frame = &mut state.frames[frame_id as usize];
        frame.reset();
        frame.page_id = Some(page_id);
        frame.pin_count = 1;
        // A new page has no on-disk image yet, so it must be written back.
        frame.is_dirty = true;
        let data = frame.data.as_mut() as *mut [u8; PAGE_SIZE];

        state.page_table.insert(page_id, frame_id);
        state.replacer.pin(frame_id);
        debug!("new page {} in frame {}", page_id, frame_id);

        Ok((
            page_id,
            PageWriteGuard {
                inner: self.inner.clone(),
                page_id,
                data,
                is_dirty: true,
            },
        ))
    }

    /// Release one pin. The dirty flag is OR-ed in, never cleared. Returns
    /// `false` if the page is not resident or not pinned.
    pub(crate) fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        self.inner.unpin_page(page_id, is_dirty)
    }

    /// Write a resident page back to disk. Returns `false` if not resident.
    pub fn flush_page(&self, page_id: PageId) -> StorageResult<bool> {
        let mut state = self.inner.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(false);
        };

        let frame = &mut state.frames[frame_id as usize];
        self.inner
            .disk_manager
            .lock()
            .write_page(page_id, frame.data.as_ref())?;
        frame.is_dirty = false;
        Ok(true)
    }

    pub fn flush_all(&self) -> StorageResult<()> {
        self.inner.flush_all()
    }

    /// Remove a page from the pool and free it on disk. Refuses (returns
    /// `false`) while the page is pinned.
    pub fn delete_page(&self, page_id: PageId) -> StorageResult<bool> {
        let mut state = self.inner.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            self.inner.disk_manager.lock().deallocate_page(page_id)?;
            return Ok(true);
        };

        let pin_count = state.frames[frame_id as usize].pin_count;
        if pin_count > 0 {
            warn!(
                "refusing to delete page {}: still pinned {} time(s)",
                page_id, pin_count
            );
            return Ok(false);
        }

        state.replacer.pin(frame_id);
        state.page_table.remove(&page_id);
        state.frames[frame_id as usize].reset();
        state.free_list.push_back(frame_id);
        self.inner.disk_manager.lock().deallocate_page(page_id)?;
        debug!("deleted page {} from frame {}", page_id, frame_id);
        Ok(true)
    }

    pub fn is_page_free(&self, page_id: PageId) -> StorageResult<bool> {
        self.inner.disk_manager.lock().is_page_free(page_id)
    }

    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.inner.state.lock();
        state
            .page_table
            .get(&page_id)
            .map(|&frame_id| state.frames[frame_id as usize].pin_count)
    }

    pub fn is_resident(&self, page_id: PageId) -> bool {
        self.inner.state.lock().page_table.contains_key(&page_id)
    }

    pub fn free_frame_count(&self) -> usize {
        self.inner.state.lock().free_list.len()
    }

    pub fn evictable_frame_count(&self) -> usize {
        self.inner.state.lock().replacer.size()
    }

    /// Debug check that no caller leaked a pin. Logs every pinned page.
    pub fn check_all_unpinned(&self) -> bool {
        let state = self.inner.state.lock();
        let mut all_unpinned = true;
        for frame in state.frames.iter().filter(|f| f.pin_count > 0) {
            all_unpinned = false;
            error!(
                "page {:?} still pinned, pin count {}",
                frame.page_id, frame.pin_count
            );
        }
        all_unpinned
    }

    /// Run `f` with exclusive access to the disk manager.
    pub fn with_disk_manager<T>(&self, f: impl FnOnce(&mut DiskManager) -> T) -> T {
        f(&mut self.inner.disk_manager.lock())
    }
}

impl BufferPoolInner {
    /// Pin `page_id`, reading it from disk on a miss, and return its frame buffer.
    fn pin_page(&self, page_id: PageId) -> StorageResult<*mut [u8; PAGE_SIZE]> {
        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = &mut state.frames[frame_id as usize];
            frame.pin_count += 1;
            let data = frame.data.as_mut() as *mut [u8; PAGE_SIZE];
            state.replacer.pin(frame_id);
            return Ok(data);
        }

        let frame_id = self.acquire_frame(&mut state)?;
        let frame = &mut state.frames[frame_id as usize];
        if let Err(e) = self
            .disk_manager
            .lock()
            .read_page(page_id, frame.data.as_mut())
        {
            frame.reset();
            state.free_list.push_back(frame_id);
            return Err(e);
        }
        frame.page_id = Some(page_id);
        frame.pin_count = 1;
        frame.is_dirty = false;
        let data = frame.data.as_mut() as *mut [u8; PAGE_SIZE];

        state.page_table.insert(page_id, frame_id);
        state.replacer.pin(frame_id);
        Ok(data)
    }

    /// Take a frame from the free list, or evict a victim and write it back if
    /// dirty. The returned frame is reset and unmapped.
    fn acquire_frame(&self, state: &mut PoolState) -> StorageResult<FrameId> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = state
            .replacer
            .evict()
            .ok_or(StorageError::BufferPoolFull)?;

        let frame = &mut state.frames[frame_id as usize];
        debug_assert_eq!(frame.pin_count, 0, "replacer evicted a pinned frame");
        if let Some(old_page_id) = frame.page_id {
            if frame.is_dirty {
                if let Err(e) = self
                    .disk_manager
                    .lock()
                    .write_page(old_page_id, frame.data.as_ref())
                {
                    state.replacer.unpin(frame_id);
                    return Err(e);
                }
            }
            debug!("evicted page {} from frame {}", old_page_id, frame_id);
            state.page_table.remove(&old_page_id);
        }
        state.frames[frame_id as usize].reset();
        Ok(frame_id)
    }

    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };

        let frame = &mut state.frames[frame_id as usize];
        if frame.pin_count == 0 {
            return false;
        }
        frame.pin_count -= 1;
        frame.is_dirty |= is_dirty;
        if frame.pin_count == 0 {
            state.replacer.unpin(frame_id);
        }
        true
    }

    fn flush_all(&self) -> StorageResult<()> {
        let mut state = self.state.lock();
        let mut disk_manager = self.disk_manager.lock();

        for frame in state.frames.iter_mut() {
            if let Some(page_id) = frame.page_id {
                if frame.is_dirty {
                    disk_manager.write_page(page_id, frame.data.as_ref())?;
                    frame.is_dirty = false;
                }
            }
        }
        disk_manager.sync()
    }
}

impl Drop for BufferPoolInner {
    fn drop(&mut self) {
        if let Err(e) = self.flush_all() {
            error!("failed to flush buffer pool on shutdown: {}", e);
        }
    }
}

/// Shared view of a pinned page. Unpins on drop.
pub struct PageReadGuard {
    inner: Arc<BufferPoolInner>,
    page_id: PageId,
    data: *const [u8; PAGE_SIZE],
}

impl PageReadGuard {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl Deref for PageReadGuard {
    type Target = [u8; PAGE_SIZE];

    fn deref(&self) -> &Self::Target {
        // SAFETY: the frame stays mapped to this page while the pin is held,
        // and the boxed buffer never moves.
        unsafe { &*self.data }
    }
}

impl AsRef<[u8]> for PageReadGuard {
    fn as_ref(&self) -> &[u8] {
        &self[..]
    }
}

impl Drop for PageReadGuard {
    fn drop(&mut self) {
        self.inner.unpin_page(self.page_id, false);
    }
}

/// Exclusive view of a pinned page. Any mutable access marks the page dirty;
/// the pin and the dirty flag are handed back on drop.
pub struct PageWriteGuard {
    inner: Arc<BufferPoolInner>,
    page_id: PageId,
    data: *mut [u8; PAGE_SIZE],
    is_dirty: bool,
}

impl PageWriteGuard {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }
}

impl Deref for PageWriteGuard {
    type Target = [u8; PAGE_SIZE];

    fn deref(&self) -> &Self::Target {
        // SAFETY: see PageReadGuard::deref.
        unsafe { &*self.data }
    }
}

impl DerefMut for PageWriteGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.is_dirty = true;
        // SAFETY: see PageReadGuard::deref. Writers are serialized by the caller.
        unsafe { &mut *self.data }
    }
}

impl AsRef<[u8]> for PageWriteGuard {
    fn as_ref(&self) -> &[u8] {
        &self[..]
    }
}

impl AsMut<[u8]> for PageWriteGuard {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self[..]
    }
}

impl Drop for PageWriteGuard {
    fn drop(&mut self) {
        self.inner.unpin_page(self.page_id, self.is_dirty);
    }
}

// Mark as Send and Sync
unsafe impl Send for PageReadGuard {}
unsafe impl Sync for PageReadGuard {}
unsafe impl Send for PageWriteGuard {}
unsafe impl Sync for PageWriteGuard {}

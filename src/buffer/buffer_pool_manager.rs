use std::collections::VecDeque;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::common::{
    BurrowError, FrameId, PageId, Result, DEFAULT_BUCKET_SIZE, PAGE_SIZE,
};
use crate::container::ExtendibleHashTable;
use crate::storage::disk::{DiskManager, DiskScheduler};

use super::{FrameHeader, LruKReplacer, ReadPageGuard, WritePageGuard};

/// Metadata guarded by the buffer pool's single latch.
struct PoolCore {
    /// Frames not holding any page
    free_list: VecDeque<FrameId>,
    /// Monotonic page-id allocator; ids are never reused
    next_page_id: u32,
}

/// State shared between the manager and the page guards it hands out.
pub(crate) struct BufferPoolState {
    frames: Vec<Arc<FrameHeader>>,
    /// Page table: page id -> frame id for every resident page
    page_table: ExtendibleHashTable<PageId, FrameId>,
    replacer: LruKReplacer,
    latch: Mutex<PoolCore>,
    disk_scheduler: DiskScheduler,
}

impl BufferPoolState {
    /// Drops one pin. Fails if the page is not resident or already unpinned.
    /// The dirty flag only ever ORs in; when the pin count reaches zero the
    /// frame becomes evictable.
    pub(crate) fn unpin(&self, page_id: PageId, is_dirty: bool) -> bool {
        let _core = self.latch.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.as_usize()];
        let Some(remaining) = frame.unpin() else {
            return false;
        };
        if is_dirty {
            frame.set_dirty(true);
        }
        if remaining == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
        true
    }
}

/// BufferPoolManager mediates all access between in-memory frames and the
/// disk: pages are fetched into frames, pinned while in use, written back
/// when evicted dirty. Victims come from the free list first, then from the
/// LRU-K replacer.
///
/// A single latch serializes all metadata updates; disk I/O on a miss or an
/// eviction happens under it, which trades miss concurrency for a simple
/// invariant story.
pub struct BufferPoolManager {
    pool_size: usize,
    state: Arc<BufferPoolState>,
}

impl BufferPoolManager {
    /// Creates a pool of `pool_size` frames over the given disk manager,
    /// with LRU-`replacer_k` replacement.
    pub fn new(pool_size: usize, replacer_k: usize, disk_manager: Arc<DiskManager>) -> Self {
        assert!(pool_size > 0, "pool size must be positive");

        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for i in 0..pool_size {
            let frame_id = FrameId::new(i as u32);
            frames.push(Arc::new(FrameHeader::new(frame_id)));
            free_list.push_back(frame_id);
        }

        // Resume allocation past whatever the file already holds; page 0 is
        // reserved for the index header page.
        let next_page_id = disk_manager.num_file_pages().unwrap_or(0).max(1);

        Self {
            pool_size,
            state: Arc::new(BufferPoolState {
                frames,
                page_table: ExtendibleHashTable::new(DEFAULT_BUCKET_SIZE),
                replacer: LruKReplacer::new(replacer_k, pool_size),
                latch: Mutex::new(PoolCore {
                    free_list,
                    next_page_id,
                }),
                disk_scheduler: DiskScheduler::new(disk_manager),
            }),
        }
    }

    /// Allocates a fresh page id and places the (zeroed) page in a frame,
    /// pinned once and clean. Fails with `OutOfMemory` when every frame is
    /// pinned.
    pub fn new_page(&self) -> Result<Arc<FrameHeader>> {
        let state = &self.state;
        let mut core = state.latch.lock();

        let frame_id = self.acquire_frame(&mut core)?;
        let page_id = PageId::new(core.next_page_id);
        core.next_page_id += 1;

        let frame = &state.frames[frame_id.as_usize()];
        frame.set_page_id(page_id);
        frame.pin();

        state.page_table.insert(page_id, frame_id);
        state.replacer.record_access(frame_id);
        state.replacer.set_evictable(frame_id, false);

        Ok(Arc::clone(frame))
    }

    /// Returns the requested page pinned one more time, reading it from disk
    /// if it is not resident. Fails with `OutOfMemory` when a frame is
    /// needed and every frame is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Result<Arc<FrameHeader>> {
        let state = &self.state;
        let mut core = state.latch.lock();

        if let Some(frame_id) = state.page_table.find(&page_id) {
            let frame = &state.frames[frame_id.as_usize()];
            frame.pin();
            state.replacer.record_access(frame_id);
            state.replacer.set_evictable(frame_id, false);
            return Ok(Arc::clone(frame));
        }

        let frame_id = self.acquire_frame(&mut core)?;
        let frame = &state.frames[frame_id.as_usize()];

        match state.disk_scheduler.read_page_sync(page_id) {
            Ok(buf) => frame.copy_from(&buf[..]),
            Err(e) => {
                core.free_list.push_back(frame_id);
                return Err(e);
            }
        }

        frame.set_page_id(page_id);
        frame.set_dirty(false);
        frame.pin();

        state.page_table.insert(page_id, frame_id);
        state.replacer.record_access(frame_id);
        state.replacer.set_evictable(frame_id, false);

        Ok(Arc::clone(frame))
    }

    /// Drops one pin; see [`BufferPoolState::unpin`].
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        self.state.unpin(page_id, is_dirty)
    }

    /// Writes the page's bytes through the disk manager and clears the dirty
    /// flag unconditionally. Returns false if the page is not resident. Pin
    /// state is untouched.
    ///
    /// The frame is pinned for the duration so the snapshot can be taken
    /// outside the metadata latch; taking the page latch under the metadata
    /// latch would invert the tree's latch order.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let frame = {
            let state = &self.state;
            let _core = state.latch.lock();
            let Some(frame_id) = state.page_table.find(&page_id) else {
                return Ok(false);
            };
            let frame = &state.frames[frame_id.as_usize()];
            frame.pin();
            state.replacer.set_evictable(frame_id, false);
            Arc::clone(frame)
        };

        let result = self.write_back(&frame, page_id);
        self.state.unpin(page_id, false);
        result.map(|_| true)
    }

    /// Flushes every frame currently holding a valid page.
    pub fn flush_all_pages(&self) -> Result<()> {
        for frame_index in 0..self.pool_size {
            let pinned = {
                let state = &self.state;
                let _core = state.latch.lock();
                let frame = &state.frames[frame_index];
                let page_id = frame.page_id();
                if !page_id.is_valid() {
                    continue;
                }
                frame.pin();
                state.replacer.set_evictable(frame.frame_id(), false);
                (Arc::clone(frame), page_id)
            };

            let (frame, page_id) = pinned;
            let result = self.write_back(&frame, page_id);
            self.state.unpin(page_id, false);
            result?;
        }
        Ok(())
    }

    /// Snapshots the (pinned) frame under its read latch, clears the dirty
    /// flag, and writes the snapshot out. Later modifications re-dirty the
    /// frame, so nothing is lost to the race with the disk write.
    fn write_back(&self, frame: &FrameHeader, page_id: PageId) -> Result<()> {
        let mut buf = Box::new([0u8; PAGE_SIZE]);
        {
            let data = frame.read_data();
            buf.copy_from_slice(&data[..]);
            frame.set_dirty(false);
        }
        self.state.disk_scheduler.write_page_sync(page_id, buf)
    }

    /// Removes the page from the pool and notifies the disk manager that the
    /// id is dead. Returns false only when the page is resident and pinned;
    /// deleting a non-resident page succeeds.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let state = &self.state;
        let mut core = state.latch.lock();

        if let Some(frame_id) = state.page_table.find(&page_id) {
            let frame = &state.frames[frame_id.as_usize()];
            if frame.pin_count() > 0 {
                return false;
            }
            state.page_table.remove(&page_id);
            state.replacer.remove(frame_id);
            frame.reset();
            core.free_list.push_back(frame_id);
        }

        state.disk_scheduler.disk_manager().deallocate_page(page_id);
        true
    }

    /// Fetches the page and read-latches it.
    pub fn checked_read_page(&self, page_id: PageId) -> Result<ReadPageGuard> {
        let frame = self.fetch_page(page_id)?;
        Ok(unsafe { ReadPageGuard::new(page_id, frame, Arc::clone(&self.state)) })
    }

    /// Fetches the page and write-latches it.
    pub fn checked_write_page(&self, page_id: PageId) -> Result<WritePageGuard> {
        let frame = self.fetch_page(page_id)?;
        Ok(unsafe { WritePageGuard::new(page_id, frame, Arc::clone(&self.state)) })
    }

    /// Allocates a new page and write-latches it.
    pub fn checked_new_page(&self) -> Result<WritePageGuard> {
        let frame = self.new_page()?;
        let page_id = frame.page_id();
        Ok(unsafe { WritePageGuard::new(page_id, frame, Arc::clone(&self.state)) })
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn free_frame_count(&self) -> usize {
        self.state.latch.lock().free_list.len()
    }

    /// Number of frames the replacer could currently evict.
    pub fn evictable_count(&self) -> usize {
        self.state.replacer.size()
    }

    /// Pin count of a resident page, None if not resident.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let _core = self.state.latch.lock();
        self.state
            .page_table
            .find(&page_id)
            .map(|frame_id| self.state.frames[frame_id.as_usize()].pin_count())
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        self.state.disk_scheduler.disk_manager()
    }

    /// Hands out a usable frame: free list first, otherwise evict a victim,
    /// writing its old page back if dirty. The returned frame is reset.
    fn acquire_frame(&self, core: &mut PoolCore) -> Result<FrameId> {
        let state = &self.state;

        if let Some(frame_id) = core.free_list.pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = state.replacer.evict() else {
            return Err(BurrowError::OutOfMemory);
        };
        let frame = &state.frames[frame_id.as_usize()];
        let old_page_id = frame.page_id();

        if frame.is_dirty() {
            debug!("writing back dirty page {} before eviction", old_page_id);
            let mut buf = Box::new([0u8; PAGE_SIZE]);
            frame.copy_to(&mut buf[..]);
            if let Err(e) = state.disk_scheduler.write_page_sync(old_page_id, buf) {
                // The victim cannot be kept: its replacer state is gone.
                // Drop the page and surface the error.
                state.page_table.remove(&old_page_id);
                frame.reset();
                core.free_list.push_back(frame_id);
                return Err(e);
            }
        }

        state.page_table.remove(&old_page_id);
        frame.reset();
        Ok(frame_id)
    }
}

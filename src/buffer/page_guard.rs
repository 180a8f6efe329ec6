use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::{PageId, PAGE_SIZE};

use super::buffer_pool_manager::BufferPoolState;
use super::FrameHeader;

/// RAII guard for shared access to a page: holds the page's read latch and
/// one pin. Dropping it releases the latch, then the pin.
pub struct ReadPageGuard {
    page_id: PageId,
    frame: Arc<FrameHeader>,
    /// None once the guard has been defused by `into_frame`
    state: Option<Arc<BufferPoolState>>,
    /// Held read latch; the frame is kept alive by the Arc above
    data_guard: Option<RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>>>,
}

impl ReadPageGuard {
    /// # Safety
    /// The data guard's lifetime is erased; the Arc stored alongside it must
    /// keep the frame alive for as long as the guard exists.
    pub(crate) unsafe fn new(
        page_id: PageId,
        frame: Arc<FrameHeader>,
        state: Arc<BufferPoolState>,
    ) -> Self {
        let data_guard = frame.data.read();
        let data_guard: RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>> =
            std::mem::transmute(data_guard);

        Self {
            page_id,
            frame,
            state: Some(state),
            data_guard: Some(data_guard),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data_guard.as_ref().unwrap()[..]
    }

    /// Releases the read latch but keeps the pin, handing back the frame.
    /// The caller becomes responsible for unpinning.
    pub(crate) fn into_frame(mut self) -> Arc<FrameHeader> {
        self.data_guard.take();
        self.state.take();
        Arc::clone(&self.frame)
    }
}

impl Deref for ReadPageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        // Latch first, pin second.
        self.data_guard.take();
        if let Some(state) = self.state.take() {
            state.unpin(self.page_id, false);
        }
    }
}

/// RAII guard for exclusive access to a page: holds the page's write latch
/// and one pin. The unpin reports the page dirty iff `data_mut` was called.
pub struct WritePageGuard {
    page_id: PageId,
    frame: Arc<FrameHeader>,
    state: Option<Arc<BufferPoolState>>,
    data_guard: Option<RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>>>,
    is_dirty: bool,
}

impl WritePageGuard {
    /// # Safety
    /// Same contract as [`ReadPageGuard::new`].
    pub(crate) unsafe fn new(
        page_id: PageId,
        frame: Arc<FrameHeader>,
        state: Arc<BufferPoolState>,
    ) -> Self {
        let data_guard = frame.data.write();
        let data_guard: RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>> =
            std::mem::transmute(data_guard);

        Self {
            page_id,
            frame,
            state: Some(state),
            data_guard: Some(data_guard),
            is_dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data_guard.as_ref().unwrap()[..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.is_dirty = true;
        &mut self.data_guard.as_mut().unwrap()[..]
    }
}

impl Deref for WritePageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_mut()
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        self.data_guard.take();
        if let Some(state) = self.state.take() {
            state.unpin(self.page_id, self.is_dirty);
        }
    }
}

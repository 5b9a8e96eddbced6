//! # Buffer Objects
//!
//! A [`BufferObject`] is a GPU-visible allocation of `num_pages` pages.
//! It is always handled through an `Arc`: the strong count *is* the
//! object's reference count, and every mapping holds exactly one of them.
//!
//! Everything that can change while the object is alive (placement, host
//! backing, the moving fence) lives in [`BoState`] behind the object's
//! [`Reservation`]. Holding a [`BoGuard`] is the only way to look at it.

use crate::device::BoDevice;
use crate::fence::Fence;
use crate::mem::MemRegion;
use crate::tt::TtPages;
use crate::vma::FileId;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use kernel_sync::{Reservation, ReservationGuard, SpinLock};

/// Reservation-protected part of a buffer object.
pub struct BoState {
    pub mem: MemRegion,
    /// Host backing pages; `None` for buffers that only ever live in
    /// device memory.
    pub ttm: Option<TtPages>,
    /// Set while a relocation is in flight.
    pub moving: Option<Arc<dyn Fence>>,
}

impl BoState {
    #[must_use]
    pub const fn new(mem: MemRegion, ttm: Option<TtPages>) -> Self {
        Self {
            mem,
            ttm,
            moving: None,
        }
    }

    /// Start a relocation that completes when `fence` signals.
    pub fn set_moving(&mut self, fence: Arc<dyn Fence>) {
        self.moving = Some(fence);
    }
}

impl fmt::Debug for BoState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoState")
            .field("mem", &self.mem)
            .field("ttm", &self.ttm)
            .field("moving", &self.moving.is_some())
            .finish()
    }
}

/// Proof of holding a buffer object's reservation.
pub type BoGuard<'a> = ReservationGuard<'a, BoState>;

pub struct BufferObject {
    device: Arc<BoDevice>,
    num_pages: usize,
    /// First page of this object in the device's offset space.
    vma_node_start: u64,
    resv: Reservation<BoState>,
    /// Files allowed to map this object.
    allowed: SpinLock<Vec<FileId>>,
}

impl BufferObject {
    pub(crate) fn new(
        device: Arc<BoDevice>,
        num_pages: usize,
        vma_node_start: u64,
        state: BoState,
    ) -> Self {
        Self {
            device,
            num_pages,
            vma_node_start,
            resv: Reservation::new(state),
            allowed: SpinLock::new(Vec::new()),
        }
    }

    #[inline]
    #[must_use]
    pub fn device(&self) -> &Arc<BoDevice> {
        &self.device
    }

    #[inline]
    #[must_use]
    pub const fn num_pages(&self) -> usize {
        self.num_pages
    }

    /// Size in bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> u64 {
        (self.num_pages as u64) << crate::config::PAGE_SHIFT
    }

    #[inline]
    #[must_use]
    pub const fn vma_node_start(&self) -> u64 {
        self.vma_node_start
    }

    /// Byte offset to pass to `mmap` to map this object.
    #[inline]
    #[must_use]
    pub const fn mmap_offset(&self) -> u64 {
        self.vma_node_start << crate::config::PAGE_SHIFT
    }

    #[inline]
    #[must_use]
    pub const fn resv(&self) -> &Reservation<BoState> {
        &self.resv
    }

    /// Let `file` map this object.
    pub fn allow(&self, file: FileId) {
        let mut allowed = self.allowed.lock();
        if !allowed.contains(&file) {
            allowed.push(file);
        }
    }

    pub fn revoke(&self, file: FileId) {
        self.allowed.lock().retain(|f| *f != file);
    }

    /// Whether `file` was [allowed](Self::allow) to map this object.
    ///
    /// Building block for [`BoDriver::verify_access`](crate::BoDriver::verify_access).
    #[must_use]
    pub fn verify_node_access(&self, file: FileId) -> bool {
        self.allowed.lock().contains(&file)
    }
}

impl Drop for BufferObject {
    fn drop(&mut self) {
        let device = Arc::clone(&self.device);
        device.offset_index().remove(self.vma_node_start);

        let state = self.resv.get_mut();
        let man = device.man(state.mem.mem_type);
        let _io = man.io_lock_uninterruptible();
        man.io_free_vm(device.driver(), &mut state.mem);
    }
}

impl fmt::Debug for BufferObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferObject")
            .field("num_pages", &self.num_pages)
            .field("vma_node_start", &self.vma_node_start)
            .field("reserved", &self.resv.is_reserved())
            .finish_non_exhaustive()
    }
}

//! # Buffer-Object Devices
//!
//! A [`BoDevice`] ties together everything buffer objects of one GPU
//! share: the driver hooks, the host page pool, the offset space user
//! space maps through, and one [`MemTypeManager`] per memory type.

use crate::bo::{BoState, BufferObject};
use crate::config::{MEM_TYPES, PAGE_SHIFT};
use crate::driver::BoDriver;
use crate::error::{IoReserveError, OffsetIndexError};
use crate::mem::{MemRegion, MemType};
use crate::offset_index::OffsetIndex;
use crate::tt::{PagePool, TtPages};
use crate::vma::MappingId;
use alloc::sync::Arc;
use core::fmt;
use kernel_sync::{Interrupt, Interrupted, SpinLock, SpinLockGuard};
use log::trace;

/// Bus-resource bookkeeping of one memory type.
#[derive(Default)]
pub struct MemTypeManager {
    /// Reserving I/O space is cheap and needs no serialization.
    io_reserve_fastpath: bool,
    io_lock: SpinLock<()>,
}

/// Held across the page-resolution step of a fault.
pub struct IoGuard<'a> {
    _lock: Option<SpinLockGuard<'a, ()>>,
}

impl MemTypeManager {
    #[must_use]
    pub const fn new(io_reserve_fastpath: bool) -> Self {
        Self {
            io_reserve_fastpath,
            io_lock: SpinLock::new(()),
        }
    }

    #[inline]
    #[must_use]
    pub const fn io_reserve_fastpath(&self) -> bool {
        self.io_reserve_fastpath
    }

    /// Take the I/O accounting lock. A no-op on the fast path.
    ///
    /// # Errors
    /// [`Interrupted`] if a signal became pending while waiting.
    pub fn io_lock(&self, interrupt: &dyn Interrupt) -> Result<IoGuard<'_>, Interrupted> {
        if self.io_reserve_fastpath {
            return Ok(IoGuard { _lock: None });
        }
        let guard = self.io_lock.lock_interruptible(interrupt)?;
        Ok(IoGuard { _lock: Some(guard) })
    }

    /// Take the I/O accounting lock, ignoring signals. For teardown paths
    /// that cannot back out.
    pub fn io_lock_uninterruptible(&self) -> IoGuard<'_> {
        if self.io_reserve_fastpath {
            return IoGuard { _lock: None };
        }
        IoGuard {
            _lock: Some(self.io_lock.lock()),
        }
    }

    /// Whether somebody holds the I/O accounting lock right now.
    #[must_use]
    pub fn is_io_locked(&self) -> bool {
        self.io_lock.is_locked()
    }

    /// Reserve bus resources for `mem` for as long as the object is mapped.
    ///
    /// Idempotent per object: a second call finds the VM reservation
    /// already in place.
    ///
    /// # Errors
    /// Whatever [`BoDriver::io_mem_reserve`] reports.
    pub fn io_reserve_vm(
        &self,
        driver: &dyn BoDriver,
        mem: &mut MemRegion,
    ) -> Result<(), IoReserveError> {
        if mem.bus.io_reserved_vm {
            return Ok(());
        }

        if self.io_reserve_fastpath {
            driver.io_mem_reserve(mem)?;
        } else {
            if mem.bus.io_reserved_count == 0 {
                driver.io_mem_reserve(mem)?;
            }
            mem.bus.io_reserved_count += 1;
        }

        mem.bus.io_reserved_vm = true;
        Ok(())
    }

    /// Undo [`io_reserve_vm`](Self::io_reserve_vm).
    pub fn io_free_vm(&self, driver: &dyn BoDriver, mem: &mut MemRegion) {
        if !mem.bus.io_reserved_vm {
            return;
        }
        mem.bus.io_reserved_vm = false;

        if self.io_reserve_fastpath {
            driver.io_mem_free(mem);
            return;
        }

        mem.bus.io_reserved_count = mem.bus.io_reserved_count.saturating_sub(1);
        if mem.bus.io_reserved_count == 0 {
            driver.io_mem_free(mem);
        }
    }
}

impl fmt::Debug for MemTypeManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemTypeManager")
            .field("io_reserve_fastpath", &self.io_reserve_fastpath)
            .field("io_locked", &self.io_lock.is_locked())
            .finish()
    }
}

pub struct BoDevice {
    driver: Arc<dyn BoDriver>,
    pool: Arc<dyn PagePool>,
    vma_manager: OffsetIndex,
    man: [MemTypeManager; MEM_TYPES],
    /// File mapping of the device node; every mapping of this device's
    /// objects should go through it.
    dev_mapping: MappingId,
}

impl BoDevice {
    /// A device whose memory types all serialize I/O reservations.
    #[must_use]
    pub fn new(driver: Arc<dyn BoDriver>, pool: Arc<dyn PagePool>) -> Arc<Self> {
        Self::with_managers(
            driver,
            pool,
            OffsetIndex::default(),
            core::array::from_fn(|_| MemTypeManager::new(false)),
        )
    }

    #[must_use]
    pub fn with_managers(
        driver: Arc<dyn BoDriver>,
        pool: Arc<dyn PagePool>,
        vma_manager: OffsetIndex,
        man: [MemTypeManager; MEM_TYPES],
    ) -> Arc<Self> {
        Arc::new(Self {
            driver,
            pool,
            vma_manager,
            man,
            dev_mapping: MappingId::next(),
        })
    }

    #[inline]
    #[must_use]
    pub fn driver(&self) -> &dyn BoDriver {
        &*self.driver
    }

    #[inline]
    #[must_use]
    pub fn pool(&self) -> &dyn PagePool {
        &*self.pool
    }

    #[inline]
    #[must_use]
    pub const fn offset_index(&self) -> &OffsetIndex {
        &self.vma_manager
    }

    #[inline]
    #[must_use]
    pub const fn man(&self, mem_type: MemType) -> &MemTypeManager {
        &self.man[mem_type.index()]
    }

    #[inline]
    #[must_use]
    pub const fn dev_mapping(&self) -> MappingId {
        self.dev_mapping
    }

    /// Create a buffer object of `num_pages` pages placed at `mem` and
    /// register it in the offset space.
    ///
    /// # Errors
    /// See [`OffsetIndex::insert`].
    pub fn create_bo(
        self: &Arc<Self>,
        num_pages: usize,
        mem: MemRegion,
        ttm: Option<TtPages>,
    ) -> Result<Arc<BufferObject>, OffsetIndexError> {
        let start = self.vma_manager.insert(num_pages as u64)?;
        let bo = Arc::new(BufferObject::new(
            Arc::clone(self),
            num_pages,
            start,
            BoState::new(mem, ttm),
        ));
        self.vma_manager.bind(start, &bo);
        trace!(
            "created {num_pages}-page buffer object at offset {:#x}",
            start << PAGE_SHIFT
        );
        Ok(bo)
    }
}

impl fmt::Debug for BoDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoDevice")
            .field("dev_mapping", &self.dev_mapping)
            .field("objects", &self.vma_manager.len())
            .finish_non_exhaustive()
    }
}

//! # Mapping Lifecycle
//!
//! A mapping holds exactly one counted reference to its buffer object,
//! from [`establish_mapping`] (or [`on_mapping_open`] for duplicates) until
//! [`on_mapping_close`]:
//!
//! ```text
//!   mmap ──► lookup (+1) ──► verify ──► bind   ──► ... ──► close (−1)
//!                               │
//!                               └─ denied ──► drop (−1), error
//! ```

use crate::access::{AccessBuffer, access};
use crate::addresses::VirtualAddress;
use crate::bo::BufferObject;
use crate::config::PAGE_SHIFT;
use crate::device::BoDevice;
use crate::error::{AccessError, MmapError};
use crate::fault::handle_fault;
use crate::flags::VmFlags;
use crate::vma::{FaultOutcome, FileContext, VirtualMapping, VmFault, VmOperations};
use alloc::sync::Arc;
use kernel_sync::{Interrupt, TaskId};
use log::{debug, error, warn};

/// Callback table of every buffer-object mapping.
#[derive(Debug)]
pub struct BoVmOps;

/// The one instance bound to mappings.
pub static BO_VM_OPS: BoVmOps = BoVmOps;

impl VmOperations for BoVmOps {
    fn fault(&self, vma: &VirtualMapping, vmf: &VmFault<'_>) -> FaultOutcome {
        handle_fault(vma, vmf)
    }

    fn open(&self, vma: &mut VirtualMapping, parent: &VirtualMapping) {
        on_mapping_open(vma, parent);
    }

    fn close(&self, vma: &mut VirtualMapping) {
        on_mapping_close(vma);
    }

    fn access(
        &self,
        vma: &VirtualMapping,
        task: TaskId,
        interrupt: &dyn Interrupt,
        address: VirtualAddress,
        buf: AccessBuffer<'_>,
    ) -> Result<usize, AccessError> {
        access(vma, task, interrupt, address, buf)
    }
}

/// `vma` was created as a copy of `parent`: take another reference.
pub fn on_mapping_open(vma: &mut VirtualMapping, parent: &VirtualMapping) {
    let bo = parent.private().cloned();
    if let Some(bo) = &bo
        && bo.device().dev_mapping() != vma.file_mapping()
    {
        warn!(
            "{bo:?} mapped through file mapping {:?}, device uses {:?}",
            vma.file_mapping(),
            bo.device().dev_mapping()
        );
    }
    vma.set_private(bo);
}

/// `vma` is going away: drop its reference. No fault can reach the buffer
/// through it afterwards.
pub fn on_mapping_close(vma: &mut VirtualMapping) {
    drop(vma.take_private());
}

/// Find the live buffer object registered at `[offset, offset + pages)`.
///
/// # Errors
/// [`MmapError::NotFound`], also for an empty range.
pub fn lookup(
    device: &BoDevice,
    offset: u64,
    pages: u64,
) -> Result<Arc<BufferObject>, MmapError> {
    if pages == 0 {
        error!("refusing to map an empty range at offset {offset:#x}");
        return Err(MmapError::NotFound);
    }
    device.offset_index().lookup(offset, pages).ok_or_else(|| {
        error!("could not find buffer object to map");
        MmapError::NotFound
    })
}

/// Bind `vma` to the buffer object registered at its offset range.
///
/// On success the reference taken by the lookup moves into the mapping.
///
/// # Errors
/// [`MmapError::NotFound`] when nothing live is registered there,
/// otherwise whatever [`BoDriver::verify_access`](crate::BoDriver::verify_access)
/// reports. The lookup reference is released on every error.
pub fn establish_mapping(
    file: &FileContext,
    vma: &mut VirtualMapping,
    device: &BoDevice,
) -> Result<(), MmapError> {
    let bo = lookup(device, vma.pgoff(), vma.pages())?;
    bo.device().driver().verify_access(&bo, file)?;

    debug!(
        "mapping {bo:?} at {}..{} (offset {:#x})",
        vma.start(),
        vma.end(),
        vma.pgoff() << PAGE_SHIFT
    );
    vma.bind(&BO_VM_OPS, bo, VmFlags::buffer_object_mapping());
    Ok(())
}

//! # Page Fault Handling
//!
//! [`handle_fault`] resolves one faulting address of a buffer-object
//! mapping and installs translations for it and, speculatively, for up to
//! [`NUM_PREFAULT`]` - 1` following pages.
//!
//! ```text
//!  reserve ─► imported? ─► notify driver ─► wait_idle ─► io lock + reserve
//!                                                              │
//!   Installed(n) ◄── prefault loop ◄── populate ◄── prot ◄── page offset
//! ```
//!
//! Each step is a possible exit. Locks are released in reverse order on
//! every path: the I/O guard first, then the reservation.

use crate::addresses::VirtualAddress;
use crate::bo::{BoState, BufferObject};
use crate::config::{NUM_PREFAULT, PAGE_SHIFT};
use crate::error::{InsertError, NotifyError};
use crate::fence::wait_idle;
use crate::reserve::reserve_for_fault;
use crate::vma::{FaultOutcome, PageFrame, VirtualMapping, VmFault};
use log::{debug, error, trace, warn};

/// Fault handler for buffer-object mappings.
///
/// `vma` must have been bound by [`establish_mapping`](crate::establish_mapping);
/// a mapping that was already closed yields a bus error.
pub fn handle_fault(vma: &VirtualMapping, vmf: &VmFault<'_>) -> FaultOutcome {
    let Some(bo) = vma.private() else {
        debug!("fault at {} on a detached mapping", vmf.address);
        return FaultOutcome::BusError;
    };

    let mut state = match reserve_for_fault(bo, vmf) {
        Ok(guard) => guard,
        Err(outcome) => return outcome,
    };

    // Imported pages belong to the exporter; it has to map them itself.
    if state.ttm.as_ref().is_some_and(|tt| tt.is_imported()) {
        debug!("refusing to fault imported pages of {bo:?}");
        return FaultOutcome::BusError;
    }

    let device = bo.device();
    match device.driver().fault_reserve_notify(bo, &mut state) {
        Ok(()) => {}
        Err(NotifyError::Busy | NotifyError::Interrupted) => return FaultOutcome::NoPage,
        Err(NotifyError::Fatal) => {
            error!("driver refused to make {bo:?} mappable");
            return FaultOutcome::BusError;
        }
    }

    let mut state = match wait_idle(bo, state, vmf) {
        Ok(guard) => guard,
        Err(outcome) => return outcome,
    };

    let man = device.man(state.mem.mem_type);
    let signal = || vmf.mm.signal_pending();
    let Ok(_io) = man.io_lock(&signal) else {
        return FaultOutcome::NoPage;
    };
    if let Err(err) = man.io_reserve_vm(device.driver(), &mut state.mem) {
        warn!("cannot reserve I/O space for {bo:?}: {err}");
        return FaultOutcome::NoPage;
    }

    let outcome = install_pages(bo, &mut state, vma, vmf);
    trace!("fault at {} on {bo:?}: {outcome:?}", vmf.address);
    outcome
}

/// Steps after all locks are held: locate the page, fix up protection,
/// populate host backing, run the prefault loop.
#[allow(clippy::cast_possible_truncation)]
fn install_pages(
    bo: &BufferObject,
    state: &mut BoState,
    vma: &VirtualMapping,
    vmf: &VmFault<'_>,
) -> FaultOutcome {
    let node_start = bo.vma_node_start();
    let num_pages = bo.num_pages() as u64;

    let Some(mut page_offset) = vmf
        .address
        .offset_from(vma.start())
        .map(|bytes| (bytes >> PAGE_SHIFT) + vma.pgoff())
        .and_then(|page| page.checked_sub(node_start))
    else {
        debug!("fault at {} lies before {bo:?}", vmf.address);
        return FaultOutcome::BusError;
    };
    let page_last = (vma.pages() + vma.pgoff())
        .saturating_sub(node_start)
        .min(num_pages);

    if page_offset >= num_pages {
        debug!(
            "fault at {} is page {page_offset} of {num_pages}-page {bo:?}",
            vmf.address
        );
        return FaultOutcome::BusError;
    }

    let mut region = vma.snapshot();
    region.prot = region.prot.for_placement(state.mem.placement);

    let device = bo.device();
    let is_iomem = state.mem.bus.is_iomem;
    if is_iomem {
        // Device memory must never be mapped encrypted.
        region.prot = region.prot.decrypted();
    } else {
        let Some(tt) = state.ttm.as_mut() else {
            error!("{bo:?} is in host memory but has no backing pages");
            return FaultOutcome::BusError;
        };
        if let Err(err) = device.driver().populate(tt, device.pool()) {
            debug!("populating {bo:?} failed: {err}");
            return FaultOutcome::OutOfMemory;
        }
    }

    let mut address: VirtualAddress = vmf.address.page_floor();
    let mut installed = 0;
    for i in 0..NUM_PREFAULT {
        let frame = if is_iomem {
            PageFrame::device(device.driver().io_mem_pfn(bo, &state.mem, page_offset))
        } else {
            let page = state
                .ttm
                .as_ref()
                .and_then(|tt| tt.page(page_offset as usize));
            match page {
                Some(page) => {
                    page.set_mapping(vma.file_mapping(), node_start + page_offset);
                    PageFrame::host(page.pfn())
                }
                None if i == 0 => return FaultOutcome::OutOfMemory,
                None => break,
            }
        };

        // Busy: a racing fault got there first, or we prefaulted into an
        // already populated entry. Any later error just ends the batch.
        match vmf.mm.insert(&region, address, frame) {
            Ok(()) => installed += 1,
            Err(InsertError::Busy) => break,
            Err(_) if i > 0 => break,
            Err(InsertError::OutOfMemory) => return FaultOutcome::OutOfMemory,
            Err(err) => {
                error!("installing {address} for {bo:?} failed: {err}");
                return FaultOutcome::BusError;
            }
        }

        address = address.add_pages(1);
        page_offset += 1;
        if page_offset >= page_last {
            break;
        }
    }

    FaultOutcome::Installed(installed)
}

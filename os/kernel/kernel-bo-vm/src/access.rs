//! # Direct Access
//!
//! Byte-granular reads and writes of a mapped buffer without faulting it
//! in, for debuggers and `/proc/<pid>/mem`. Host pages are copied one at a
//! time through a short-lived [`kmap`](crate::Page::kmap), so the buffer is
//! never mapped as a whole.
//!
//! This path always blocks on the reservation; it is never entered from
//! fault context.

use crate::addresses::VirtualAddress;
use crate::bo::BoState;
use crate::config::{PAGE_SHIFT, PAGE_SIZE};
use crate::error::AccessError;
use crate::mem::MemType;
use crate::tt::{TtPages, TtState};
use crate::vma::VirtualMapping;
use kernel_sync::{Interrupt, TaskId};

/// Caller-side buffer of a direct access.
#[derive(Debug)]
pub enum AccessBuffer<'a> {
    /// Copy from the buffer object into this slice.
    Read(&'a mut [u8]),
    /// Copy this slice into the buffer object.
    Write(&'a [u8]),
}

impl AccessBuffer<'_> {
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        match self {
            Self::Read(buf) => buf.len(),
            Self::Write(buf) => buf.len(),
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    #[must_use]
    pub const fn is_write(&self) -> bool {
        matches!(self, Self::Write(_))
    }
}

/// Copy `buf.len()` bytes between `buf` and the buffer object mapped by
/// `vma`, starting at the byte `address` maps to.
///
/// Returns the number of bytes transferred, which is always the full
/// length on success.
///
/// # Errors
/// - [`AccessError::OutOfRange`] for an empty range or one reaching past
///   the buffer; nothing is reserved or touched then.
/// - [`AccessError::Detached`] if the mapping was closed.
/// - [`AccessError::Reserve`] if the blocking reserve was interrupted.
/// - [`AccessError::Swapin`] / [`AccessError::Populate`] when host backing
///   cannot be brought in.
/// - [`AccessError::Unsupported`] for special memory the driver cannot
///   access.
pub fn access(
    vma: &VirtualMapping,
    task: TaskId,
    interrupt: &dyn Interrupt,
    address: VirtualAddress,
    buf: AccessBuffer<'_>,
) -> Result<usize, AccessError> {
    let bo = vma.private().ok_or(AccessError::Detached)?;

    let offset = address
        .offset_from(vma.start())
        .zip(vma.pgoff().checked_sub(bo.vma_node_start()))
        .map(|(bytes, pages)| bytes + (pages << PAGE_SHIFT))
        .ok_or(AccessError::OutOfRange)?;
    let len = buf.len() as u64;
    if len == 0 || offset.checked_add(len).is_none_or(|end| end > bo.size()) {
        return Err(AccessError::OutOfRange);
    }

    let mut guard = bo.resv().reserve(task, interrupt)?;
    let state: &mut BoState = &mut guard;

    match state.mem.mem_type {
        mem_type @ (MemType::System | MemType::Tt) => {
            let device = bo.device();
            let tt = state.ttm.as_mut().ok_or(AccessError::NoBacking)?;
            if mem_type == MemType::System && tt.state() == TtState::Swapped {
                tt.swapin(device.pool()).map_err(AccessError::Swapin)?;
            }
            if !tt.is_populated() {
                device
                    .driver()
                    .populate(tt, device.pool())
                    .map_err(AccessError::Populate)?;
            }
            access_kmap(tt, offset, buf)
        }
        MemType::Vram | MemType::Priv => bo
            .device()
            .driver()
            .access_memory(bo, state, offset, buf),
    }
}

/// Copy page by page, mapping one page at a time.
#[allow(clippy::cast_possible_truncation)]
fn access_kmap(
    tt: &TtPages,
    offset: u64,
    mut buf: AccessBuffer<'_>,
) -> Result<usize, AccessError> {
    let len = buf.len();
    let mut page = (offset >> PAGE_SHIFT) as usize;
    let mut in_page = offset as usize & (PAGE_SIZE - 1);
    let mut done = 0;

    while done < len {
        let bytes = (len - done).min(PAGE_SIZE - in_page);
        let mut map = tt.page(page).ok_or(AccessError::NoBacking)?.kmap();
        let window = in_page..in_page + bytes;
        match &mut buf {
            AccessBuffer::Read(dst) => dst[done..done + bytes].copy_from_slice(&map[window]),
            AccessBuffer::Write(src) => map[window].copy_from_slice(&src[done..done + bytes]),
        }
        drop(map);

        page += 1;
        done += bytes;
        in_page = 0;
    }

    Ok(len)
}

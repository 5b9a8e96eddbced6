//! # Buffer-Object Memory Mapping
//!
//! CPU mappings of GPU buffer objects, resolved on demand by a page-fault
//! handler.
//!
//! ## What you get
//! - [`establish_mapping`] binds a [`VirtualMapping`] to the
//!   [`BufferObject`] registered at its offset in the device's
//!   [`OffsetIndex`].
//! - [`handle_fault`] resolves a faulting address to a host page or device
//!   frame and installs it, plus up to [`NUM_PREFAULT`]` - 1` neighbours,
//!   through the caller's [`AddressSpace`].
//! - [`on_mapping_open`] / [`on_mapping_close`] keep the reference count
//!   of the buffer in step with the mappings.
//! - [`access`] copies bytes to and from a mapped buffer without faulting.
//! - [`BoDriver`] is where a GPU driver plugs in.
//!
//! ## Locking
//!
//! The caller enters a fault holding its map lock. A buffer's
//! [`Reservation`](kernel_sync::Reservation) is normally taken *before* the
//! map lock, so the fault path must never block on a reservation (or on a
//! fence guarded by it) while it still holds the map lock:
//!
//! ```text
//!   map lock ─────► try reserve ──ok──► fence idle? ──ok──► io lock ──► insert
//!                       │                   │
//!                       │ busy              │ pending
//!                       ▼                   ▼
//!        pin bo, drop map lock, wait, unpin, Retry
//! ```
//!
//! Lock order, outermost first:
//!
//! | Lock | Held across |
//! |:-----|:------------|
//! | map lock (caller) | the whole fault, unless dropped for a retry |
//! | offset index | a single lookup; never nested with the rest |
//! | reservation | the whole fault / access after it was taken |
//! | I/O accounting | page resolution only, never a fence wait |
//! | page contents ([`Page::kmap`]) | one page copy |
//!
//! ## Outcomes
//!
//! A fault reports exactly one [`FaultOutcome`]. Lower-level errors never
//! leave the fault path; they are classified as:
//!
//! | Outcome | When |
//! |:--------|:-----|
//! | [`Installed`](FaultOutcome::Installed) | at least the faulting page is mapped, or a racing fault mapped it |
//! | [`Retry`](FaultOutcome::Retry) | contended reservation or pending fence, caller may retry |
//! | [`NoPage`](FaultOutcome::NoPage) | transient condition, the access is replayed |
//! | [`BusError`](FaultOutcome::BusError) | out-of-range or unmappable access |
//! | [`OutOfMemory`](FaultOutcome::OutOfMemory) | backing pages could not be allocated |

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod access;
mod addresses;
mod bo;
pub mod config;
mod device;
mod driver;
mod error;
mod escape;
mod fault;
mod fence;
mod flags;
mod mapping;
mod mem;
mod offset_index;
mod reserve;
mod tt;
mod vma;

pub use crate::access::{AccessBuffer, access};
pub use crate::addresses::{Pfn, VirtualAddress};
pub use crate::bo::{BoGuard, BoState, BufferObject};
pub use crate::config::{NUM_PREFAULT, PAGE_SHIFT, PAGE_SIZE};
pub use crate::device::{BoDevice, IoGuard, MemTypeManager};
pub use crate::driver::BoDriver;
pub use crate::error::{
    AccessError, FenceWaitError, InsertError, IoReserveError, MmapError, NotifyError,
    OffsetIndexError, PopulateError,
};
pub use crate::fault::handle_fault;
pub use crate::fence::Fence;
pub use crate::flags::{FaultFlags, PageProt, PlacementFlags, VmFlags};
pub use crate::mapping::{
    BO_VM_OPS, BoVmOps, establish_mapping, lookup, on_mapping_close, on_mapping_open,
};
pub use crate::mem::{BusPlacement, MemRegion, MemType};
pub use crate::offset_index::OffsetIndex;
pub use crate::tt::{Kmap, Page, PageContents, PagePool, SystemPagePool, TtFlags, TtPages, TtState};
pub use crate::vma::{
    AddressSpace, FaultOutcome, FileContext, FileId, FrameKind, MappingId, PageFrame,
    RegionSnapshot, VirtualMapping, VmFault, VmOperations,
};

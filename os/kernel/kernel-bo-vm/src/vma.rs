//! # Virtual Mappings and the VM-Layer Contract
//!
//! Types shared between the caller's virtual-memory layer and this crate:
//!
//! - [`VirtualMapping`]: one process mapping of a buffer object's offset
//!   range, owned by the VM layer.
//! - [`VmOperations`]: the callback table bound to a mapping when it is
//!   established (fault / open / close / access).
//! - [`AddressSpace`]: what the VM layer provides back: the single
//!   *install a translation* primitive plus map-lock and signal hooks.
//! - [`FaultOutcome`]: the only thing a fault reports.

use crate::access::AccessBuffer;
use crate::addresses::{Pfn, VirtualAddress};
use crate::bo::BufferObject;
use crate::config::PAGE_SHIFT;
use crate::error::{AccessError, InsertError};
use crate::flags::{FaultFlags, PageProt, VmFlags};
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use kernel_sync::{Interrupt, TaskId};

/// Identity of a file's address-space mapping (the object pages are
/// accounted against when installed).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MappingId(u64);

impl MappingId {
    #[must_use]
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn from_raw(raw: u64) -> Option<Self> {
        if raw == 0 { None } else { Some(Self(raw)) }
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// Identity of an open file asking for a mapping.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FileId(pub u64);

/// The open file on whose behalf a mapping is established.
#[derive(Copy, Clone, Debug)]
pub struct FileContext {
    pub file: FileId,
    pub mapping: MappingId,
}

/// Kind of frame handed to the install primitive.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FrameKind {
    /// Host page with a page struct behind it.
    Host,
    /// Raw device frame without a page struct.
    Device,
}

/// Result of resolving one faulting address.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PageFrame {
    pub pfn: Pfn,
    pub kind: FrameKind,
}

impl PageFrame {
    #[must_use]
    pub const fn host(pfn: Pfn) -> Self {
        Self {
            pfn,
            kind: FrameKind::Host,
        }
    }

    #[must_use]
    pub const fn device(pfn: Pfn) -> Self {
        Self {
            pfn,
            kind: FrameKind::Device,
        }
    }
}

/// Local copy of a mapping's descriptor with the protection the current
/// fault will install.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RegionSnapshot {
    pub start: VirtualAddress,
    pub end: VirtualAddress,
    pub pgoff: u64,
    pub flags: VmFlags,
    pub prot: PageProt,
    pub file_mapping: MappingId,
}

/// Services the caller's VM layer provides to the fault handler.
pub trait AddressSpace: Sync {
    /// Install one translation `address → frame` with `region.prot`.
    ///
    /// The only primitive that differs between host environments.
    /// `region.flags.mixedmap()` tells whether device frames without page
    /// structs may be inserted.
    ///
    /// # Errors
    /// [`InsertError::Busy`] if a translation already exists there.
    fn insert(
        &self,
        region: &RegionSnapshot,
        address: VirtualAddress,
        frame: PageFrame,
    ) -> Result<(), InsertError>;

    /// Drop the map lock the caller held for this fault.
    ///
    /// Called at most once per fault, only when the fault is allowed to
    /// retry and is about to block.
    fn mmap_read_unlock(&self);

    /// Whether the faulting task has a signal pending.
    fn signal_pending(&self) -> bool {
        false
    }
}

/// One page fault.
#[derive(Copy, Clone)]
pub struct VmFault<'a> {
    pub address: VirtualAddress,
    pub flags: FaultFlags,
    pub task: TaskId,
    pub mm: &'a dyn AddressSpace,
}

impl<'a> VmFault<'a> {
    #[must_use]
    pub const fn new(
        mm: &'a dyn AddressSpace,
        task: TaskId,
        address: VirtualAddress,
        flags: FaultFlags,
    ) -> Self {
        Self {
            address,
            flags,
            task,
            mm,
        }
    }
}

impl fmt::Debug for VmFault<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmFault")
            .field("address", &self.address)
            .field("flags", &self.flags)
            .field("task", &self.task)
            .finish_non_exhaustive()
    }
}

/// What a fault reports to the VM layer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FaultOutcome {
    /// Translations were installed for this many pages (0 if a racing
    /// fault got there first). The access is replayed.
    Installed(usize),
    /// Nothing installed, nothing fatal: the access is replayed and faults
    /// again. Used for transient driver or signal conditions.
    NoPage,
    /// Restart the fault from the top. The reservation is released and,
    /// unless the fault was `retry_nowait`, so is the map lock.
    Retry,
    /// The access can never succeed; deliver a bus error.
    BusError,
    OutOfMemory,
}

impl FaultOutcome {
    #[inline]
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Installed(_))
    }
}

/// Callback table bound to a mapping.
pub trait VmOperations: Sync {
    fn fault(&self, vma: &VirtualMapping, vmf: &VmFault<'_>) -> FaultOutcome;

    /// `vma` was duplicated from `parent` (fork, split).
    fn open(&self, vma: &mut VirtualMapping, parent: &VirtualMapping);

    /// `vma` is being torn down.
    fn close(&self, vma: &mut VirtualMapping);

    /// Out-of-band access to the mapped contents (debuggers, `/proc/pid/mem`).
    ///
    /// # Errors
    /// Implementation-defined; see [`AccessError`].
    fn access(
        &self,
        vma: &VirtualMapping,
        task: TaskId,
        interrupt: &dyn Interrupt,
        address: VirtualAddress,
        buf: AccessBuffer<'_>,
    ) -> Result<usize, AccessError>;
}

/// One process's mapping of a contiguous offset range.
pub struct VirtualMapping {
    start: VirtualAddress,
    end: VirtualAddress,
    /// First mapped page in the device's offset space.
    pgoff: u64,
    flags: VmFlags,
    file_mapping: MappingId,
    ops: Option<&'static dyn VmOperations>,
    private: Option<Arc<BufferObject>>,
}

impl VirtualMapping {
    /// A mapping of `[start, end)` at page offset `pgoff`, not yet bound to
    /// anything.
    #[must_use]
    pub const fn new(
        start: VirtualAddress,
        end: VirtualAddress,
        pgoff: u64,
        flags: VmFlags,
        file_mapping: MappingId,
    ) -> Self {
        Self {
            start,
            end,
            pgoff,
            flags,
            file_mapping,
            ops: None,
            private: None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn start(&self) -> VirtualAddress {
        self.start
    }

    #[inline]
    #[must_use]
    pub const fn end(&self) -> VirtualAddress {
        self.end
    }

    #[inline]
    #[must_use]
    pub const fn pgoff(&self) -> u64 {
        self.pgoff
    }

    /// Length in pages; zero for an inverted range.
    #[inline]
    #[must_use]
    pub const fn pages(&self) -> u64 {
        self.end.as_u64().saturating_sub(self.start.as_u64()) >> PAGE_SHIFT
    }

    #[inline]
    #[must_use]
    pub const fn flags(&self) -> VmFlags {
        self.flags
    }

    #[inline]
    #[must_use]
    pub const fn file_mapping(&self) -> MappingId {
        self.file_mapping
    }

    #[inline]
    #[must_use]
    pub fn private(&self) -> Option<&Arc<BufferObject>> {
        self.private.as_ref()
    }

    #[inline]
    #[must_use]
    pub fn ops(&self) -> Option<&'static dyn VmOperations> {
        self.ops
    }

    /// Bind a callback table and the counted reference it operates on.
    pub(crate) fn bind(
        &mut self,
        ops: &'static dyn VmOperations,
        bo: Arc<BufferObject>,
        flags: VmFlags,
    ) {
        self.ops = Some(ops);
        self.private = Some(bo);
        self.flags = VmFlags::from_bits(self.flags.into_bits() | flags.into_bits());
    }

    pub(crate) fn set_private(&mut self, bo: Option<Arc<BufferObject>>) {
        self.private = bo;
    }

    pub(crate) fn take_private(&mut self) -> Option<Arc<BufferObject>> {
        self.private.take()
    }

    /// Local copy of the descriptor with the mapping's base protection.
    #[must_use]
    pub fn snapshot(&self) -> RegionSnapshot {
        RegionSnapshot {
            start: self.start,
            end: self.end,
            pgoff: self.pgoff,
            flags: self.flags,
            prot: PageProt::from_vm_flags(self.flags),
            file_mapping: self.file_mapping,
        }
    }

    /// Copy this mapping (fork) and let the callback table account for it.
    #[must_use]
    pub fn duplicate(&self, file_mapping: MappingId) -> Self {
        let mut child = Self {
            ops: self.ops,
            private: None,
            file_mapping,
            ..*self
        };
        if let Some(ops) = self.ops {
            ops.open(&mut child, self);
        }
        child
    }

    /// Dispatch a fault through the bound callbacks.
    pub fn fault(&self, vmf: &VmFault<'_>) -> FaultOutcome {
        match self.ops {
            Some(ops) => ops.fault(self, vmf),
            None => FaultOutcome::BusError,
        }
    }

    /// Tear down: runs the close callback and unbinds.
    pub fn close(&mut self) {
        if let Some(ops) = self.ops {
            ops.close(self);
        }
        self.ops = None;
    }

    /// Dispatch an out-of-band access through the bound callbacks.
    ///
    /// # Errors
    /// [`AccessError::Detached`] when nothing is bound, else whatever the
    /// callback reports.
    pub fn access(
        &self,
        task: TaskId,
        interrupt: &dyn Interrupt,
        address: VirtualAddress,
        buf: AccessBuffer<'_>,
    ) -> Result<usize, AccessError> {
        match self.ops {
            Some(ops) => ops.access(self, task, interrupt, address, buf),
            None => Err(AccessError::Detached),
        }
    }
}

impl fmt::Debug for VirtualMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualMapping")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("pgoff", &self.pgoff)
            .field("flags", &self.flags)
            .field("bound", &self.private.is_some())
            .finish_non_exhaustive()
    }
}

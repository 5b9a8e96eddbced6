//! Placement of a buffer object's storage.

use crate::addresses::Pfn;
use crate::flags::PlacementFlags;

/// Memory type a buffer currently lives in.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum MemType {
    /// Plain system memory, not bound to the GPU.
    System,
    /// System memory bound through the GPU's translation table.
    Tt,
    /// Device-local memory behind a PCI BAR.
    Vram,
    /// Driver-specific memory with its own access rules.
    Priv,
}

impl MemType {
    /// Index into the device's memory-type managers.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::System => 0,
            Self::Tt => 1,
            Self::Vram => 2,
            Self::Priv => 3,
        }
    }
}

/// Bus-side view of a placement.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct BusPlacement {
    /// Base bus address of the aperture.
    pub base: u64,
    /// Offset of this buffer inside the aperture.
    pub offset: u64,
    /// Size of the mapped range in bytes.
    pub size: u64,
    /// Storage is device memory reached through the bus.
    pub is_iomem: bool,
    /// The object already holds a VM-lifetime I/O reservation.
    pub io_reserved_vm: bool,
    /// Outstanding I/O reservations on this placement.
    pub io_reserved_count: u32,
}

impl BusPlacement {
    /// First frame of this placement on the bus.
    #[inline]
    #[must_use]
    pub const fn first_pfn(&self) -> Pfn {
        Pfn::containing(self.base + self.offset)
    }
}

/// Current placement of a buffer object.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MemRegion {
    pub mem_type: MemType,
    pub placement: PlacementFlags,
    pub bus: BusPlacement,
}

impl MemRegion {
    /// Host-memory placement.
    #[must_use]
    pub fn host(mem_type: MemType, placement: PlacementFlags) -> Self {
        Self {
            mem_type,
            placement,
            bus: BusPlacement::default(),
        }
    }

    /// Device-memory placement at `base + offset` on the bus.
    #[must_use]
    pub fn iomem(
        mem_type: MemType,
        placement: PlacementFlags,
        base: u64,
        offset: u64,
        size: u64,
    ) -> Self {
        Self {
            mem_type,
            placement,
            bus: BusPlacement {
                base,
                offset,
                size,
                is_iomem: true,
                ..BusPlacement::default()
            },
        }
    }
}

//! # Flag Words
//!
//! Bit-level views of the flag words that cross the boundary between the
//! virtual-memory layer and the buffer-object code: per-fault flags,
//! per-mapping flags, per-translation protection bits and placement
//! caching flags.

use bitfield_struct::bitfield;

/// Flags describing one page fault.
///
/// | Bit | Name           | Meaning |
/// |-----|----------------|---------|
/// | 0   | `write`        | Faulting access was a write. |
/// | 1   | `mkwrite`      | Write fault on a present read-only page. |
/// | 2   | `allow_retry`  | Handler may return [`Retry`](crate::FaultOutcome::Retry). |
/// | 3   | `retry_nowait` | ... but must not drop the map lock or wait first. |
/// | 4   | `killable`     | The wait may be cut short by a fatal signal. |
/// | 5   | `tried`        | This fault was already retried once. |
/// | 6   | `user`         | Fault originated in user mode. |
/// | 7   | `remote`       | Fault on behalf of another process. |
/// | 8   | `instruction`  | Instruction fetch. |
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct FaultFlags {
    pub write: bool,
    pub mkwrite: bool,
    pub allow_retry: bool,
    pub retry_nowait: bool,
    pub killable: bool,
    pub tried: bool,
    pub user: bool,
    pub remote: bool,
    pub instruction: bool,
    #[bits(23)]
    __: u32,
}

impl FaultFlags {
    /// Caller holds the map lock and cannot give it up: block in place.
    #[must_use]
    pub const fn blocking() -> Self {
        Self::new()
    }

    /// Caller lets us drop the map lock, wait, and ask for a retry.
    #[must_use]
    pub const fn retryable() -> Self {
        Self::new().with_allow_retry(true)
    }

    /// Caller accepts a retry but forbids any waiting.
    #[must_use]
    pub const fn nowait() -> Self {
        Self::new().with_allow_retry(true).with_retry_nowait(true)
    }
}

/// Flags of a virtual mapping.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct VmFlags {
    pub read: bool,
    pub write: bool,
    pub exec: bool,
    pub shared: bool,
    /// Memory-mapped I/O or similar; never core-dumped or swapped.
    pub io: bool,
    /// Pure frame-number mapping without page structs.
    pub pfnmap: bool,
    /// Cannot grow through `mremap`.
    pub dontexpand: bool,
    /// Excluded from core dumps.
    pub dontdump: bool,
    /// May contain both host pages and raw device frames.
    pub mixedmap: bool,
    #[bits(55)]
    __: u64,
}

impl VmFlags {
    /// Flags a buffer-object mapping gets when it is established.
    #[must_use]
    pub const fn buffer_object_mapping() -> Self {
        Self::new()
            .with_mixedmap(true)
            .with_io(true)
            .with_dontexpand(true)
            .with_dontdump(true)
    }

    /// Shared read/write mapping, the shape graphics clients request.
    #[must_use]
    pub const fn shared_rw() -> Self {
        Self::new()
            .with_read(true)
            .with_write(true)
            .with_shared(true)
    }
}

/// Protection bits attached to one installed translation.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageProt {
    pub present: bool,
    pub writable: bool,
    pub user: bool,
    pub write_through: bool,
    pub cache_disabled: bool,
    pub write_combine: bool,
    /// Memory-encryption bit; must be clear for device memory.
    pub encrypted: bool,
    pub no_execute: bool,
    #[bits(56)]
    __: u64,
}

impl PageProt {
    /// Base protection for a mapping with `flags`.
    ///
    /// Private writable mappings come out read-only so writes go through
    /// copy-on-write; host memory is encrypted by default.
    #[must_use]
    pub const fn from_vm_flags(flags: VmFlags) -> Self {
        let accessible = flags.read() || flags.write() || flags.exec();
        Self::new()
            .with_present(accessible)
            .with_writable(flags.write() && flags.shared())
            .with_user(true)
            .with_encrypted(true)
            .with_no_execute(!flags.exec())
    }

    #[must_use]
    pub const fn write_combined(self) -> Self {
        self.with_write_combine(true)
            .with_cache_disabled(false)
            .with_write_through(false)
    }

    #[must_use]
    pub const fn uncached(self) -> Self {
        self.with_write_combine(false)
            .with_cache_disabled(true)
            .with_write_through(true)
    }

    #[must_use]
    pub const fn decrypted(self) -> Self {
        self.with_encrypted(false)
    }

    /// Adjust for the caching mode of `placement`.
    ///
    /// Cached placements keep the base protection; otherwise write-combined
    /// wins over uncached.
    #[must_use]
    pub const fn for_placement(self, placement: PlacementFlags) -> Self {
        if placement.cached() {
            self
        } else if placement.write_combined() {
            self.write_combined()
        } else {
            self.uncached()
        }
    }
}

/// Caching attributes of a buffer's current placement.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PlacementFlags {
    pub cached: bool,
    pub uncached: bool,
    pub write_combined: bool,
    /// Placement is pinned and will not be evicted.
    pub no_evict: bool,
    #[bits(28)]
    __: u32,
}

impl PlacementFlags {
    #[must_use]
    pub const fn cached_placement() -> Self {
        Self::new().with_cached(true)
    }

    #[must_use]
    pub const fn write_combined_placement() -> Self {
        Self::new().with_write_combined(true)
    }

    #[must_use]
    pub const fn uncached_placement() -> Self {
        Self::new().with_uncached(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_writable_mapping_is_read_only() {
        let private = VmFlags::new().with_read(true).with_write(true);
        let prot = PageProt::from_vm_flags(private);
        assert!(prot.present());
        assert!(!prot.writable());
        assert!(prot.no_execute());

        let shared = PageProt::from_vm_flags(VmFlags::shared_rw());
        assert!(shared.writable());
    }

    #[test]
    fn placement_selects_caching_mode() {
        let base = PageProt::from_vm_flags(VmFlags::shared_rw());

        assert_eq!(base.for_placement(PlacementFlags::cached_placement()), base);

        let wc = base.for_placement(PlacementFlags::write_combined_placement());
        assert!(wc.write_combine() && !wc.cache_disabled());

        let uc = base.for_placement(PlacementFlags::uncached_placement());
        assert!(uc.cache_disabled() && !uc.write_combine());
    }

    #[test]
    fn fault_flag_presets() {
        assert!(!FaultFlags::blocking().allow_retry());
        assert!(FaultFlags::retryable().allow_retry());
        assert!(!FaultFlags::retryable().retry_nowait());
        assert!(FaultFlags::nowait().retry_nowait());
    }
}

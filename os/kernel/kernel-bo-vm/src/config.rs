//! # Buffer-Object VM Configuration

/// log2 of the CPU page size.
pub const PAGE_SHIFT: u32 = 12;

/// CPU page size in bytes.
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Upper bound on translations installed by a single fault.
///
/// The faulting page is always first; the rest are speculative and the
/// batch stops early at the end of the mapping or at the first page that
/// cannot be resolved.
pub const NUM_PREFAULT: usize = 16;

/// First page of the fake offset space handed out to buffer objects.
///
/// Everything below 4 GiB is left for the legacy map interfaces, so a
/// buffer object's mmap offset never collides with them.
pub const FILE_PAGE_OFFSET_START: u64 = (0xFFFF_FFFF >> PAGE_SHIFT) + 1;

/// Size of the fake offset space, in pages.
pub const FILE_PAGE_OFFSET_SIZE: u64 = (0xFFFF_FFFF >> PAGE_SHIFT) * 256;

/// Number of memory types a device can manage.
pub const MEM_TYPES: usize = 4;

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(NUM_PREFAULT > 0);
    assert!(FILE_PAGE_OFFSET_START << PAGE_SHIFT > 0xFFFF_FFFF);
    assert!(FILE_PAGE_OFFSET_START.checked_add(FILE_PAGE_OFFSET_SIZE).is_some());
};

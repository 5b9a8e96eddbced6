//! # Address Newtypes
//!
//! Thin `u64` wrappers that keep process virtual addresses and page frame
//! numbers from being mixed up. Both are `#[repr(transparent)]` and cost
//! nothing over a bare integer.

use crate::config::{PAGE_SHIFT, PAGE_SIZE};
use core::fmt;
use core::ops::Add;

/// A virtual address in the faulting process's address space.
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct VirtualAddress(u64);

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Round down to the containing page.
    #[inline]
    #[must_use]
    pub const fn page_floor(self) -> Self {
        Self(self.0 & !(PAGE_SIZE as u64 - 1))
    }

    /// Byte distance from `base`, or `None` if `self` lies below it.
    #[inline]
    #[must_use]
    pub const fn offset_from(self, base: Self) -> Option<u64> {
        self.0.checked_sub(base.0)
    }

    /// The address `pages` pages further up.
    #[inline]
    #[must_use]
    pub const fn add_pages(self, pages: u64) -> Self {
        Self(self.0 + (pages << PAGE_SHIFT))
    }
}

impl Add<u64> for VirtualAddress {
    type Output = Self;

    #[inline]
    fn add(self, rhs: u64) -> Self {
        Self(self.0 + rhs)
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualAddress({self})")
    }
}

/// Page frame number: a physical (or bus) address shifted right by
/// [`PAGE_SHIFT`].
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct Pfn(u64);

impl Pfn {
    #[inline]
    #[must_use]
    pub const fn new(pfn: u64) -> Self {
        Self(pfn)
    }

    /// The frame containing the physical/bus address `addr`.
    #[inline]
    #[must_use]
    pub const fn containing(addr: u64) -> Self {
        Self(addr >> PAGE_SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn base_address(self) -> u64 {
        self.0 << PAGE_SHIFT
    }
}

impl Add<u64> for Pfn {
    type Output = Self;

    #[inline]
    fn add(self, rhs: u64) -> Self {
        Self(self.0 + rhs)
    }
}

impl fmt::Display for Pfn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pfn:{:#x}", self.0)
    }
}

impl fmt::Debug for Pfn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_and_offset() {
        let base = VirtualAddress::new(0x7000_0000);
        let va = VirtualAddress::new(0x7000_3abc);
        assert_eq!(va.page_floor().as_u64(), 0x7000_3000);
        assert_eq!(va.offset_from(base), Some(0x3abc));
        assert_eq!(base.offset_from(va), None);
        assert_eq!(base.add_pages(2).as_u64(), 0x7000_2000);
    }

    #[test]
    fn pfn_from_bus_address() {
        let pfn = Pfn::containing(0xE000_1234);
        assert_eq!(pfn.as_u64(), 0xE0001);
        assert_eq!(pfn.base_address(), 0xE000_1000);
        assert_eq!((pfn + 3).as_u64(), 0xE0004);
    }
}

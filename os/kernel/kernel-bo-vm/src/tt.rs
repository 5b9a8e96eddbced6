//! # Host Backing Pages
//!
//! A buffer object placed in system memory is backed by an array of host
//! pages. The array starts out empty and is filled on first use
//! (*population*); under memory pressure its contents may be moved to
//! auxiliary storage (*swap-out*) and brought back later (*swap-in*).
//!
//! ```text
//!               populate               swapout
//! Unpopulated ───────────► Populated ───────────► Swapped
//!      ▲                      ▲  │                   │
//!      └──── unpopulate ──────┘  └◄──── swapin ──────┘
//! ```
//!
//! Page contents are only reachable through [`Page::kmap`], a short-lived
//! per-page mapping that is released when the returned guard drops.

use crate::addresses::Pfn;
use crate::config::PAGE_SIZE;
use crate::error::PopulateError;
use crate::vma::MappingId;
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use bitfield_struct::bitfield;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use kernel_sync::{SpinLock, SpinLockGuard};

/// Contents of one host page.
pub type PageContents = Box<[u8; PAGE_SIZE]>;

/// Temporary CPU mapping of one page's contents.
pub type Kmap<'a> = SpinLockGuard<'a, PageContents>;

/// A host page frame.
pub struct Page {
    pfn: Pfn,
    contents: SpinLock<PageContents>,
    /// File mapping this page was last installed through (0: none).
    mapping: AtomicU64,
    /// Page index within that file mapping's offset space.
    index: AtomicU64,
}

impl Page {
    #[must_use]
    pub fn new(pfn: Pfn) -> Self {
        Self {
            pfn,
            contents: SpinLock::new(Box::new([0; PAGE_SIZE])),
            mapping: AtomicU64::new(0),
            index: AtomicU64::new(0),
        }
    }

    #[inline]
    #[must_use]
    pub const fn pfn(&self) -> Pfn {
        self.pfn
    }

    /// Map the page for CPU access until the guard drops.
    #[inline]
    pub fn kmap(&self) -> Kmap<'_> {
        self.contents.lock()
    }

    /// Record which file mapping, at which page index, now maps this page.
    pub fn set_mapping(&self, mapping: MappingId, index: u64) {
        self.mapping.store(mapping.as_u64(), Ordering::Relaxed);
        self.index.store(index, Ordering::Relaxed);
    }

    #[must_use]
    pub fn mapping(&self) -> Option<MappingId> {
        MappingId::from_raw(self.mapping.load(Ordering::Relaxed))
    }

    #[must_use]
    pub fn index(&self) -> u64 {
        self.index.load(Ordering::Relaxed)
    }
}

impl core::fmt::Debug for Page {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Page")
            .field("pfn", &self.pfn)
            .field("mapping", &self.mapping())
            .field("index", &self.index())
            .finish_non_exhaustive()
    }
}

/// Source of host page frames.
///
/// Returns `None` on out-of-memory.
pub trait PagePool: Send + Sync {
    fn alloc_page(&self) -> Option<Arc<Page>>;
}

/// Page pool handing out sequential frame numbers, optionally capped.
pub struct SystemPagePool {
    next_pfn: AtomicU64,
    handed_out: AtomicUsize,
    limit: Option<usize>,
}

impl SystemPagePool {
    #[must_use]
    pub const fn new(first_pfn: Pfn) -> Self {
        Self {
            next_pfn: AtomicU64::new(first_pfn.as_u64()),
            handed_out: AtomicUsize::new(0),
            limit: None,
        }
    }

    /// A pool that fails after `limit` pages.
    #[must_use]
    pub const fn with_limit(first_pfn: Pfn, limit: usize) -> Self {
        Self {
            next_pfn: AtomicU64::new(first_pfn.as_u64()),
            handed_out: AtomicUsize::new(0),
            limit: Some(limit),
        }
    }

    /// Pages handed out so far.
    #[must_use]
    pub fn handed_out(&self) -> usize {
        self.handed_out.load(Ordering::Relaxed)
    }
}

impl PagePool for SystemPagePool {
    fn alloc_page(&self) -> Option<Arc<Page>> {
        let limit = self.limit.unwrap_or(usize::MAX);
        self.handed_out
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                (n < limit).then_some(n + 1)
            })
            .ok()?;
        let pfn = self.next_pfn.fetch_add(1, Ordering::Relaxed);
        Some(Arc::new(Page::new(Pfn::new(pfn))))
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TtState {
    Unpopulated,
    Populated,
    Swapped,
}

#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct TtFlags {
    /// Pages were imported from another device; never fault them locally.
    pub sg: bool,
    /// Clear page contents on allocation.
    pub zero_alloc: bool,
    #[bits(30)]
    __: u32,
}

/// Backing page array of a host-memory buffer object.
pub struct TtPages {
    pages: Vec<Option<Arc<Page>>>,
    state: TtState,
    flags: TtFlags,
    swap: Vec<PageContents>,
}

impl TtPages {
    /// Unpopulated backing for `num_pages` pages.
    #[must_use]
    pub fn new(num_pages: usize, flags: TtFlags) -> Self {
        Self {
            pages: (0..num_pages).map(|_| None).collect(),
            state: TtState::Unpopulated,
            flags,
            swap: Vec::new(),
        }
    }

    /// Backing made of pages exported by another device.
    #[must_use]
    pub fn imported(pages: Vec<Arc<Page>>) -> Self {
        Self {
            pages: pages.into_iter().map(Some).collect(),
            state: TtState::Populated,
            flags: TtFlags::new().with_sg(true),
            swap: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn num_pages(&self) -> usize {
        self.pages.len()
    }

    #[inline]
    #[must_use]
    pub const fn state(&self) -> TtState {
        self.state
    }

    #[inline]
    #[must_use]
    pub const fn flags(&self) -> TtFlags {
        self.flags
    }

    #[inline]
    #[must_use]
    pub const fn is_imported(&self) -> bool {
        self.flags.sg()
    }

    #[inline]
    #[must_use]
    pub fn is_populated(&self) -> bool {
        self.state == TtState::Populated
    }

    /// The page at `index`, if that slot is populated.
    #[must_use]
    pub fn page(&self, index: usize) -> Option<&Arc<Page>> {
        self.pages.get(index)?.as_ref()
    }

    /// Replace the page at `index`; `None` leaves a hole.
    pub fn set_page(&mut self, index: usize, page: Option<Arc<Page>>) {
        if let Some(slot) = self.pages.get_mut(index) {
            *slot = page;
        }
    }

    /// Fill every slot from `pool`. Swapped-out contents are swapped in.
    ///
    /// All-or-nothing: on failure every page allocated by this call is
    /// released again.
    ///
    /// # Errors
    /// [`PopulateError::OutOfMemory`] when the pool runs dry.
    pub fn populate(&mut self, pool: &dyn PagePool) -> Result<(), PopulateError> {
        match self.state {
            TtState::Populated => return Ok(()),
            TtState::Swapped => return self.swapin(pool),
            TtState::Unpopulated => {}
        }

        let mut fresh = Vec::with_capacity(self.pages.len());
        for slot in &self.pages {
            if slot.is_some() {
                fresh.push(None);
                continue;
            }
            let page = pool.alloc_page().ok_or(PopulateError::OutOfMemory)?;
            if self.flags.zero_alloc() {
                page.kmap().fill(0);
            }
            fresh.push(Some(page));
        }

        for (slot, page) in self.pages.iter_mut().zip(fresh) {
            if page.is_some() {
                *slot = page;
            }
        }
        self.state = TtState::Populated;
        Ok(())
    }

    /// Drop every page; the array becomes unpopulated.
    pub fn unpopulate(&mut self) {
        self.pages.iter_mut().for_each(|slot| *slot = None);
        self.swap.clear();
        self.state = TtState::Unpopulated;
    }

    /// Move page contents to auxiliary storage and release the pages.
    pub fn swapout(&mut self) {
        if self.state != TtState::Populated || self.is_imported() {
            return;
        }
        self.swap = self
            .pages
            .iter_mut()
            .map(|slot| {
                let mut saved: PageContents = Box::new([0; PAGE_SIZE]);
                if let Some(page) = slot.take() {
                    saved.copy_from_slice(&page.kmap()[..]);
                }
                saved
            })
            .collect();
        self.state = TtState::Swapped;
    }

    /// Bring swapped-out contents back into freshly allocated pages.
    ///
    /// # Errors
    /// [`PopulateError::OutOfMemory`]; the array then stays swapped out.
    pub fn swapin(&mut self, pool: &dyn PagePool) -> Result<(), PopulateError> {
        if self.state != TtState::Swapped {
            return Ok(());
        }

        let pages = self
            .swap
            .iter()
            .map(|saved| {
                let page = pool.alloc_page()?;
                page.kmap().copy_from_slice(&saved[..]);
                Some(page)
            })
            .collect::<Option<Vec<_>>>()
            .ok_or(PopulateError::OutOfMemory)?;

        for (slot, page) in self.pages.iter_mut().zip(pages) {
            *slot = Some(page);
        }
        self.swap.clear();
        self.state = TtState::Populated;
        Ok(())
    }
}

impl core::fmt::Debug for TtPages {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TtPages")
            .field("num_pages", &self.num_pages())
            .field("state", &self.state)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn populate_is_all_or_nothing() {
        let pool = SystemPagePool::with_limit(Pfn::new(0x100), 3);
        let mut tt = TtPages::new(4, TtFlags::new());

        assert_eq!(tt.populate(&pool), Err(PopulateError::OutOfMemory));
        assert_eq!(tt.state(), TtState::Unpopulated);
        assert!((0..4).all(|i| tt.page(i).is_none()));
    }

    #[test]
    fn swap_round_trip_keeps_contents() {
        let pool = SystemPagePool::new(Pfn::new(0x200));
        let mut tt = TtPages::new(2, TtFlags::new());
        tt.populate(&pool).unwrap();
        tt.page(1).unwrap().kmap()[17] = 0xAB;
        let old_pfn = tt.page(1).unwrap().pfn();

        tt.swapout();
        assert_eq!(tt.state(), TtState::Swapped);
        assert!(tt.page(1).is_none());

        tt.swapin(&pool).unwrap();
        let page = tt.page(1).unwrap();
        assert_ne!(page.pfn(), old_pfn);
        assert_eq!(page.kmap()[17], 0xAB);
    }

    #[test]
    fn imported_pages_are_never_swapped() {
        let pool = SystemPagePool::new(Pfn::new(0x300));
        let page = pool.alloc_page().unwrap();
        let mut tt = TtPages::imported(alloc::vec![page]);
        tt.swapout();
        assert!(tt.is_populated());
        assert!(tt.is_imported());
    }
}

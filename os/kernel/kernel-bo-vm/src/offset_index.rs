//! # Fake Offset Space
//!
//! User space maps a buffer object by calling `mmap` on the device file at
//! an offset the kernel handed out. The [`OffsetIndex`] owns that offset
//! space: it allocates a page range per buffer object and translates a
//! requested `(offset, pages)` range back into the object.
//!
//! The index holds only weak references, so it never keeps an object
//! alive. A lookup upgrades the weak reference, which fails once the last
//! strong reference is gone even if the object has not deregistered yet.
//!
//! The index lock is a leaf: it is never held while a reservation is
//! taken, and never taken while holding one.

use crate::bo::BufferObject;
use crate::config::{FILE_PAGE_OFFSET_SIZE, FILE_PAGE_OFFSET_START};
use crate::error::OffsetIndexError;
use alloc::collections::BTreeMap;
use alloc::sync::{Arc, Weak};
use kernel_sync::SpinLock;

struct Node {
    pages: u64,
    bo: Weak<BufferObject>,
}

/// Allocation and lookup of buffer-object ranges in the fake offset space.
pub struct OffsetIndex {
    start: u64,
    size: u64,
    nodes: SpinLock<BTreeMap<u64, Node>>,
}

impl Default for OffsetIndex {
    fn default() -> Self {
        Self::new(FILE_PAGE_OFFSET_START, FILE_PAGE_OFFSET_SIZE)
    }
}

impl OffsetIndex {
    /// An empty index managing `[start, start + size)` (in pages).
    #[must_use]
    pub const fn new(start: u64, size: u64) -> Self {
        Self {
            start,
            size,
            nodes: SpinLock::new(BTreeMap::new()),
        }
    }

    /// Reserve the first free range of `pages` pages. The range is not
    /// bound to an object until [`bind`](Self::bind) is called.
    ///
    /// # Errors
    /// [`OffsetIndexError::Empty`] for zero pages, [`OffsetIndexError::NoSpace`]
    /// when no hole is large enough.
    pub fn insert(&self, pages: u64) -> Result<u64, OffsetIndexError> {
        if pages == 0 {
            return Err(OffsetIndexError::Empty);
        }

        let end = self.start + self.size;
        let mut nodes = self.nodes.lock();

        let mut candidate = self.start;
        for (&node_start, node) in nodes.iter() {
            if node_start.saturating_sub(candidate) >= pages {
                break;
            }
            candidate = node_start + node.pages;
        }

        if end.saturating_sub(candidate) < pages {
            return Err(OffsetIndexError::NoSpace);
        }

        nodes.insert(
            candidate,
            Node {
                pages,
                bo: Weak::new(),
            },
        );
        Ok(candidate)
    }

    /// Attach `bo` to the range starting at `start`.
    pub(crate) fn bind(&self, start: u64, bo: &Arc<BufferObject>) {
        if let Some(node) = self.nodes.lock().get_mut(&start) {
            node.bo = Arc::downgrade(bo);
        }
    }

    /// Release the range starting at `start`.
    pub fn remove(&self, start: u64) {
        self.nodes.lock().remove(&start);
    }

    /// The live object whose range fully contains `[offset, offset + pages)`.
    ///
    /// A strong reference is only returned if the object's reference count
    /// was non-zero at the time of the lookup.
    #[must_use]
    pub fn lookup(&self, offset: u64, pages: u64) -> Option<Arc<BufferObject>> {
        let nodes = self.nodes.lock();
        let (&start, node) = nodes.range(..=offset).next_back()?;
        let end = start + node.pages;
        if offset.checked_add(pages)? > end {
            return None;
        }
        node.bo.upgrade()
    }

    /// Number of registered ranges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_fit_reuses_holes() {
        let index = OffsetIndex::new(100, 64);
        let a = index.insert(4).unwrap();
        let b = index.insert(8).unwrap();
        let c = index.insert(2).unwrap();
        assert_eq!((a, b, c), (100, 104, 112));

        index.remove(b);
        assert_eq!(index.insert(3).unwrap(), 104);
        assert_eq!(index.insert(5).unwrap(), 107);
        assert_eq!(index.insert(1).unwrap(), 114);
        assert_eq!(index.len(), 5);
    }

    #[test]
    fn exhausted_space_is_reported() {
        let index = OffsetIndex::new(0, 8);
        assert_eq!(index.insert(0), Err(OffsetIndexError::Empty));
        index.insert(6).unwrap();
        assert_eq!(index.insert(3), Err(OffsetIndexError::NoSpace));
        assert_eq!(index.insert(2).unwrap(), 6);
    }

    #[test]
    fn unbound_range_is_not_found() {
        let index = OffsetIndex::new(0, 8);
        let start = index.insert(4).unwrap();
        assert!(index.lookup(start, 4).is_none());
        assert!(index.lookup(start + 2, 8).is_none());
    }
}

//! Error types of the collaborator contracts and of the mapping / access
//! entry points.
//!
//! The fault path has no error type of its own: everything below is folded
//! into a [`FaultOutcome`](crate::FaultOutcome) before it leaves
//! [`handle_fault`](crate::handle_fault).

use kernel_sync::ReserveError;

/// Failure of [`Fence::wait`](crate::Fence::wait).
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FenceWaitError {
    #[error("fence wait interrupted by a signal")]
    Interrupted,
    #[error("fence signalled an error")]
    Failed,
}

/// Failure of the driver's fault-reserve notification.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum NotifyError {
    /// The driver cannot make the buffer mappable right now.
    #[error("driver is busy; fault again later")]
    Busy,
    #[error("driver was interrupted")]
    Interrupted,
    /// The buffer cannot be made CPU-accessible at all.
    #[error("driver refused to make the buffer mappable")]
    Fatal,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum PopulateError {
    #[error("out of memory while populating backing pages")]
    OutOfMemory,
}

/// Failure to reserve bus resources for a device-memory mapping.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum IoReserveError {
    #[error("driver failed to reserve I/O memory")]
    Driver,
}

/// Failure of the install primitive [`AddressSpace::insert`](crate::AddressSpace::insert).
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum InsertError {
    /// A translation is already present at that address.
    #[error("address already mapped")]
    Busy,
    #[error("out of memory for page tables")]
    OutOfMemory,
    #[error("cannot install translation")]
    Fault,
}

/// Failure to allocate a range in the fake offset space.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum OffsetIndexError {
    #[error("buffer objects need at least one page")]
    Empty,
    #[error("offset space exhausted")]
    NoSpace,
}

/// Failure to establish a mapping.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MmapError {
    /// No live buffer object covers the requested offset range.
    #[error("no buffer object at the requested offset")]
    NotFound,
    #[error("mapping not permitted for this file")]
    PermissionDenied,
    /// The driver has no access verification hook.
    #[error("driver cannot verify mapping permissions")]
    NoVerifier,
}

/// Failure of the direct access bridge.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum AccessError {
    #[error("access outside the buffer object")]
    OutOfRange,
    /// The mapping was closed and no longer refers to a buffer.
    #[error("mapping is detached from its buffer object")]
    Detached,
    #[error(transparent)]
    Reserve(#[from] ReserveError),
    #[error("failed to swap in backing pages: {0}")]
    Swapin(PopulateError),
    #[error("failed to populate backing pages: {0}")]
    Populate(PopulateError),
    /// Host-memory placement without a backing page array.
    #[error("buffer object has no backing pages")]
    NoBacking,
    /// Special memory type and the driver offers no access hook.
    #[error("memory type does not support direct access")]
    Unsupported,
}

//! Breaking the map-lock / reservation lock-order cycle.
//!
//! The caller enters a fault holding its map lock; everybody else takes a
//! buffer's reservation first and may then want the map lock. Blocking on
//! a buffer while still holding the map lock can therefore deadlock.
//! Instead: pin the buffer, drop the map lock, block, unpin, and let the
//! whole fault start over.

use crate::bo::BufferObject;
use crate::vma::{FaultOutcome, VmFault};
use alloc::sync::Arc;

/// Pin `bo`, release the caller's map lock, run `wait`, unpin.
///
/// Always yields [`FaultOutcome::Retry`]. Anything `wait` owns (such as a
/// reservation guard) is released inside it, before the pin goes away.
pub(crate) fn escape_and_retry(
    bo: &Arc<BufferObject>,
    vmf: &VmFault<'_>,
    wait: impl FnOnce(),
) -> FaultOutcome {
    let pin = Arc::clone(bo);
    vmf.mm.mmap_read_unlock();
    wait();
    drop(pin);
    FaultOutcome::Retry
}

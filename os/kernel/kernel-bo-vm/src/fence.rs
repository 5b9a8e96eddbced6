//! # Moving Fence
//!
//! While a buffer's storage is being relocated (by a pipelined GPU copy, for
//! example), the buffer carries a *moving fence* that signals once the copy
//! is done. Nothing may look at the pages before that.
//!
//! [`wait_idle`] is the gate the fault path passes through. Depending on
//! how much the caller is allowed to block it either waits in place, waits
//! after giving up the map lock, or asks for a retry without waiting at all:
//!
//! ```text
//!                  ┌─ no fence / signalled ───────────────► Ok(guard)
//!                  │
//! wait_idle ───────┼─ allow_retry ─┬─ retry_nowait ───────► Retry
//!                  │               └─ unlock mm, wait ────► Retry
//!                  │
//!                  └─ wait in place ─┬─ ok ───────────────► Ok(guard)
//!                                    ├─ interrupted ──────► NoPage
//!                                    └─ failed ───────────► BusError
//! ```
//!
//! Whoever sees the fence signalled first clears it; the field lives under
//! the reservation, so that happens exactly once.

use crate::bo::{BoGuard, BufferObject};
use crate::error::FenceWaitError;
use crate::escape::escape_and_retry;
use crate::vma::{FaultOutcome, VmFault};
use alloc::sync::Arc;
use kernel_sync::{Completion, Interrupt};
use log::{debug, warn};

/// One-shot completion signal of an asynchronous GPU operation.
///
/// Fences are only observed here; dropping the last `Arc` releases the
/// reference.
pub trait Fence: Send + Sync {
    /// Whether the operation has finished. An operation that completed
    /// with an error counts as finished.
    fn is_signaled(&self) -> bool;

    /// Block until signalled. Gives up early if `interrupt` reports a
    /// pending signal.
    ///
    /// # Errors
    /// [`FenceWaitError::Interrupted`] or [`FenceWaitError::Failed`] if the
    /// operation behind the fence completed with an error.
    fn wait(&self, interrupt: &dyn Interrupt) -> Result<(), FenceWaitError>;
}

impl Fence for Completion {
    #[inline]
    fn is_signaled(&self) -> bool {
        self.is_completed()
    }

    fn wait(&self, interrupt: &dyn Interrupt) -> Result<(), FenceWaitError> {
        self.wait_interruptible(interrupt)
            .map_err(|_| FenceWaitError::Interrupted)
    }
}

/// Wait out the moving fence of `bo`, if any.
///
/// On `Ok` the fence is gone and the reservation is handed back. On `Err`
/// the reservation has been released (the guard was consumed) and the
/// outcome is what the fault reports.
pub(crate) fn wait_idle<'a>(
    bo: &'a Arc<BufferObject>,
    mut guard: BoGuard<'a>,
    vmf: &VmFault<'_>,
) -> Result<BoGuard<'a>, FaultOutcome> {
    let Some(fence) = guard.moving.clone() else {
        return Ok(guard);
    };

    if fence.is_signaled() {
        guard.moving = None;
        return Ok(guard);
    }

    if vmf.flags.allow_retry() {
        if vmf.flags.retry_nowait() {
            debug!("moving fence pending on {bo:?}; retry without waiting");
            return Err(FaultOutcome::Retry);
        }

        debug!("moving fence pending on {bo:?}; waiting outside the map lock");
        let signal = || vmf.mm.signal_pending();
        return Err(escape_and_retry(bo, vmf, move || {
            // The retried fault decides what to make of the result.
            let _ = fence.wait(&signal);
            drop(guard);
        }));
    }

    let signal = || vmf.mm.signal_pending();
    match fence.wait(&signal) {
        Ok(()) => {
            guard.moving = None;
            Ok(guard)
        }
        Err(FenceWaitError::Interrupted) => {
            warn!("wait for moving fence on {bo:?} interrupted");
            Err(FaultOutcome::NoPage)
        }
        Err(FenceWaitError::Failed) => Err(FaultOutcome::BusError),
    }
}

//! Taking a buffer's reservation from fault context.

use crate::bo::{BoGuard, BufferObject};
use crate::escape::escape_and_retry;
use crate::vma::{FaultOutcome, VmFault};
use alloc::sync::Arc;
use kernel_sync::ReserveError;
use log::debug;

/// Try to reserve `bo` for the faulting task.
///
/// Never blocks while the caller's map lock is held: a busy reservation
/// either turns into a retry (waiting for it first, outside the map lock,
/// unless `retry_nowait`) or, if the caller cannot retry, into
/// [`FaultOutcome::NoPage`] so the access faults again later.
pub(crate) fn reserve_for_fault<'a>(
    bo: &'a Arc<BufferObject>,
    vmf: &VmFault<'_>,
) -> Result<BoGuard<'a>, FaultOutcome> {
    match bo.resv().try_reserve(vmf.task) {
        Ok(guard) => Ok(guard),
        Err(ReserveError::Busy) if vmf.flags.allow_retry() => {
            debug!("{bo:?} is reserved; retrying fault");
            if vmf.flags.retry_nowait() {
                Err(FaultOutcome::Retry)
            } else {
                let signal = || vmf.mm.signal_pending();
                // Interrupted or not, the retried fault starts over.
                Err(escape_and_retry(bo, vmf, || {
                    let _ = bo.resv().wait_unreserved(&signal);
                }))
            }
        }
        Err(err) => {
            debug!("cannot reserve {bo:?}: {err}");
            Err(FaultOutcome::NoPage)
        }
    }
}

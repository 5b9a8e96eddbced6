use crate::{Interrupt, Interrupted};
use core::hint::spin_loop;
use core::sync::atomic::{AtomicU8, Ordering};

/// 0 = PENDING, 1 = DONE
const PENDING: u8 = 0;
const DONE: u8 = 1;

/// One-shot completion flag.
///
/// Starts pending, is completed exactly once, and stays completed. Waiters
/// spin; there is no scheduler to park them on.
pub struct Completion {
    state: AtomicU8,
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

impl Completion {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(PENDING),
        }
    }

    /// A completion that is already done.
    #[must_use]
    pub const fn completed() -> Self {
        Self {
            state: AtomicU8::new(DONE),
        }
    }

    /// Mark as done. Returns `true` for the call that actually completed it.
    pub fn complete(&self) -> bool {
        self.state
            .compare_exchange(PENDING, DONE, Ordering::Release, Ordering::Relaxed)
            .is_ok()
    }

    #[inline]
    pub fn is_completed(&self) -> bool {
        self.state.load(Ordering::Acquire) == DONE
    }

    pub fn wait(&self) {
        while !self.is_completed() {
            spin_loop();
        }
    }

    /// # Errors
    /// Returns [`Interrupted`] if a signal became pending before completion.
    pub fn wait_interruptible(&self, interrupt: &dyn Interrupt) -> Result<(), Interrupted> {
        while !self.is_completed() {
            if interrupt.pending() {
                return Err(Interrupted);
            }
            spin_loop();
        }
        Ok(())
    }
}

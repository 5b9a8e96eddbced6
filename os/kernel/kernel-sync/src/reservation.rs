//! Owner-tagged exclusive lock.
//!
//! A [`Reservation`] is what a buffer object uses to serialize everyone who
//! wants to touch its mutable state. Unlike a [`SpinLock`](crate::SpinLock)
//! it records *who* holds it, so a task that tries to reserve an object it
//! already holds gets [`ReserveError::AlreadyHeld`] instead of spinning on
//! itself forever.
//!
//! ```text
//!  owner == 0        owner == task
//! ┌──────────┐ try  ┌──────────────┐
//! │ unheld   │─────►│ reserved     │
//! └──────────┘◄─────└──────────────┘
//!               drop(guard)
//! ```

use crate::{Interrupt, Interrupted};
use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::num::NonZeroU64;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU64, Ordering};

const UNHELD: u64 = 0;

/// Identity of an execution context that can hold reservations.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TaskId(NonZeroU64);

impl TaskId {
    #[must_use]
    pub const fn new(raw: NonZeroU64) -> Self {
        Self(raw)
    }

    /// Hand out a fresh, process-unique task id.
    #[must_use]
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        let raw = NEXT.fetch_add(1, Ordering::Relaxed);
        Self(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0.get()
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ReserveError {
    /// Somebody else holds the reservation.
    #[error("reservation is held by another task")]
    Busy,
    /// The calling task already holds the reservation.
    #[error("reservation is already held by this task")]
    AlreadyHeld,
    /// A signal became pending during a blocking reserve.
    #[error("interrupted while waiting for reservation")]
    Interrupted,
}

pub struct Reservation<T> {
    owner: AtomicU64,
    value: UnsafeCell<T>,
}

// Safety: access to `value` is serialized through `owner`.
unsafe impl<T: Send> Sync for Reservation<T> {}

impl<T> Reservation<T> {
    pub const fn new(value: T) -> Self {
        Self {
            owner: AtomicU64::new(UNHELD),
            value: UnsafeCell::new(value),
        }
    }

    /// Non-blocking reserve.
    ///
    /// # Errors
    /// [`ReserveError::Busy`] when another task holds it,
    /// [`ReserveError::AlreadyHeld`] when `task` itself does.
    pub fn try_reserve(&self, task: TaskId) -> Result<ReservationGuard<'_, T>, ReserveError> {
        match self.owner.compare_exchange(
            UNHELD,
            task.as_u64(),
            Ordering::Acquire,
            Ordering::Relaxed,
        ) {
            Ok(_) => Ok(ReservationGuard { resv: self, task }),
            Err(current) if current == task.as_u64() => Err(ReserveError::AlreadyHeld),
            Err(_) => Err(ReserveError::Busy),
        }
    }

    /// Blocking reserve; gives up when `interrupt` reports a pending signal.
    ///
    /// # Errors
    /// [`ReserveError::AlreadyHeld`] or [`ReserveError::Interrupted`].
    pub fn reserve(
        &self,
        task: TaskId,
        interrupt: &dyn Interrupt,
    ) -> Result<ReservationGuard<'_, T>, ReserveError> {
        loop {
            match self.try_reserve(task) {
                Err(ReserveError::Busy) => {
                    if interrupt.pending() {
                        return Err(ReserveError::Interrupted);
                    }
                    spin_loop();
                }
                other => return other,
            }
        }
    }

    /// Block until nobody holds the reservation, without taking it.
    ///
    /// # Errors
    /// [`Interrupted`] if `interrupt` reports a pending signal first.
    pub fn wait_unreserved(&self, interrupt: &dyn Interrupt) -> Result<(), Interrupted> {
        while self.owner.load(Ordering::Acquire) != UNHELD {
            if interrupt.pending() {
                return Err(Interrupted);
            }
            spin_loop();
        }
        Ok(())
    }

    #[inline]
    pub fn is_reserved(&self) -> bool {
        self.owner.load(Ordering::Relaxed) != UNHELD
    }

    /// Current holder, if any. Racy; for diagnostics and assertions.
    pub fn owner(&self) -> Option<TaskId> {
        NonZeroU64::new(self.owner.load(Ordering::Relaxed)).map(TaskId)
    }

    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }
}

/// Proof of holding a [`Reservation`]. Dropping it unreserves.
pub struct ReservationGuard<'a, T> {
    resv: &'a Reservation<T>,
    task: TaskId,
}

impl<T> ReservationGuard<'_, T> {
    #[inline]
    pub const fn task(&self) -> TaskId {
        self.task
    }
}

impl<T> Deref for ReservationGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: the guard proves we are the owner.
        unsafe { &*self.resv.value.get() }
    }
}

impl<T> DerefMut for ReservationGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves we are the owner.
        unsafe { &mut *self.resv.value.get() }
    }
}

impl<T> Drop for ReservationGuard<'_, T> {
    fn drop(&mut self) {
        debug_assert_eq!(self.resv.owner.load(Ordering::Relaxed), self.task.as_u64());
        self.resv.owner.store(UNHELD, Ordering::Release);
    }
}

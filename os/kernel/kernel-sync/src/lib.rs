//! # Kernel synchronization primitives

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod completion;
mod reservation;
mod spin_lock;

pub use completion::Completion;
pub use reservation::{Reservation, ReservationGuard, ReserveError, TaskId};
pub use spin_lock::{SpinLock, SpinLockGuard};

/// Source of "a signal is pending" for interruptible waits.
pub trait Interrupt {
    fn pending(&self) -> bool;
}

impl<F: Fn() -> bool> Interrupt for F {
    fn pending(&self) -> bool {
        self()
    }
}

/// Never interrupted.
#[derive(Copy, Clone, Debug, Default)]
pub struct Uninterruptible;

impl Interrupt for Uninterruptible {
    #[inline]
    fn pending(&self) -> bool {
        false
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
#[error("interrupted while waiting")]
pub struct Interrupted;

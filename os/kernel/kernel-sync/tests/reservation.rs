use kernel_sync::{Interrupted, Reservation, ReserveError, TaskId, Uninterruptible};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn guard_carries_its_task() {
    let task = TaskId::next();
    let r = Reservation::new(String::from("bo"));
    let mut g = r.try_reserve(task).unwrap();
    assert_eq!(g.task(), task);
    g.push_str("-moved");
    drop(g);
    assert_eq!(r.owner(), None);

    let mut r = r;
    assert_eq!(r.get_mut().as_str(), "bo-moved");
}

#[test]
fn wait_unreserved_returns_once_released() {
    let r = Arc::new(Reservation::new(()));
    let holder = TaskId::next();
    let released = Arc::new(AtomicBool::new(false));

    let g = r.try_reserve(holder).unwrap();
    let waiter = {
        let r = Arc::clone(&r);
        let released = Arc::clone(&released);
        thread::spawn(move || {
            assert_eq!(r.wait_unreserved(&Uninterruptible), Ok(()));
            assert!(released.load(Ordering::Acquire));
        })
    };

    thread::sleep(Duration::from_millis(20));
    released.store(true, Ordering::Release);
    drop(g);
    waiter.join().unwrap();
}

#[test]
fn wait_unreserved_gives_up_on_signal() {
    let r = Reservation::new(());
    let g = r.try_reserve(TaskId::next()).unwrap();

    let pending = || true;
    assert_eq!(r.wait_unreserved(&pending), Err(Interrupted));
    assert!(r.is_reserved());

    drop(g);
    // Nothing to wait for: a pending signal does not matter.
    assert_eq!(r.wait_unreserved(&pending), Ok(()));
}

#[test]
fn blocking_reserve_by_holder_is_rejected() {
    let task = TaskId::next();
    let r = Reservation::new(0_u8);
    let _g = r.try_reserve(task).unwrap();
    assert_eq!(
        r.reserve(task, &Uninterruptible).err(),
        Some(ReserveError::AlreadyHeld)
    );
}

#[test]
fn reservations_are_mutually_exclusive() {
    let threads = 6;
    let iters = 2_000;

    let r = Arc::new(Reservation::new(0_usize));
    let inside = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let r = Arc::clone(&r);
            let inside = Arc::clone(&inside);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                let task = TaskId::next();
                start.wait();
                for _ in 0..iters {
                    let mut g = r.reserve(task, &Uninterruptible).unwrap();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    *g += 1;
                    inside.fetch_sub(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    let task = TaskId::next();
    assert_eq!(*r.try_reserve(task).unwrap(), threads * iters);
}

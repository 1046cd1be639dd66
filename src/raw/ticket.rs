use core::marker::PhantomData;
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crossbeam_utils::CachePadded;

use crate::cfg::atomic::AtomicUsize;
use crate::raw::{RawLock, RawTryLock};
use crate::relax::Relax;

/// The classic two-counter FIFO lock.
///
/// Acquirers draw a ticket from `next_ticket` and wait until `now_serving`
/// reaches it; the holder serves the next ticket on release. The counters
/// live on separate cache lines, so the fetch-add traffic of arriving
/// threads does not keep invalidating the line every waiter is polling.
///
/// The footprint is two words regardless of the number of waiters, at the
/// cost of all waiters polling the same location. The queued variants trade
/// footprint for local spinning.
pub struct TicketLock<R> {
    now_serving: CachePadded<AtomicUsize>,
    next_ticket: CachePadded<AtomicUsize>,
    marker: PhantomData<R>,
}

impl<R> TicketLock<R> {
    /// Creates the lock with both counters at zero.
    #[cfg(not(all(loom, test)))]
    pub const fn new() -> Self {
        let now_serving = CachePadded::new(AtomicUsize::new(0));
        let next_ticket = CachePadded::new(AtomicUsize::new(0));
        Self { now_serving, next_ticket, marker: PhantomData }
    }

    /// Creates the lock with Loom primitives (non-const).
    #[cfg(all(loom, test))]
    pub fn new() -> Self {
        let now_serving = CachePadded::new(AtomicUsize::new(0));
        let next_ticket = CachePadded::new(AtomicUsize::new(0));
        Self { now_serving, next_ticket, marker: PhantomData }
    }

    /// Draws the next ticket. Relaxed is enough: tickets only need to be
    /// unique, the release/acquire edge between consecutive holders runs
    /// through `now_serving`.
    fn draw(&self) -> usize {
        self.next_ticket.fetch_add(1, Relaxed)
    }
}

impl<R: Relax> TicketLock<R> {
    /// Spins until `ticket` is the one being served.
    fn wait_turn(&self, ticket: usize) {
        let mut relax = R::new();
        while self.now_serving.load(Acquire) != ticket {
            relax.relax();
        }
    }
}

impl<R> Default for TicketLock<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Relax> RawLock for TicketLock<R> {
    fn acquire(&self) {
        let ticket = self.draw();
        self.wait_turn(ticket);
    }

    unsafe fn release(&self) {
        // Only the holder ever writes `now_serving`, so a plain load and
        // store suffice; the store is the hand-off to the next holder.
        let served = self.now_serving.load(Relaxed);
        self.now_serving.store(served.wrapping_add(1), Release);
    }
}

impl<R: Relax> RawTryLock for TicketLock<R> {
    fn try_acquire(&self) -> bool {
        // The load must be acquire: observing the serving counter advance
        // is the only edge to the previous holder, since the exchange
        // below reads a relaxed ticket write on the other counter.
        let served = self.now_serving.load(Acquire);
        // Succeeding means we drew the ticket currently being served, so
        // the lock is ours immediately. Failing draws no ticket at all:
        // either the lock was held or another acquirer raced us.
        self.next_ticket
            .compare_exchange(served, served.wrapping_add(1), Acquire, Relaxed)
            .is_ok()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use core::cell::UnsafeCell;
    use std::sync::Arc;
    use std::thread;

    use super::TicketLock;
    use crate::raw::RawLock;
    use crate::relax::Yield;
    use crate::test::tests;

    #[test]
    fn counter_stays_exact() {
        assert_eq!(tests::hammer(TicketLock::<Yield>::new(), 4, 10_000), 4 * 10_000);
    }

    #[test]
    fn try_acquire_excludes() {
        tests::try_acquire_excludes(TicketLock::<Yield>::new());
    }

    struct Recorder {
        lock: TicketLock<Yield>,
        seen: UnsafeCell<Vec<usize>>,
    }

    // SAFETY: `seen` is only touched while `lock` is held.
    unsafe impl Sync for Recorder {}

    // Every drawn ticket is granted in ticket order, with no duplicates
    // and no gaps.
    #[test]
    fn grants_in_ticket_order() {
        const THREADS: usize = 16;
        const ITERS: usize = 100;

        let recorder = Arc::new(Recorder {
            lock: TicketLock::new(),
            seen: UnsafeCell::new(Vec::new()),
        });

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let recorder = Arc::clone(&recorder);
                thread::spawn(move || {
                    for _ in 0..ITERS {
                        let ticket = recorder.lock.draw();
                        recorder.lock.wait_turn(ticket);
                        // SAFETY: we hold the lock.
                        unsafe { &mut *recorder.seen.get() }.push(ticket);
                        // SAFETY: acquired above, on this thread.
                        unsafe { recorder.lock.release() };
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let seen = unsafe { &*recorder.seen.get() };
        let expected: Vec<usize> = (0..THREADS * ITERS).collect();
        assert_eq!(seen, &expected);
    }
}

#[cfg(all(loom, test))]
mod model {
    use crate::lock::Variant;
    use crate::loom::models;

    #[test]
    fn lock_join() {
        models::lock_join(Variant::Ticket);
    }

    #[test]
    fn try_lock_join() {
        models::try_lock_join(Variant::Ticket);
    }
}

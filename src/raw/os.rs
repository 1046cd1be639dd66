use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crate::cfg::atomic::AtomicU32;
use crate::cfg::futex;
use crate::cfg::hint;
use crate::raw::{RawLock, RawTryLock};

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;
const CONTENDED: u32 = 2;

/// How many relaxed polls to burn before handing the wait to the kernel.
#[cfg(not(all(loom, test)))]
const SPIN_LIMIT: u32 = 100;

// A single poll under Loom: longer polling loops only multiply the
// interleavings the model has to explore.
#[cfg(all(loom, test))]
const SPIN_LIMIT: u32 = 1;

/// The OS-backed blocking mutex.
///
/// A single futex word with three states: unlocked, locked, and locked
/// with waiters. Waiters poll briefly, then ask the kernel to put them to
/// sleep; an uncontended release never issues a wake. This is the variant
/// to reach for whenever critical sections can be preempted, since waiting
/// threads free their CPU instead of burning it.
///
/// Acquisition order is whatever the platform's wake policy gives; the
/// queued variants are the ones that guarantee FIFO.
pub struct OsMutex {
    state: AtomicU32,
}

impl OsMutex {
    /// Creates the mutex in an unlocked state.
    #[cfg(not(all(loom, test)))]
    pub const fn new() -> Self {
        Self { state: AtomicU32::new(UNLOCKED) }
    }

    /// Creates the mutex with Loom primitives (non-const).
    #[cfg(all(loom, test))]
    pub fn new() -> Self {
        Self { state: AtomicU32::new(UNLOCKED) }
    }

    /// Polls the state with plain loads, stopping early once it is
    /// anything other than `LOCKED`: either free, or already marked
    /// contended and therefore worth sleeping on right away.
    fn spin(&self) -> u32 {
        let mut spin = SPIN_LIMIT;
        loop {
            let state = self.state.load(Relaxed);
            if state != LOCKED || spin == 0 {
                return state;
            }
            hint::spin_loop();
            spin -= 1;
        }
    }

    #[cold]
    fn acquire_contended(&self) {
        let mut state = self.spin();

        // Free again already: take it without marking contention.
        if state == UNLOCKED {
            match self.state.compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed) {
                Ok(_) => return,
                Err(observed) => state = observed,
            }
        }

        loop {
            // Mark the lock contended before sleeping. The swap may find
            // the lock already free, in which case the mark is ours and so
            // is the lock.
            if state != CONTENDED && self.state.swap(CONTENDED, Acquire) == UNLOCKED {
                return;
            }
            futex::wait(&self.state, CONTENDED);
            state = self.spin();
        }
    }

    #[cold]
    fn wake(&self) {
        futex::wake_one(&self.state);
    }
}

impl Default for OsMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl RawLock for OsMutex {
    fn acquire(&self) {
        if !self.try_acquire() {
            self.acquire_contended();
        }
    }

    unsafe fn release(&self) {
        if self.state.swap(UNLOCKED, Release) == CONTENDED {
            // Wake exactly one waiter. When it takes the lock it restores
            // the contended mark, so any others will be woken in turn.
            self.wake();
        }
    }
}

impl RawTryLock for OsMutex {
    fn try_acquire(&self) -> bool {
        self.state.compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed).is_ok()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use super::OsMutex;
    use crate::test::tests;

    #[test]
    fn counter_stays_exact() {
        assert_eq!(tests::hammer(OsMutex::new(), 4, 10_000), 4 * 10_000);
    }

    #[test]
    fn try_acquire_excludes() {
        tests::try_acquire_excludes(OsMutex::new());
    }
}

#[cfg(all(loom, test))]
mod model {
    use crate::lock::Variant;
    use crate::loom::models;

    #[test]
    fn lock_join() {
        models::lock_join(Variant::OsMutex);
    }

    #[test]
    fn try_lock_join() {
        models::try_lock_join(Variant::OsMutex);
    }
}

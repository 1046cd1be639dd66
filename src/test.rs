pub(crate) mod tests {
    use core::cell::UnsafeCell;
    use std::sync::mpsc::channel;
    use std::sync::Arc;
    use std::thread;

    use crate::raw::{RawLock, RawTryLock};

    /// A plain integer guarded by a raw lock. Increments are non-atomic,
    /// so the final count is only exact if the lock actually excludes.
    pub struct Counter<L> {
        lock: L,
        value: UnsafeCell<u64>,
    }

    // SAFETY: `value` is only touched while `lock` is held.
    unsafe impl<L: Sync> Sync for Counter<L> {}

    impl<L: RawLock> Counter<L> {
        pub fn new(lock: L) -> Self {
            Self { lock, value: UnsafeCell::new(0) }
        }

        pub fn add(&self) {
            self.lock.acquire();
            // SAFETY: we hold the lock.
            unsafe { *self.value.get() += 1 };
            // SAFETY: acquired above, on this thread.
            unsafe { self.lock.release() };
        }

        pub fn read(&self) -> u64 {
            self.lock.acquire();
            // SAFETY: we hold the lock.
            let value = unsafe { *self.value.get() };
            // SAFETY: acquired above, on this thread.
            unsafe { self.lock.release() };
            value
        }
    }

    /// Hammers `lock` from `threads` threads, `iters` guarded increments
    /// each, and returns the final count.
    pub fn hammer<L>(lock: L, threads: u32, iters: u32) -> u64
    where
        L: RawLock + Send + Sync + 'static,
    {
        let counter = Arc::new(Counter::new(lock));
        let (tx, rx) = channel();
        for _ in 0..threads {
            let counter = Arc::clone(&counter);
            let tx = tx.clone();
            thread::spawn(move || {
                for _ in 0..iters {
                    counter.add();
                }
                tx.send(()).unwrap();
            });
        }
        drop(tx);
        for _ in 0..threads {
            rx.recv().unwrap();
        }
        counter.read()
    }

    /// A successful try-acquire holds the lock; attempts on a held lock
    /// fail and change nothing.
    pub fn try_acquire_excludes<L: RawTryLock>(lock: L) {
        assert!(lock.try_acquire());
        assert!(!lock.try_acquire());
        // SAFETY: the first try_acquire succeeded on this thread.
        unsafe { lock.release() };

        assert!(lock.try_acquire());
        // SAFETY: as above.
        unsafe { lock.release() };
    }
}

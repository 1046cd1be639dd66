//! A container coupling a [`Lock`] with the data it protects.
//!
//! [`Lock`]: crate::lock::Lock

use core::fmt;
use core::marker::PhantomData;

use crate::cfg::cell::{UnsafeCell, WithUnchecked};
use crate::lock::{Lock, Variant};
use crate::relax::Relax;

/// A mutual exclusion primitive protecting shared data, with the lock
/// algorithm chosen at construction.
///
/// The data can only be accessed through the RAII guards returned from
/// [`lock`] and [`try_lock`], which guarantees the data is only ever read
/// or written while the lock is held.
///
/// # Example
///
/// ```
/// use std::sync::mpsc::channel;
/// use std::sync::Arc;
/// use std::thread;
///
/// use anylock::mutex::spins::Mutex;
/// use anylock::Variant;
///
/// const N: usize = 10;
///
/// // Spawn a few threads to increment a shared variable (non-atomically),
/// // and let the main thread know once all increments are done.
/// let data = Arc::new(Mutex::new(Variant::Mcs, 0));
///
/// let (tx, rx) = channel();
/// for _ in 0..N {
///     let (data, tx) = (Arc::clone(&data), tx.clone());
///     thread::spawn(move || {
///         // The shared state can only be accessed once the lock is held.
///         // Our non-atomic increment is safe because we're the only
///         // thread which can access the shared state when the lock is
///         // held.
///         let mut data = data.lock();
///         *data += 1;
///         if *data == N {
///             tx.send(()).unwrap();
///         }
///         // the lock is unlocked here when `data` goes out of scope.
///     });
/// }
///
/// rx.recv().unwrap();
/// ```
///
/// [`lock`]: Mutex::lock
/// [`try_lock`]: Mutex::try_lock
pub struct Mutex<T: ?Sized, R> {
    raw: Lock<R>,
    data: UnsafeCell<T>,
}

// Same unsafe impls as `std::sync::Mutex`.
unsafe impl<T: ?Sized + Send, R> Send for Mutex<T, R> {}
unsafe impl<T: ?Sized + Send, R> Sync for Mutex<T, R> {}

impl<T, R: Relax> Mutex<T, R> {
    /// Creates an unlocked mutex of the given variant, holding `value`.
    ///
    /// # Example
    ///
    /// ```
    /// use anylock::mutex::spins::Mutex;
    /// use anylock::Variant;
    ///
    /// let mutex = Mutex::new(Variant::Ticket, 0);
    /// assert_eq!(*mutex.lock(), 0);
    /// ```
    pub fn new(variant: Variant, value: T) -> Self {
        Self { raw: Lock::new(variant), data: UnsafeCell::new(value) }
    }

    /// Consumes this mutex, returning the underlying data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized, R: Relax> Mutex<T, R> {
    /// Acquires this mutex, blocking the current thread until it is able
    /// to do so. Upon returning, the thread is the only one with the lock
    /// held; the returned guard allows scoped unlock.
    ///
    /// A thread that already holds this mutex must not call `lock` again:
    /// the algorithms are non-reentrant and the nested call deadlocks.
    pub fn lock(&self) -> MutexGuard<'_, T, R> {
        self.raw.acquire();
        MutexGuard::new(self)
    }

    /// Attempts to acquire this mutex without blocking.
    ///
    /// Returns `None` if the lock could not be taken right now. This is
    /// always the answer for [`Variant::Clh`], which has no non-blocking
    /// path.
    ///
    /// # Example
    ///
    /// ```
    /// use anylock::mutex::spins::Mutex;
    /// use anylock::Variant;
    ///
    /// let mutex = Mutex::new(Variant::OsMutex, 0);
    /// if let Some(mut guard) = mutex.try_lock() {
    ///     *guard = 10;
    /// }
    /// assert_eq!(*mutex.lock(), 10);
    /// ```
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T, R>> {
        self.raw.try_acquire().then(|| MutexGuard::new(self))
    }

    /// Acquires this mutex and runs `f` against its guard.
    pub fn lock_with<F, Ret>(&self, f: F) -> Ret
    where
        F: FnOnce(MutexGuard<'_, T, R>) -> Ret,
    {
        f(self.lock())
    }

    /// Attempts to acquire this mutex and hands the outcome to `f`.
    pub fn try_lock_with<F, Ret>(&self, f: F) -> Ret
    where
        F: FnOnce(Option<MutexGuard<'_, T, R>>) -> Ret,
    {
        f(self.try_lock())
    }

    /// The algorithm backing this mutex.
    pub fn variant(&self) -> Variant {
        self.raw.variant()
    }

    /// Returns a mutable reference to the underlying data.
    ///
    /// Since this call borrows the mutex mutably, no actual locking needs
    /// to take place.
    #[cfg(not(all(loom, test)))]
    pub fn get_mut(&mut self) -> &mut T {
        // SAFETY: the exclusive borrow stands in for holding the lock.
        unsafe { &mut *self.data.get() }
    }
}

impl<T: ?Sized + fmt::Debug, R: Relax> fmt::Debug for Mutex<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Mutex");
        d.field("variant", &self.variant());
        self.try_lock_with(|guard| match guard {
            Some(guard) => guard.with(|data| d.field("data", &data)),
            None => d.field("data", &format_args!("<unavailable>")),
        });
        d.finish()
    }
}

/// An RAII implementation of a "scoped lock" of a mutex. When this
/// structure is dropped (falls out of scope), the lock will be unlocked.
///
/// The data protected by the mutex can be accessed through this guard via
/// its [`Deref`] and [`DerefMut`] implementations.
///
/// The guard is not `Send`: the queued variants release through the
/// acquiring thread's node storage, so a guard must be dropped on the
/// thread that created it.
///
/// ```compile_fail,E0277
/// use anylock::mutex::spins::Mutex;
/// use anylock::Variant;
///
/// let mutex = Mutex::new(Variant::Mcs, 0);
/// let guard = mutex.lock();
/// std::thread::scope(|s| {
///     s.spawn(move || drop(guard));
/// });
/// ```
///
/// [`Deref`]: core::ops::Deref
/// [`DerefMut`]: core::ops::DerefMut
#[must_use = "if unused the Mutex will immediately unlock"]
pub struct MutexGuard<'a, T: ?Sized, R: Relax> {
    lock: &'a Mutex<T, R>,
    marker: PhantomData<*mut ()>,
}

// Same unsafe Sync impl as `std::sync::MutexGuard`.
unsafe impl<T: ?Sized + Sync, R: Relax> Sync for MutexGuard<'_, T, R> {}

impl<'a, T: ?Sized, R: Relax> MutexGuard<'a, T, R> {
    fn new(lock: &'a Mutex<T, R>) -> Self {
        Self { lock, marker: PhantomData }
    }

    /// Runs `f` against a shared reference to the underlying data.
    pub(crate) fn with<F, Ret>(&self, f: F) -> Ret
    where
        F: FnOnce(&T) -> Ret,
    {
        // SAFETY: a live guard means the lock is held by this thread.
        unsafe { self.lock.data.with_unchecked(f) }
    }

    /// Runs `f` against a mutable reference to the underlying data.
    #[cfg(all(loom, test))]
    pub(crate) fn with_mut<F, Ret>(&mut self, f: F) -> Ret
    where
        F: FnOnce(&mut T) -> Ret,
    {
        // SAFETY: a live guard means the lock is held by this thread, and
        // this is the only guard.
        unsafe { self.lock.data.with_mut_unchecked(f) }
    }
}

impl<T: ?Sized, R: Relax> Drop for MutexGuard<'_, T, R> {
    fn drop(&mut self) {
        // SAFETY: this guard was handed out by an acquire on this thread
        // and drop runs once.
        unsafe { self.lock.raw.release() };
    }
}

#[cfg(not(all(loom, test)))]
impl<T: ?Sized, R: Relax> core::ops::Deref for MutexGuard<'_, T, R> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: a live guard means the lock is held by this thread.
        unsafe { &*self.lock.data.get() }
    }
}

#[cfg(not(all(loom, test)))]
impl<T: ?Sized, R: Relax> core::ops::DerefMut for MutexGuard<'_, T, R> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: a live guard means the lock is held by this thread, and
        // this is the only guard.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized + fmt::Debug, R: Relax> fmt::Debug for MutexGuard<'_, T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.with(|data| fmt::Debug::fmt(data, f))
    }
}

impl<T: ?Sized + fmt::Display, R: Relax> fmt::Display for MutexGuard<'_, T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.with(|data| fmt::Display::fmt(data, f))
    }
}

/// A [`Mutex`] that relaxes by spinning with a pause hint during
/// contention.
pub mod spins {
    use crate::relax::{Spin, SpinBackoff};

    /// A [`Mutex`] that implements the [`Spin`] relax policy.
    ///
    /// # Example
    ///
    /// ```
    /// use anylock::mutex::spins::Mutex;
    /// use anylock::Variant;
    ///
    /// let mutex = Mutex::new(Variant::Mcs, 0);
    /// assert_eq!(*mutex.lock(), 0);
    /// ```
    ///
    /// [`Mutex`]: super::Mutex
    pub type Mutex<T> = super::Mutex<T, Spin>;

    /// A [`MutexGuard`] that implements the [`Spin`] relax policy.
    ///
    /// [`MutexGuard`]: super::MutexGuard
    pub type MutexGuard<'a, T> = super::MutexGuard<'a, T, Spin>;

    /// A [`Mutex`] that relaxes with exponential backoff while spinning.
    pub mod backoff {
        use super::SpinBackoff;

        /// A [`Mutex`] that implements the [`SpinBackoff`] relax policy.
        ///
        /// [`Mutex`]: super::super::Mutex
        pub type Mutex<T> = super::super::Mutex<T, SpinBackoff>;

        /// A [`MutexGuard`] that implements the [`SpinBackoff`] relax
        /// policy.
        ///
        /// [`MutexGuard`]: super::super::MutexGuard
        pub type MutexGuard<'a, T> = super::super::MutexGuard<'a, T, SpinBackoff>;
    }
}

/// A [`Mutex`] that yields its time slice to the OS during contention.
pub mod yields {
    use crate::relax::{Yield, YieldBackoff};

    /// A [`Mutex`] that implements the [`Yield`] relax policy.
    ///
    /// # Example
    ///
    /// ```
    /// use anylock::mutex::yields::Mutex;
    /// use anylock::Variant;
    ///
    /// let mutex = Mutex::new(Variant::Clh, 0);
    /// assert_eq!(*mutex.lock(), 0);
    /// ```
    ///
    /// [`Mutex`]: super::Mutex
    pub type Mutex<T> = super::Mutex<T, Yield>;

    /// A [`MutexGuard`] that implements the [`Yield`] relax policy.
    ///
    /// [`MutexGuard`]: super::MutexGuard
    pub type MutexGuard<'a, T> = super::MutexGuard<'a, T, Yield>;

    /// A [`Mutex`] that backs off in a spin loop, then yields.
    pub mod backoff {
        use super::YieldBackoff;

        /// A [`Mutex`] that implements the [`YieldBackoff`] relax policy.
        ///
        /// [`Mutex`]: super::super::Mutex
        pub type Mutex<T> = super::super::Mutex<T, YieldBackoff>;

        /// A [`MutexGuard`] that implements the [`YieldBackoff`] relax
        /// policy.
        ///
        /// [`MutexGuard`]: super::super::MutexGuard
        pub type MutexGuard<'a, T> = super::super::MutexGuard<'a, T, YieldBackoff>;
    }
}

/// A [`Mutex`] that rapidly spins without a pause hint during contention.
pub mod loops {
    use crate::relax::Loop;

    /// A [`Mutex`] that implements the [`Loop`] relax policy.
    ///
    /// [`Mutex`]: super::Mutex
    pub type Mutex<T> = super::Mutex<T, Loop>;

    /// A [`MutexGuard`] that implements the [`Loop`] relax policy.
    ///
    /// [`MutexGuard`]: super::MutexGuard
    pub type MutexGuard<'a, T> = super::MutexGuard<'a, T, Loop>;
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::mpsc::channel;
    use std::sync::Arc;
    use std::thread;

    use super::yields::Mutex;
    use crate::lock::Variant;

    #[derive(Eq, PartialEq, Debug)]
    struct NonCopy(u32);

    #[test]
    fn smoke() {
        for variant in Variant::ALL {
            let mutex = Mutex::new(variant, ());
            drop(mutex.lock());
            drop(mutex.lock());
        }
    }

    #[test]
    fn lots_and_lots() {
        const ITERS: u32 = 1000;
        const CONCURRENCY: u32 = 6;

        for variant in Variant::ALL {
            let data = Arc::new(Mutex::new(variant, 0u32));

            let (tx, rx) = channel();
            for _ in 0..CONCURRENCY {
                let (data, tx) = (Arc::clone(&data), tx.clone());
                thread::spawn(move || {
                    for _ in 0..ITERS {
                        *data.lock() += 1;
                    }
                    tx.send(()).unwrap();
                });
            }
            drop(tx);
            for _ in 0..CONCURRENCY {
                rx.recv().unwrap();
            }
            assert_eq!(*data.lock(), ITERS * CONCURRENCY);
        }
    }

    #[test]
    fn try_lock() {
        for variant in [Variant::OsMutex, Variant::Ticket, Variant::Mcs] {
            let mutex = Mutex::new(variant, 0);
            {
                let mut guard = mutex.try_lock().unwrap();
                *guard = 10;
                // Held: a second attempt on any variant must fail.
                assert!(mutex.try_lock().is_none());
            }
            assert_eq!(*mutex.lock(), 10);
        }

        // No non-blocking path for CLH, held or not.
        let mutex = Mutex::new(Variant::Clh, 0);
        assert!(mutex.try_lock().is_none());
        assert_eq!(*mutex.lock(), 0);
    }

    #[test]
    fn test_into_inner() {
        for variant in Variant::ALL {
            let mutex = Mutex::new(variant, NonCopy(10));
            assert_eq!(mutex.into_inner(), NonCopy(10));
        }
    }

    #[test]
    fn test_get_mut() {
        let mut mutex = Mutex::new(Variant::Ticket, NonCopy(10));
        *mutex.get_mut() = NonCopy(20);
        assert_eq!(mutex.into_inner(), NonCopy(20));
    }

    #[test]
    fn test_lock_arc_nested() {
        // Tests nested locks of different variants and access to the
        // underlying data.
        let arc = Arc::new(Mutex::new(Variant::Mcs, 1));
        let arc2 = Arc::new(Mutex::new(Variant::Clh, arc));
        let (tx, rx) = channel();
        let _t = thread::spawn(move || {
            let lock = arc2.lock();
            let lock2 = lock.lock();
            assert_eq!(*lock2, 1);
            tx.send(()).unwrap();
        });
        rx.recv().unwrap();
    }

    #[test]
    fn test_lock_arc_access_in_unwind() {
        for variant in Variant::ALL {
            let arc = Arc::new(Mutex::new(variant, 1));
            let arc2 = Arc::clone(&arc);
            let _ = thread::spawn(move || {
                struct Unwinder {
                    i: Arc<Mutex<i32>>,
                }
                impl Drop for Unwinder {
                    fn drop(&mut self) {
                        *self.i.lock() += 1;
                    }
                }
                let _u = Unwinder { i: arc2 };
                panic!();
            })
            .join();
            assert_eq!(*arc.lock(), 2);
        }
    }

    #[test]
    fn test_lock_unsized() {
        let lock: &Mutex<[i32]> = &Mutex::new(Variant::Ticket, [1, 2, 3]);
        {
            let b = &mut *lock.lock();
            b[0] = 4;
            b[2] = 5;
        }
        let comp: &[i32] = &[4, 2, 5];
        assert_eq!(&*lock.lock(), comp);
    }

    #[test]
    fn debug_shows_data_or_placeholder() {
        let mutex = Mutex::new(Variant::Ticket, 42);
        assert!(format!("{mutex:?}").contains("42"));

        let guard = mutex.lock();
        assert!(format!("{mutex:?}").contains("<unavailable>"));
        drop(guard);

        // CLH has no try path, so its debug output never shows the data.
        let mutex = Mutex::new(Variant::Clh, 42);
        assert!(format!("{mutex:?}").contains("<unavailable>"));
    }

    #[test]
    fn guard_display_forwards() {
        let mutex = Mutex::new(Variant::OsMutex, 42);
        let guard = mutex.lock();
        assert_eq!(format!("{guard}"), "42");
        assert_eq!(format!("{guard:?}"), "42");
    }
}

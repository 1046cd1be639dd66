//! Run-time selection of a lock algorithm behind one handle type.
//!
//! [`Lock::new`] is the factory: it takes a [`Variant`] tag and builds a
//! lock of that algorithm; from then on callers go through the uniform
//! [`acquire`] / [`try_acquire`] / [`release`] contract and never examine
//! the tag again. Variant tags also parse from strings, which is where the
//! [`UnknownVariant`] error comes from.
//!
//! The handle carries no data. For a lock coupled with the value it
//! protects, see [`Mutex`].
//!
//! [`acquire`]: Lock::acquire
//! [`try_acquire`]: Lock::try_acquire
//! [`release`]: Lock::release
//! [`Mutex`]: crate::mutex::Mutex

use core::fmt;
use core::str::FromStr;

use crate::raw::{ClhLock, McsLock, OsMutex, RawLock, RawTryLock, TicketLock};
use crate::relax::Relax;

/// The algorithms a [`Lock`] can be built with.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Variant {
    /// The OS-backed blocking mutex; waiters sleep in the kernel.
    OsMutex,
    /// The two-counter FIFO ticket lock.
    Ticket,
    /// The list-based queuing lock; waiters spin on their own node.
    Mcs,
    /// The implicit-queue lock; waiters spin on their predecessor's node.
    Clh,
}

impl Variant {
    /// Every variant, in a fixed order.
    pub const ALL: [Variant; 4] = [Variant::OsMutex, Variant::Ticket, Variant::Mcs, Variant::Clh];

    /// The token accepted by [`FromStr`] and printed by [`Display`].
    ///
    /// [`Display`]: fmt::Display
    pub const fn name(self) -> &'static str {
        match self {
            Variant::OsMutex => "os",
            Variant::Ticket => "ticket",
            Variant::Mcs => "mcs",
            Variant::Clh => "clh",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Variant {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Variant::ALL
            .into_iter()
            .find(|variant| variant.name() == s)
            .ok_or_else(|| UnknownVariant { name: s.into() })
    }
}

/// The error returned when a token does not name any lock algorithm.
///
/// # Example
///
/// ```
/// use anylock::Variant;
///
/// let err = "fancy".parse::<Variant>().unwrap_err();
/// assert_eq!(err.name(), "fancy");
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnknownVariant {
    name: Box<str>,
}

impl UnknownVariant {
    /// The token that failed to parse.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown lock variant {:?}, expected one of: os, ticket, mcs, clh", self.name)
    }
}

impl std::error::Error for UnknownVariant {}

/// A mutual-exclusion lock whose algorithm is chosen at construction.
///
/// All variants share the same contract: [`acquire`] blocks until the
/// caller is the exclusive holder, [`release`] hands the lock on, and
/// [`try_acquire`] never blocks. Acquisition is FIFO for the ticket, MCS
/// and CLH variants; the OS variant grants in whatever order the platform
/// wakes sleepers.
///
/// This is the raw, data-less handle: `release` is `unsafe` because nothing
/// ties it to a matching `acquire`. [`Mutex`] wraps a `Lock` together with
/// the protected value behind a safe RAII guard.
///
/// # Example
///
/// ```
/// use anylock::lock::spins::Lock;
/// use anylock::Variant;
///
/// let lock = Lock::new(Variant::Ticket);
/// lock.acquire();
/// // ... exclusive section ...
/// // SAFETY: acquired right above, on this thread.
/// unsafe { lock.release() };
/// ```
///
/// [`acquire`]: Lock::acquire
/// [`try_acquire`]: Lock::try_acquire
/// [`release`]: Lock::release
/// [`Mutex`]: crate::mutex::Mutex
pub struct Lock<R> {
    raw: Raw<R>,
}

enum Raw<R> {
    Os(OsMutex),
    Ticket(TicketLock<R>),
    Mcs(McsLock<R>),
    Clh(ClhLock<R>),
}

impl<R> Lock<R> {
    /// The algorithm this lock was built with.
    pub fn variant(&self) -> Variant {
        match self.raw {
            Raw::Os(_) => Variant::OsMutex,
            Raw::Ticket(_) => Variant::Ticket,
            Raw::Mcs(_) => Variant::Mcs,
            Raw::Clh(_) => Variant::Clh,
        }
    }
}

impl<R: Relax> Lock<R> {
    /// Builds an unheld lock of the given variant, with all state freshly
    /// initialized: counters at zero, queues empty, the OS word unlocked.
    pub fn new(variant: Variant) -> Self {
        let raw = match variant {
            Variant::OsMutex => Raw::Os(OsMutex::new()),
            Variant::Ticket => Raw::Ticket(TicketLock::new()),
            Variant::Mcs => Raw::Mcs(McsLock::new()),
            Variant::Clh => Raw::Clh(ClhLock::new()),
        };
        Self { raw }
    }

    /// Parses `name` and builds that variant; the one fallible entry to
    /// the factory.
    ///
    /// # Example
    ///
    /// ```
    /// use anylock::lock::spins::Lock;
    /// use anylock::Variant;
    ///
    /// let lock = Lock::from_name("mcs").unwrap();
    /// assert_eq!(lock.variant(), Variant::Mcs);
    /// assert!(Lock::from_name("fancy").is_err());
    /// ```
    pub fn from_name(name: &str) -> Result<Self, UnknownVariant> {
        name.parse().map(Self::new)
    }

    /// Acquires the lock, blocking the current thread until it is the
    /// exclusive holder.
    ///
    /// Must not be called by a thread that already holds this lock: the
    /// algorithms are non-reentrant and a nested acquire deadlocks.
    pub fn acquire(&self) {
        match &self.raw {
            Raw::Os(lock) => lock.acquire(),
            Raw::Ticket(lock) => lock.acquire(),
            Raw::Mcs(lock) => lock.acquire(),
            Raw::Clh(lock) => lock.acquire(),
        }
    }

    /// Attempts to acquire the lock without blocking; `true` means the
    /// caller now holds it and must eventually [`release`] it. A failed
    /// attempt leaves the lock state untouched.
    ///
    /// The CLH variant has no non-blocking path (see [`ClhLock`]) and
    /// answers `false` unconditionally.
    ///
    /// [`release`]: Lock::release
    pub fn try_acquire(&self) -> bool {
        match &self.raw {
            Raw::Os(lock) => lock.try_acquire(),
            Raw::Ticket(lock) => lock.try_acquire(),
            Raw::Mcs(lock) => lock.try_acquire(),
            Raw::Clh(_) => false,
        }
    }

    /// Releases the lock.
    ///
    /// # Safety
    ///
    /// Must be called by the thread that most recently acquired this lock,
    /// exactly once per acquire, and the lock must not have been moved in
    /// between (the queued variants key their node storage by the lock's
    /// address). Misuse is not detected and corrupts the lock state.
    pub unsafe fn release(&self) {
        match &self.raw {
            // SAFETY: the caller upholds the contract above.
            Raw::Os(lock) => unsafe { lock.release() },
            Raw::Ticket(lock) => unsafe { lock.release() },
            Raw::Mcs(lock) => unsafe { lock.release() },
            Raw::Clh(lock) => unsafe { lock.release() },
        }
    }
}

impl<R> fmt::Debug for Lock<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock").field("variant", &self.variant()).finish_non_exhaustive()
    }
}

/// A [`Lock`] that relaxes by spinning with a pause hint during contention.
pub mod spins {
    use crate::relax::{Spin, SpinBackoff};

    /// A [`Lock`] that implements the [`Spin`] relax policy.
    ///
    /// [`Lock`]: super::Lock
    pub type Lock = super::Lock<Spin>;

    /// A [`Lock`] that relaxes with exponential backoff while spinning.
    pub mod backoff {
        use super::SpinBackoff;

        /// A [`Lock`] that implements the [`SpinBackoff`] relax policy.
        ///
        /// [`Lock`]: super::super::Lock
        pub type Lock = super::super::Lock<SpinBackoff>;
    }
}

/// A [`Lock`] that yields its time slice to the OS during contention.
pub mod yields {
    use crate::relax::{Yield, YieldBackoff};

    /// A [`Lock`] that implements the [`Yield`] relax policy.
    ///
    /// [`Lock`]: super::Lock
    pub type Lock = super::Lock<Yield>;

    /// A [`Lock`] that backs off in a spin loop, then yields.
    pub mod backoff {
        use super::YieldBackoff;

        /// A [`Lock`] that implements the [`YieldBackoff`] relax policy.
        ///
        /// [`Lock`]: super::super::Lock
        pub type Lock = super::super::Lock<YieldBackoff>;
    }
}

/// A [`Lock`] that rapidly spins without a pause hint during contention.
pub mod loops {
    use crate::relax::Loop;

    /// A [`Lock`] that implements the [`Loop`] relax policy.
    ///
    /// [`Lock`]: super::Lock
    pub type Lock = super::Lock<Loop>;
}

#[cfg(all(not(loom), test))]
mod test {
    use super::{Lock, Variant};
    use crate::relax::Spin;

    #[test]
    fn variant_tokens_round_trip() {
        for variant in Variant::ALL {
            let parsed: Variant = variant.name().parse().unwrap();
            assert_eq!(parsed, variant);
            assert_eq!(variant.to_string(), variant.name());
        }
    }

    #[test]
    fn unknown_token_is_an_error() {
        let err = "peterson".parse::<Variant>().unwrap_err();
        assert_eq!(err.name(), "peterson");
        assert!(err.to_string().contains("peterson"));
    }

    #[test]
    fn factory_builds_every_variant() {
        for variant in Variant::ALL {
            let lock = Lock::<Spin>::new(variant);
            assert_eq!(lock.variant(), variant);
        }
    }

    #[test]
    fn acquire_release_cycles() {
        for variant in Variant::ALL {
            let lock = Lock::<Spin>::new(variant);
            for _ in 0..3 {
                lock.acquire();
                // SAFETY: acquired above, on this thread.
                unsafe { lock.release() };
            }
        }
    }

    #[test]
    fn try_acquire_truthful() {
        for variant in Variant::ALL {
            let lock = Lock::<Spin>::new(variant);
            if variant == Variant::Clh {
                // No non-blocking path; must not perturb the lock either.
                assert!(!lock.try_acquire());
                lock.acquire();
                // SAFETY: acquired above, on this thread.
                unsafe { lock.release() };
            } else {
                assert!(lock.try_acquire());
                // SAFETY: try_acquire returned true on this thread.
                unsafe { lock.release() };
            }
        }
    }

    #[test]
    fn create_and_destroy_without_use() {
        for variant in Variant::ALL {
            drop(Lock::<Spin>::new(variant));
        }
    }

    #[test]
    fn debug_names_the_variant() {
        let lock = Lock::<Spin>::new(Variant::Mcs);
        assert!(format!("{lock:?}").contains("Mcs"));
    }
}

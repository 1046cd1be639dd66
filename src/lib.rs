//! Mutual-exclusion primitives with a run-time selectable algorithm.
//!
//! This crate ships four interchangeable lock algorithms behind one
//! contract, so an application can pick the latency / fairness /
//! scalability profile that matches a workload and change its mind with a
//! configuration value instead of a rebuild:
//!
//! - [`Variant::OsMutex`]: a futex-backed blocking mutex. Waiters sleep
//!   in the kernel; no fairness guarantee beyond the platform's. The
//!   baseline, and the right default whenever critical sections can be
//!   preempted.
//! - [`Variant::Ticket`]: FIFO by two counters. Two words of state, but
//!   every waiter polls the same location.
//! - [`Variant::Mcs`]: the Mellor-Crummey and Scott queue lock. FIFO, and
//!   every waiter spins on its own cache line.
//! - [`Variant::Clh`]: the Craig, Landin and Hagersten queue lock. FIFO,
//!   and every waiter spins on its predecessor's node.
//!
//! [`Lock`] is the raw, data-less handle produced by the factory;
//! [`Mutex`] couples a lock with the value it protects behind RAII guards.
//! The spinning variants are generic over a [`Relax`] policy that decides
//! what a waiter does with its CPU between polls.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::thread;
//!
//! use anylock::mutex::spins::Mutex;
//! use anylock::Variant;
//!
//! // Pick the algorithm at run time, e.g. from configuration.
//! let variant: Variant = "mcs".parse()?;
//! let counter = Arc::new(Mutex::new(variant, 0));
//!
//! let handles: Vec<_> = (0..4)
//!     .map(|_| {
//!         let counter = Arc::clone(&counter);
//!         thread::spawn(move || {
//!             for _ in 0..1000 {
//!                 *counter.lock() += 1;
//!             }
//!         })
//!     })
//!     .collect();
//! for handle in handles {
//!     handle.join().unwrap();
//! }
//!
//! assert_eq!(*counter.lock(), 4 * 1000);
//! # Ok::<(), anylock::UnknownVariant>(())
//! ```
//!
//! # Spinlock use cases
//!
//! It is noteworthy that [spinlocks are usually not what you want]. Most
//! use cases are well covered by OS-based mutexes, which this crate's
//! [`Variant::OsMutex`] provides: those tell the system that the waiting
//! thread should be put to sleep, freeing the processor. The busy-waiting
//! variants pay off only where the cost of a context switch exceeds the
//! expected wait, such as very short critical sections on otherwise idle
//! cores, and they are the ones worth measuring against each other.
//!
//! # Queue nodes
//!
//! The MCS and CLH algorithms thread waiters through per-thread queue
//! nodes. This crate manages them internally, one set per thread *per
//! lock*, in thread-local storage: a thread may hold several queued locks
//! at once, and nodes are reused across every acquisition of the same lock
//! by the same thread. The only obligation this leaves callers is the
//! obvious one: release (or drop the guard of) every lock acquired before
//! the thread exits.
//!
//! [spinlocks are usually not what you want]:
//!     https://matklad.github.io/2020/01/02/spinlocks-considered-harmful.html
//! [`Relax`]: crate::relax::Relax

#![warn(missing_docs)]
#![warn(rust_2021_compatibility)]
#![warn(unsafe_op_in_unsafe_fn)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::inline_always)]

pub mod lock;
pub mod mutex;
pub mod raw;
pub mod relax;

pub(crate) mod cfg;

#[cfg(all(not(loom), test))]
pub(crate) mod test;

#[cfg(all(loom, test))]
pub(crate) mod loom;

pub use lock::{Lock, UnknownVariant, Variant};
pub use mutex::{Mutex, MutexGuard};

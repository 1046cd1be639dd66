use core::cell::{Cell, RefCell};
use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};

use crossbeam_utils::CachePadded;

use crate::cfg::atomic::{fence, AtomicBool, AtomicPtr};
use crate::raw::{RawLock, RawTryLock};
use crate::relax::Relax;

/// A waiter's entry in the queue: the successor link, written by the
/// successor itself, and the flag the waiter spins on, cleared by the
/// predecessor at hand-off. Padded so that a thread polling its own
/// `locked` does not share a line with a neighbour's node.
struct Node {
    next: AtomicPtr<CachePadded<Node>>,
    locked: AtomicBool,
}

type NodePtr = *mut CachePadded<Node>;

impl Node {
    fn new() -> Self {
        let next = AtomicPtr::new(ptr::null_mut());
        let locked = AtomicBool::new(true);
        Self { next, locked }
    }
}

/// One thread's queue node for one lock, plus whether that lock is
/// currently held through it.
struct Entry {
    node: CachePadded<Node>,
    held: Cell<bool>,
}

impl Entry {
    fn new() -> Self {
        let node = CachePadded::new(Node::new());
        let held = Cell::new(false);
        Self { node, held }
    }
}

/// This thread's entries, keyed by lock address. Entries are reused across
/// every acquisition of the same lock by this thread, and there are few
/// enough locks per thread that a linear scan beats hashing.
struct Table {
    entries: Vec<(usize, *mut Entry)>,
}

impl Table {
    const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    fn entry(&mut self, key: usize) -> *mut Entry {
        if let Some(&(_, entry)) = self.entries.iter().find(|&&(k, _)| k == key) {
            return entry;
        }
        let entry = Box::into_raw(Box::new(Entry::new()));
        self.entries.push((key, entry));
        entry
    }

    fn get(&self, key: usize) -> Option<*mut Entry> {
        self.entries.iter().find(|&&(k, _)| k == key).map(|&(_, entry)| entry)
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        for (_, entry) in self.entries.drain(..) {
            // SAFETY: entries are created by `Box::into_raw` and freed
            // only here.
            let entry = unsafe { Box::from_raw(entry) };
            // A thread exiting while it still holds a lock leaves its node
            // reachable from the queue; leak the node rather than hand the
            // queue a dangling pointer.
            if entry.held.get() {
                core::mem::forget(entry);
            }
        }
    }
}

#[cfg(not(all(loom, test)))]
std::thread_local! {
    static TABLE: RefCell<Table> = const { RefCell::new(Table::new()) };
}

#[cfg(all(loom, test))]
loom::thread_local! {
    static TABLE: RefCell<Table> = RefCell::new(Table::new());
}

/// The list-based queuing lock of Mellor-Crummey and Scott.
///
/// The lock word is a pointer to the tail of a queue of waiting threads.
/// An arriving thread swaps its own node in, links itself behind the
/// previous tail and spins on a flag in its *own* node; the holder hands
/// off by clearing its successor's flag. Every waiter polls a different
/// cache line, and `tail` is touched once per acquire plus at most once per
/// release, so contention on shared words scales with throughput rather
/// than with the number of waiters.
///
/// Queue nodes are per-thread, per-lock, managed internally; a thread must
/// release every lock it acquired before it exits.
pub struct McsLock<R> {
    tail: CachePadded<AtomicPtr<CachePadded<Node>>>,
    marker: PhantomData<R>,
}

impl<R> McsLock<R> {
    /// Creates the lock with an empty queue.
    #[cfg(not(all(loom, test)))]
    pub const fn new() -> Self {
        let tail = CachePadded::new(AtomicPtr::new(ptr::null_mut()));
        Self { tail, marker: PhantomData }
    }

    /// Creates the lock with Loom primitives (non-const).
    #[cfg(all(loom, test))]
    pub fn new() -> Self {
        let tail = CachePadded::new(AtomicPtr::new(ptr::null_mut()));
        Self { tail, marker: PhantomData }
    }

    fn key(&self) -> usize {
        self as *const Self as usize
    }

    /// This thread's node for this lock, created on first use.
    fn entry(&self) -> *mut Entry {
        TABLE.with(|table| table.borrow_mut().entry(self.key()))
    }

    /// This thread's node for this lock, which must already exist.
    fn held_entry(&self) -> *mut Entry {
        TABLE
            .with(|table| table.borrow().get(self.key()))
            .unwrap_or_else(|| panic!("released an MCS lock this thread never acquired"))
    }
}

impl<R> Default for McsLock<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Relax> RawLock for McsLock<R> {
    fn acquire(&self) {
        // SAFETY: the entry outlives the thread and nothing else touches
        // it until the node is published by the swap below.
        let entry = unsafe { &*self.entry() };
        let node = &entry.node;
        node.locked.store(true, Relaxed);
        node.next.store(ptr::null_mut(), Relaxed);
        entry.held.set(true);

        let node_ptr = node as *const _ as NodePtr;
        let pred = self.tail.swap(node_ptr, AcqRel);
        // The queue was empty: the swap alone made us the holder.
        if pred.is_null() {
            return;
        }
        // Link behind the predecessor so its release can reach us, then
        // wait for the hand-off on our own flag.
        //
        // SAFETY: a predecessor's node stays live at least until it has
        // handed off to us, which cannot happen before the store below.
        unsafe { &*pred }.next.store(node_ptr, Release);
        let mut relax = R::new();
        while node.locked.load(Relaxed) {
            relax.relax();
        }
        fence(Acquire);
    }

    unsafe fn release(&self) {
        // SAFETY: the caller holds the lock, so this thread has an entry.
        let entry = unsafe { &*self.held_entry() };
        let node = &entry.node;
        let node_ptr = node as *const _ as NodePtr;

        let mut next = node.next.load(Relaxed);
        if next.is_null() {
            // No known successor; if the tail is still us, the queue
            // empties here and we are done.
            if self.tail.compare_exchange(node_ptr, ptr::null_mut(), Release, Relaxed).is_ok() {
                entry.held.set(false);
                return;
            }
            // Lost that race: a successor swapped itself in but has not
            // linked yet. Wait for the link to appear.
            let mut relax = R::new();
            loop {
                next = node.next.load(Relaxed);
                if !next.is_null() {
                    break;
                }
                relax.relax();
            }
        }
        fence(Acquire);
        entry.held.set(false);
        // SAFETY: a successor spins on its node until this store; the node
        // cannot go away before it.
        unsafe { &*next }.locked.store(false, Release);
    }
}

impl<R: Relax> RawTryLock for McsLock<R> {
    fn try_acquire(&self) -> bool {
        // SAFETY: same as in `acquire`.
        let entry = unsafe { &*self.entry() };
        // A reentrant attempt must fail without touching the node: the
        // node is linked into the queue right now.
        if entry.held.get() {
            return false;
        }
        let node = &entry.node;
        node.locked.store(true, Relaxed);
        node.next.store(ptr::null_mut(), Relaxed);

        let node_ptr = node as *const _ as NodePtr;
        let acquired =
            self.tail.compare_exchange(ptr::null_mut(), node_ptr, AcqRel, Relaxed).is_ok();
        if acquired {
            entry.held.set(true);
        }
        acquired
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use super::McsLock;
    use crate::raw::{RawLock, RawTryLock};
    use crate::relax::Yield;
    use crate::test::tests;

    #[test]
    fn counter_stays_exact() {
        assert_eq!(tests::hammer(McsLock::<Yield>::new(), 8, 10_000), 8 * 10_000);
    }

    #[test]
    fn try_acquire_excludes() {
        tests::try_acquire_excludes(McsLock::<Yield>::new());
    }

    // A thread may hold several MCS locks at once: each (thread, lock)
    // pair gets its own queue node.
    #[test]
    fn nested_distinct_locks() {
        let outer = McsLock::<Yield>::new();
        let inner = McsLock::<Yield>::new();

        outer.acquire();
        inner.acquire();
        assert!(!outer.try_acquire());
        assert!(!inner.try_acquire());
        // SAFETY: both locks acquired above, on this thread.
        unsafe { inner.release() };
        unsafe { outer.release() };

        assert!(outer.try_acquire());
        unsafe { outer.release() };
    }

    #[test]
    #[should_panic = "never acquired"]
    fn release_without_acquire_panics() {
        let lock = McsLock::<Yield>::new();
        // SAFETY: deliberately violating the contract; the lookup panics
        // before any queue state is touched.
        unsafe { lock.release() };
    }
}

#[cfg(all(loom, test))]
mod model {
    use crate::lock::Variant;
    use crate::loom::models;

    #[test]
    fn lock_join() {
        models::lock_join(Variant::Mcs);
    }

    #[test]
    fn try_lock_join() {
        models::try_lock_join(Variant::Mcs);
    }
}

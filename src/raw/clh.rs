use core::cell::RefCell;
use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};

use crossbeam_utils::CachePadded;

use crate::cfg::atomic::{fence, AtomicBool, AtomicPtr};
use crate::raw::RawLock;
use crate::relax::Relax;

/// A waiter's flag in the implicit queue: `true` until the thread that
/// installed the node releases. Padded: successors poll it remotely.
struct Node {
    locked: AtomicBool,
}

type NodePtr = *mut CachePadded<Node>;

impl Node {
    fn new(locked: bool) -> Self {
        Self { locked: AtomicBool::new(locked) }
    }
}

fn alloc_node(locked: bool) -> Box<CachePadded<Node>> {
    Box::new(CachePadded::new(Node::new(locked)))
}

/// One thread's pair of nodes for one lock: `mine` is the node installed
/// for the round in flight, `spare` the node the next acquire will
/// install.
///
/// The spare is the predecessor's allocation, taken over once its release
/// was observed. Rotating through the predecessor's storage is what keeps
/// a released node alive for exactly as long as a successor may still look
/// at it, and it guarantees a thread never re-installs the node a
/// successor is currently spinning on.
struct Slot {
    mine: NodePtr,
    spare: Option<Box<CachePadded<Node>>>,
}

impl Slot {
    fn new() -> Self {
        Self { mine: ptr::null_mut(), spare: None }
    }
}

/// This thread's slots, keyed by lock address.
struct Table {
    slots: Vec<(usize, *mut Slot)>,
}

impl Table {
    const fn new() -> Self {
        Self { slots: Vec::new() }
    }

    fn slot(&mut self, key: usize) -> *mut Slot {
        if let Some(&(_, slot)) = self.slots.iter().find(|&&(k, _)| k == key) {
            return slot;
        }
        let slot = Box::into_raw(Box::new(Slot::new()));
        self.slots.push((key, slot));
        slot
    }

    fn get(&self, key: usize) -> Option<*mut Slot> {
        self.slots.iter().find(|&&(k, _)| k == key).map(|&(_, slot)| slot)
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        for (_, slot) in self.slots.drain(..) {
            // SAFETY: slots are created by `Box::into_raw` and freed only
            // here. The spare node is quiescent (its previous owner's
            // release was observed before it was taken), so dropping it
            // with the slot is fine; `mine` is owned by the queue.
            drop(unsafe { Box::from_raw(slot) });
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

/// The implicit-queue lock of Craig, Landin and Hagersten.
///
/// The lock word points at the node installed by the most recent acquirer.
/// An arriving thread swaps its own node in and spins on the node it got
/// back, so every waiter polls a different cache line and the queue needs
/// no explicit links. Release is a single store to the holder's own node.
///
/// The tail is seeded with a released node, so an acquirer always has a
/// predecessor node to watch and takes ownership of that allocation once
/// it observes the release. Each thread therefore rotates through two
/// allocations per lock in the steady state.
///
/// There is no non-blocking acquisition path: deciding whether the lock is
/// free requires reading the tail node, which a successor may already have
/// recycled. [`Lock::try_acquire`] reports `false` for this variant.
///
/// [`Lock::try_acquire`]: crate::lock::Lock::try_acquire
pub struct ClhLock<R> {
    tail: CachePadded<AtomicPtr<CachePadded<Node>>>,
    marker: PhantomData<R>,
}

impl<R> ClhLock<R> {
    /// Creates the lock, seeding the queue with a released node.
    pub fn new() -> Self {
        let seed = Box::into_raw(alloc_node(false));
        let tail = CachePadded::new(AtomicPtr::new(seed));
        Self { tail, marker: PhantomData }
    }

    fn key(&self) -> usize {
        self as *const Self as usize
    }

    /// This thread's slot for this lock, created on first use.
    fn slot(&self) -> *mut Slot {
        TABLE.with(|table| table.borrow_mut().slot(self.key()))
    }

    /// This thread's slot for this lock, which must already exist.
    fn held_slot(&self) -> *mut Slot {
        TABLE
            .with(|table| table.borrow().get(self.key()))
            .unwrap_or_else(|| panic!("released a CLH lock this thread never acquired"))
    }

    /// This thread's `(mine, spare)` pointers for this lock.
    #[cfg(all(not(loom), test))]
    fn slot_ptrs(&self) -> Option<(usize, Option<usize>)> {
        TABLE.with(|table| table.borrow().get(self.key())).map(|slot| {
            // SAFETY: slot pointers stay valid for the thread's lifetime.
            let slot = unsafe { &*slot };
            let spare = slot.spare.as_deref().map(|node| node as *const _ as usize);
            (slot.mine as usize, spare)
        })
    }
}

impl<R> Default for ClhLock<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Relax> RawLock for ClhLock<R> {
    fn acquire(&self) {
        // SAFETY: the slot outlives the thread and is only ever touched
        // from it.
        let slot = unsafe { &mut *self.slot() };
        let node = slot.spare.take().unwrap_or_else(|| alloc_node(true));
        // Not visible to anyone yet.
        node.locked.store(true, Relaxed);
        let node = Box::into_raw(node);

        // Publish our node and inherit the predecessor's. The seed node
        // guarantees there always is one.
        let pred = self.tail.swap(node, AcqRel);
        // SAFETY: the predecessor's node stays live until we, the only
        // observer, take ownership of it below.
        let pred_ref = unsafe { &*pred };
        let mut relax = R::new();
        while pred_ref.locked.load(Relaxed) {
            relax.relax();
        }
        fence(Acquire);

        // The predecessor released and will never touch its node again:
        // the allocation becomes our spare for the next round.
        slot.mine = node;
        slot.spare = Some(unsafe { Box::from_raw(pred) });
    }

    unsafe fn release(&self) {
        // SAFETY: the caller holds the lock, so this thread has a slot and
        // `mine` is the node it installed.
        let slot = unsafe { &*self.held_slot() };
        // Ownership of `mine` passes to whichever thread next observes
        // this store, or to the lock itself if none does.
        unsafe { &*slot.mine }.locked.store(false, Release);
    }
}

impl<R> Drop for ClhLock<R> {
    fn drop(&mut self) {
        // With no holder and no waiters the tail is a released node owned
        // by the lock: the seed, or the last holder's abandoned `mine`.
        let tail = self.tail.load(Relaxed);
        // SAFETY: tail nodes are always `Box` allocations, and no thread
        // can observe this one anymore.
        drop(unsafe { Box::from_raw(tail) });
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::mpsc::channel;
    use std::sync::Arc;
    use std::thread;

    use super::ClhLock;
    use crate::raw::RawLock;
    use crate::relax::Yield;
    use crate::test::tests;

    #[test]
    fn counter_stays_exact() {
        assert_eq!(tests::hammer(ClhLock::<Yield>::new(), 8, 10_000), 8 * 10_000);
    }

    #[test]
    fn create_and_drop_without_use() {
        drop(ClhLock::<Yield>::new());
    }

    // The two per-thread allocations rotate but never collapse into one.
    #[test]
    fn slot_nodes_stay_distinct() {
        let lock = ClhLock::<Yield>::new();
        assert!(lock.slot_ptrs().is_none());

        for _ in 0..100 {
            lock.acquire();
            // SAFETY: acquired above, on this thread.
            unsafe { lock.release() };

            let (mine, spare) = lock.slot_ptrs().unwrap();
            let spare = spare.expect("spare node present after a full round");
            assert_ne!(mine, 0);
            assert_ne!(mine, spare);
        }
    }

    #[test]
    fn alternating_pair() {
        const ITERS: u32 = 10_000;

        let lock = Arc::new(ClhLock::<Yield>::new());
        let (tx, rx) = channel();
        for _ in 0..2 {
            let lock = Arc::clone(&lock);
            let tx = tx.clone();
            thread::spawn(move || {
                for _ in 0..ITERS {
                    lock.acquire();
                    // SAFETY: acquired above, on this thread.
                    unsafe { lock.release() };
                }
                let distinct = lock.slot_ptrs().is_some_and(|(mine, spare)| {
                    spare.is_some_and(|spare| spare != mine)
                });
                tx.send(distinct).unwrap();
            });
        }
        drop(tx);
        assert!(rx.recv().unwrap());
        assert!(rx.recv().unwrap());
    }

    #[test]
    #[should_panic = "never acquired"]
    fn release_without_acquire_panics() {
        let lock = ClhLock::<Yield>::new();
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
        models::lock_join(Variant::Clh);
    }
}

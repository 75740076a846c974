//! Node arena with stable indices.
//!
//! Nodes live in lazily allocated segments whose sizes double (32, 64, 128,
//! ...), so a `NodeId` always resolves to the same slot for the lifetime of the
//! arena and a slot's memory is never returned to the allocator while the
//! queue exists. Reclaimed slots go onto a tagged Treiber free list and are
//! handed out again by `allocate`.
//!
//! Reading a recycled slot is therefore never a use-after-free; the hazard
//! domain still decides *when* a slot may be recycled so that a value is not
//! overwritten while some thread is copying it out.

use std::cell::UnsafeCell;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

use crate::atomic::AtomicTagged;
use crate::tagged::{NodeId, TaggedPtr};

/// log2 of the first segment's length.
const FIRST_SEGMENT_BITS: u32 = 5;
/// Enough segments to address every `NodeId` up to `NodeId::MAX`.
const SEGMENT_COUNT: usize = 28;
/// Empty link in `free_next`.
const NIL: u64 = u64::MAX;

/// Map a node index to (segment, offset within segment).
#[inline]
fn locate(index: u32) -> (usize, usize) {
    let biased = u64::from(index) + (1 << FIRST_SEGMENT_BITS);
    let bit = 63 - biased.leading_zeros();
    let segment = (bit - FIRST_SEGMENT_BITS) as usize;
    let offset = (biased - (1 << bit)) as usize;
    (segment, offset)
}

#[inline]
fn segment_len(segment: usize) -> usize {
    1 << (segment + FIRST_SEGMENT_BITS as usize)
}

/// A queue node: value slot plus the tagged `next` link.
pub(crate) struct Node<T> {
    value: UnsafeCell<T>,
    pub(crate) next: AtomicTagged,
    /// Free-list link, only meaningful while the slot is reclaimed
    free_next: AtomicU64,
}

impl<T: Default> Node<T> {
    fn vacant() -> Self {
        Self {
            value: UnsafeCell::new(T::default()),
            next: AtomicTagged::null(),
            free_next: AtomicU64::new(NIL),
        }
    }
}

/// Receives nodes the hazard domain has certified unreferenced.
pub trait Reclaim {
    /// Recycle `node`.
    ///
    /// # Safety
    ///
    /// `node` must have been retired, must be unreachable from the queue, and
    /// no thread may hold a published hazard on it or otherwise be reading it.
    unsafe fn reclaim(&self, node: NodeId);
}

/// Allocation counters, for monitoring and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArenaStats {
    /// Slots ever carved out of segments
    pub slots: u64,
    /// Successful `allocate` calls
    pub allocated: u64,
    /// Successful `reclaim` calls
    pub reclaimed: u64,
}

impl ArenaStats {
    /// Nodes allocated and not yet reclaimed.
    #[must_use]
    pub fn live(&self) -> u64 {
        self.allocated - self.reclaimed
    }
}

/// Segmented arena of queue nodes.
pub struct NodeArena<T> {
    segments: [AtomicPtr<Node<T>>; SEGMENT_COUNT],
    free: CachePadded<AtomicTagged>,
    next_index: CachePadded<AtomicU64>,
    allocated: AtomicU64,
    reclaimed: AtomicU64,
}

// SAFETY: values are moved in by one thread and cloned out through shared
// references by others; the hazard protocol orders writes against reads.
unsafe impl<T: Send> Send for NodeArena<T> {}
unsafe impl<T: Send + Sync> Sync for NodeArena<T> {}

impl<T: Default> NodeArena<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            segments: std::array::from_fn(|_| AtomicPtr::new(ptr::null_mut())),
            free: CachePadded::new(AtomicTagged::null()),
            next_index: CachePadded::new(AtomicU64::new(0)),
            allocated: AtomicU64::new(0),
            reclaimed: AtomicU64::new(0),
        }
    }

    /// Store `value` in an unused slot and return its id.
    ///
    /// The slot's `next` is empty. A recycled slot keeps advancing its `next`
    /// tag instead of resetting it to zero.
    ///
    /// # Panics
    ///
    /// When every index up to `NodeId::MAX` is in use. Allocation exhaustion is
    /// not recoverable at this layer.
    pub fn allocate(&self, value: T) -> NodeId {
        let id = match self.pop_free() {
            Some(id) => {
                let link = &self.get(id).next;
                let prev = link.load(Ordering::Relaxed);
                link.store(TaggedPtr::new(None, prev.tag().wrapping_add(1)), Ordering::Relaxed);
                id
            }
            None => self.carve(),
        };

        // SAFETY: the slot came off the free list or is fresh, so no other
        // thread references it until it is published.
        unsafe {
            *self.get(id).value.get() = value;
        }

        self.allocated.fetch_add(1, Ordering::Relaxed);
        id
    }

    fn carve(&self) -> NodeId {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        if index > u64::from(NodeId::MAX) {
            panic!("node arena exhausted: {} slots in use", index);
        }
        let index = index as u32;
        let (segment, _) = locate(index);
        self.ensure_segment(segment);
        NodeId::new(index)
    }

    fn ensure_segment(&self, segment: usize) -> *mut Node<T> {
        let slot = &self.segments[segment];
        let existing = slot.load(Ordering::Acquire);
        if !existing.is_null() {
            return existing;
        }

        let len = segment_len(segment);
        let fresh: Box<[Node<T>]> = (0..len).map(|_| Node::vacant()).collect();
        let fresh = Box::into_raw(fresh) as *mut Node<T>;

        match slot.compare_exchange(ptr::null_mut(), fresh, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => fresh,
            Err(winner) => {
                // SAFETY: `fresh` was never published.
                unsafe { drop(Box::from_raw(ptr::slice_from_raw_parts_mut(fresh, len))) };
                winner
            }
        }
    }

    fn pop_free(&self) -> Option<NodeId> {
        let mut head = self.free.load(Ordering::Acquire);
        loop {
            let id = head.node()?;
            let link = self.get(id).free_next.load(Ordering::Relaxed);
            let next = (link != NIL).then(|| NodeId::new(link as u32));
            match self.free.compare_exchange(
                head,
                head.successor(next),
                Ordering::Acquire,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(id),
                Err(actual) => head = actual,
            }
        }
    }

    fn push_free(&self, id: NodeId) {
        let node = self.get(id);
        let mut head = self.free.load(Ordering::Relaxed);
        loop {
            let link = head.node().map_or(NIL, |n| u64::from(n.index()));
            node.free_next.store(link, Ordering::Relaxed);
            match self.free.compare_exchange(
                head,
                head.successor(Some(id)),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => head = actual,
            }
        }
    }
}

impl<T> NodeArena<T> {
    /// Resolve an id handed out by `allocate`.
    #[inline]
    pub(crate) fn get(&self, id: NodeId) -> &Node<T> {
        let (segment, offset) = locate(id.index());
        let base = self.segments[segment].load(Ordering::Acquire);
        debug_assert!(!base.is_null(), "{} resolved before its segment exists", id);
        // SAFETY: ids are only handed out after their segment is installed,
        // and segments stay allocated until the arena is dropped.
        unsafe { &*base.add(offset) }
    }

    /// Borrow the value stored in `id`.
    ///
    /// # Safety
    ///
    /// The caller must keep `id` from being reclaimed for the lifetime of the
    /// returned reference (e.g. via a validated hazard).
    #[inline]
    pub(crate) unsafe fn value(&self, id: NodeId) -> &T {
        &*self.get(id).value.get()
    }

    #[must_use]
    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            slots: self.next_index.load(Ordering::Relaxed),
            allocated: self.allocated.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
        }
    }
}

impl<T: Default> Reclaim for NodeArena<T> {
    unsafe fn reclaim(&self, node: NodeId) {
        let slot = self.get(node);
        drop(mem::take(&mut *slot.value.get()));
        self.push_free(node);
        self.reclaimed.fetch_add(1, Ordering::Relaxed);
    }
}

impl<T: Default> Default for NodeArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for NodeArena<T> {
    fn drop(&mut self) {
        for (segment, slot) in self.segments.iter_mut().enumerate() {
            let base = *slot.get_mut();
            if !base.is_null() {
                // SAFETY: installed by `ensure_segment` with this length.
                unsafe {
                    drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
                        base,
                        segment_len(segment),
                    )));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_locate_covers_segments_contiguously() {
        assert_eq!(locate(0), (0, 0));
        assert_eq!(locate(31), (0, 31));
        assert_eq!(locate(32), (1, 0));
        assert_eq!(locate(95), (1, 63));
        assert_eq!(locate(96), (2, 0));
        assert_eq!(locate(NodeId::MAX).0, SEGMENT_COUNT - 1);
    }

    #[test]
    fn test_fresh_node_has_null_zero_link() {
        let arena = NodeArena::<u64>::new();
        let id = arena.allocate(5);
        assert_eq!(arena.get(id).next.load(Ordering::Relaxed), TaggedPtr::NULL);
        assert_eq!(unsafe { *arena.value(id) }, 5);
    }

    #[test]
    fn test_reclaimed_slot_is_reused_with_advanced_tag() {
        let arena = NodeArena::<u64>::new();
        let a = arena.allocate(1);
        arena
            .get(a)
            .next
            .store(TaggedPtr::new(Some(NodeId::new(9)), 4), Ordering::Relaxed);

        unsafe { arena.reclaim(a) };
        assert_eq!(unsafe { *arena.value(a) }, 0, "payload dropped to default");

        let b = arena.allocate(2);
        assert_eq!(a, b);
        let link = arena.get(b).next.load(Ordering::Relaxed);
        assert!(link.is_null());
        assert_eq!(link.tag(), 5);

        let stats = arena.stats();
        assert_eq!(stats.slots, 1);
        assert_eq!(stats.allocated, 2);
        assert_eq!(stats.reclaimed, 1);
        assert_eq!(stats.live(), 1);
    }

    #[test]
    fn test_reclaim_drops_payload() {
        let payload = Arc::new(());
        let arena = NodeArena::<Option<Arc<()>>>::new();
        let id = arena.allocate(Some(Arc::clone(&payload)));
        assert_eq!(Arc::strong_count(&payload), 2);
        unsafe { arena.reclaim(id) };
        assert_eq!(Arc::strong_count(&payload), 1);
    }

    #[test]
    fn test_grows_across_segments() {
        let arena = NodeArena::<u64>::new();
        let ids: Vec<_> = (0..200).map(|v| arena.allocate(v)).collect();
        for (v, id) in ids.iter().enumerate() {
            assert_eq!(unsafe { *arena.value(*id) }, v as u64);
        }
        assert_eq!(arena.stats().slots, 200);
    }

    #[test]
    fn test_concurrent_allocate_reclaim_hands_out_unique_slots() {
        const THREADS: usize = 4;
        const ROUNDS: usize = 500;

        let arena = Arc::new(NodeArena::<u64>::new());
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let arena = Arc::clone(&arena);
                thread::spawn(move || {
                    for round in 0..ROUNDS {
                        let value = (t * ROUNDS + round) as u64;
                        let held: Vec<_> = (0..4).map(|_| arena.allocate(value)).collect();
                        for id in &held {
                            assert_eq!(unsafe { *arena.value(*id) }, value);
                        }
                        let unique: HashSet<_> = held.iter().collect();
                        assert_eq!(unique.len(), held.len());
                        for id in held {
                            unsafe { arena.reclaim(id) };
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let stats = arena.stats();
        assert_eq!(stats.live(), 0);
        assert_eq!(stats.allocated, (THREADS * ROUNDS * 4) as u64);
    }
}

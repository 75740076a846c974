//! The Michael-Scott queue engine.
//!
//! `head` always names a sentinel whose value is never handed out; the first
//! element lives in `head.next`. `tail` names the last node or, transiently,
//! the one before it; any operation that notices a lagging `tail` helps it
//! forward before retrying. Every CAS on `head`, `tail` or a `next` link
//! installs a `TaggedPtr` with the tag bumped by one.
//!
//! A node is read only under a validated hazard: publish the id, then
//! re-check that the slot it came from still holds the same tagged value.

use std::fmt;
use std::sync::atomic::Ordering;

use crossbeam_utils::{Backoff, CachePadded};
use tracing::debug;

use crate::arena::{ArenaStats, NodeArena};
use crate::atomic::AtomicTagged;
use crate::config::{ConfigError, QueueConfig};
use crate::hazard::{DomainId, HazardContext, HazardDomain, Shield};
use crate::tagged::{NodeId, TaggedPtr};

/// Hazard slot for `head` or `tail`.
const SLOT_ANCHOR: usize = 0;
/// Hazard slot for the node behind `head`.
const SLOT_NEXT: usize = 1;

/// `head` and `tail` always reference a node.
#[inline]
fn linked(ptr: TaggedPtr) -> NodeId {
    match ptr.node() {
        Some(id) => id,
        None => unreachable!("head and tail never hold a null link"),
    }
}

/// Unbounded lock-free multi-producer multi-consumer FIFO queue.
///
/// # Example
///
/// ```
/// use msq::LockFreeQueue;
///
/// let queue = LockFreeQueue::new();
/// queue.enqueue(1);
/// queue.enqueue(2);
/// assert_eq!(queue.dequeue(), Some(1));
/// assert_eq!(queue.dequeue(), Some(2));
/// assert_eq!(queue.dequeue(), None);
/// ```
pub struct LockFreeQueue<T, H = HazardDomain>
where
    T: Clone + Default,
    H: HazardContext,
{
    head: CachePadded<AtomicTagged>,
    tail: CachePadded<AtomicTagged>,
    arena: NodeArena<T>,
    hazards: H,
    backoff: bool,
}

impl<T: Clone + Default> LockFreeQueue<T> {
    /// Queue in the default domain with default hazard tuning.
    #[must_use]
    pub fn new() -> Self {
        Self::with_domain(DomainId::default())
    }

    #[must_use]
    pub fn with_domain(domain: DomainId) -> Self {
        Self::with_hazards(HazardDomain::new(domain))
    }

    pub fn with_config(config: QueueConfig) -> Result<Self, ConfigError> {
        let hazards = HazardDomain::with_config(config.domain, config.hazard)?;
        Ok(Self::with_hazards(hazards).with_backoff(config.backoff))
    }

    /// The hazard domain, for monitoring.
    pub fn hazard_domain(&self) -> &HazardDomain {
        &self.hazards
    }
}

impl<T, H> LockFreeQueue<T, H>
where
    T: Clone + Default,
    H: HazardContext,
{
    /// Queue that reclaims through `hazards`.
    pub fn with_hazards(hazards: H) -> Self {
        let arena = NodeArena::new();
        let sentinel = TaggedPtr::new(Some(arena.allocate(T::default())), 0);
        Self {
            head: CachePadded::new(AtomicTagged::new(sentinel)),
            tail: CachePadded::new(AtomicTagged::new(sentinel)),
            arena,
            hazards,
            backoff: false,
        }
    }

    /// Spin with exponential backoff after a lost CAS.
    #[must_use]
    pub fn with_backoff(mut self, enabled: bool) -> Self {
        self.backoff = enabled;
        self
    }

    pub fn domain(&self) -> DomainId {
        self.hazards.domain()
    }

    pub fn arena_stats(&self) -> ArenaStats {
        self.arena.stats()
    }

    #[inline]
    fn pause(&self, backoff: &Backoff) {
        if self.backoff {
            backoff.spin();
        }
    }

    /// Append `value` at the tail.
    ///
    /// # Panics
    ///
    /// If the node arena has no index left to hand out.
    pub fn enqueue(&self, value: T) {
        let node = self.arena.allocate(value);
        let shield = self.hazards.shield();
        let backoff = Backoff::new();

        let tail = loop {
            let tail = self.tail.load(Ordering::Acquire);
            let last = linked(tail);
            let _guard = shield.protect(SLOT_ANCHOR, last);
            if self.tail.load(Ordering::Acquire) != tail {
                continue;
            }

            let link = &self.arena.get(last).next;
            let next = link.load(Ordering::Acquire);
            match next.node() {
                None => {
                    if link
                        .compare_exchange(
                            next,
                            next.successor(Some(node)),
                            Ordering::Release,
                            Ordering::Relaxed,
                        )
                        .is_ok()
                    {
                        break tail;
                    }
                }
                Some(ahead) => {
                    let _ = self.tail.compare_exchange(
                        tail,
                        tail.successor(Some(ahead)),
                        Ordering::Release,
                        Ordering::Relaxed,
                    );
                }
            }
            self.pause(&backoff);
        };

        // Best effort; a failure means someone already helped.
        let _ = self.tail.compare_exchange(
            tail,
            tail.successor(Some(node)),
            Ordering::Release,
            Ordering::Relaxed,
        );
    }

    /// Remove and return the element at the head, or `None` if the queue is
    /// empty at the moment of the call.
    pub fn dequeue(&self) -> Option<T> {
        let shield = self.hazards.shield();
        let backoff = Backoff::new();

        let (unlinked, value) = loop {
            let head = self.head.load(Ordering::Acquire);
            let first = linked(head);
            let _head_guard = shield.protect(SLOT_ANCHOR, first);
            if self.head.load(Ordering::Acquire) != head {
                continue;
            }

            let tail = self.tail.load(Ordering::Relaxed);
            let next = self.arena.get(first).next.load(Ordering::Acquire);
            let _next_guard = next.node().map(|second| shield.protect(SLOT_NEXT, second));
            if self.head.load(Ordering::Acquire) != head {
                continue;
            }
            // `head`, `tail` and `next` were consistent; an empty link means
            // the queue was empty when `next` was read.
            let second = next.node()?;

            if tail.node() == Some(first) {
                let _ = self.tail.compare_exchange(
                    tail,
                    tail.successor(Some(second)),
                    Ordering::Release,
                    Ordering::Relaxed,
                );
                continue;
            }

            // Copy out before the CAS: once `head` moves another thread may
            // retire `second` as its own sentinel.
            // SAFETY: `second` is hazarded and was linked after the check above.
            let value = unsafe { self.arena.value(second) }.clone();
            if self
                .head
                .compare_exchange(
                    head,
                    head.successor(Some(second)),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                break (first, value);
            }
            self.pause(&backoff);
        };

        // SAFETY: our CAS unlinked `unlinked`; only the winner retires it.
        unsafe { shield.retire(unlinked, &self.arena) };
        Some(value)
    }

    /// Whether the queue held no element at some instant during the call.
    pub fn is_empty(&self) -> bool {
        let shield = self.hazards.shield();
        loop {
            let head = self.head.load(Ordering::Acquire);
            let first = linked(head);
            let _guard = shield.protect(SLOT_ANCHOR, first);
            if self.head.load(Ordering::Acquire) != head {
                continue;
            }
            return self.arena.get(first).next.load(Ordering::Acquire).is_null();
        }
    }

    /// Clone of the queued elements, head to tail.
    ///
    /// The walk restarts whenever `head` moves, so it only makes progress
    /// while no dequeue completes. Meant for diagnostics and tests, not for
    /// hot paths.
    pub fn snapshot(&self) -> Vec<T> {
        let shield = self.hazards.shield();
        'restart: loop {
            let head = self.head.load(Ordering::Acquire);
            let mut cur = linked(head);
            shield.publish(SLOT_ANCHOR, cur);
            if self.head.load(Ordering::Acquire) != head {
                continue;
            }

            let mut slot = SLOT_ANCHOR;
            let mut values = Vec::new();
            while let Some(node) = self.arena.get(cur).next.load(Ordering::Acquire).node() {
                let other = SLOT_ANCHOR + SLOT_NEXT - slot;
                shield.publish(other, node);
                // Unchanged head means nothing was unlinked since the walk began.
                if self.head.load(Ordering::Acquire) != head {
                    continue 'restart;
                }
                // SAFETY: hazarded while still linked.
                values.push(unsafe { self.arena.value(node) }.clone());
                cur = node;
                slot = other;
            }

            shield.clear(SLOT_ANCHOR);
            shield.clear(SLOT_NEXT);
            return values;
        }
    }
}

impl<T: Clone + Default> Default for LockFreeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, H> Drop for LockFreeQueue<T, H>
where
    T: Clone + Default,
    H: HazardContext,
{
    fn drop(&mut self) {
        let mut drained = 0usize;
        while self.dequeue().is_some() {
            drained += 1;
        }

        let sentinel = linked(self.head.load(Ordering::Relaxed));
        {
            let shield = self.hazards.shield();
            // SAFETY: `&mut self`; the sentinel is unreachable once we are gone.
            unsafe { shield.retire(sentinel, &self.arena) };
        }
        self.hazards.flush(&self.arena);

        debug!(
            domain = %self.hazards.domain(),
            drained,
            stats = ?self.arena.stats(),
            "dropped queue"
        );
    }
}

impl<T, H> fmt::Debug for LockFreeQueue<T, H>
where
    T: Clone + Default,
    H: HazardContext,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockFreeQueue")
            .field("domain", &self.domain())
            .field("head", &self.head.load(Ordering::Relaxed))
            .field("tail", &self.tail.load(Ordering::Relaxed))
            .field("arena", &self.arena.stats())
            .finish()
    }
}

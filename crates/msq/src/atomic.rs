//! Double-width atomic over `TaggedPtr`.
//!
//! The pair is packed into a `u128` and stored in a `portable_atomic::AtomicU128`,
//! which uses the native 16-byte CAS (`cmpxchg16b`, `casp`) where the CPU has one
//! and falls back to a lock-based implementation elsewhere. Either way the node
//! and its tag are observed and exchanged together; callers never touch the two
//! halves separately.

use std::fmt;
use std::sync::atomic::Ordering;

use portable_atomic::AtomicU128;

use crate::tagged::TaggedPtr;

/// Atomic `TaggedPtr` slot.
#[repr(transparent)]
pub struct AtomicTagged {
    raw: AtomicU128,
}

impl AtomicTagged {
    #[must_use]
    pub fn new(value: TaggedPtr) -> Self {
        Self {
            raw: AtomicU128::new(value.pack()),
        }
    }

    #[must_use]
    pub fn null() -> Self {
        Self::new(TaggedPtr::NULL)
    }

    /// Whether this target performs the 16-byte operations without a lock.
    #[must_use]
    pub fn is_lock_free() -> bool {
        AtomicU128::is_lock_free()
    }

    #[inline]
    pub fn load(&self, order: Ordering) -> TaggedPtr {
        TaggedPtr::unpack(self.raw.load(order))
    }

    /// Plain store. Only used before a slot is published or while the owner
    /// has exclusive access.
    #[inline]
    pub fn store(&self, value: TaggedPtr, order: Ordering) {
        self.raw.store(value.pack(), order);
    }

    /// Replace `current` with `new` if the slot still holds exactly `current`
    /// (node and tag). Returns the previous value on success and the observed
    /// value on failure.
    #[inline]
    pub fn compare_exchange(
        &self,
        current: TaggedPtr,
        new: TaggedPtr,
        success: Ordering,
        failure: Ordering,
    ) -> Result<TaggedPtr, TaggedPtr> {
        self.raw
            .compare_exchange(current.pack(), new.pack(), success, failure)
            .map(TaggedPtr::unpack)
            .map_err(TaggedPtr::unpack)
    }
}

impl Default for AtomicTagged {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Debug for AtomicTagged {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicTagged")
            .field(&self.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tagged::NodeId;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_load_store() {
        let slot = AtomicTagged::null();
        assert_eq!(slot.load(Ordering::Acquire), TaggedPtr::NULL);

        let value = TaggedPtr::new(Some(NodeId::new(12)), 3);
        slot.store(value, Ordering::Release);
        assert_eq!(slot.load(Ordering::Acquire), value);
    }

    #[test]
    fn test_cas_rejects_stale_tag_for_same_node() {
        let id = Some(NodeId::new(1));
        let slot = AtomicTagged::new(TaggedPtr::new(id, 0));

        let stale = slot.load(Ordering::Acquire);
        // Another thread moves the slot away and back to the same node.
        let moved = stale.successor(Some(NodeId::new(2)));
        assert!(slot
            .compare_exchange(stale, moved, Ordering::Release, Ordering::Relaxed)
            .is_ok());
        let back = moved.successor(id);
        assert!(slot
            .compare_exchange(moved, back, Ordering::Release, Ordering::Relaxed)
            .is_ok());

        let observed = slot
            .compare_exchange(stale, stale.successor(None), Ordering::Release, Ordering::Relaxed)
            .unwrap_err();
        assert_eq!(observed, back);
        assert_eq!(observed.node(), stale.node());
        assert_eq!(observed.tag(), 2);
    }

    #[test]
    fn test_concurrent_cas_counts_every_success() {
        const THREADS: u64 = 4;
        const PER_THREAD: u64 = 1_000;

        let slot = Arc::new(AtomicTagged::null());
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let slot = Arc::clone(&slot);
                thread::spawn(move || {
                    let mut wins = 0;
                    while wins < PER_THREAD {
                        let cur = slot.load(Ordering::Acquire);
                        let next = cur.successor(Some(NodeId::new(t as u32)));
                        if slot
                            .compare_exchange(cur, next, Ordering::AcqRel, Ordering::Relaxed)
                            .is_ok()
                        {
                            wins += 1;
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        // Every successful CAS advanced the tag by exactly one; no torn writes.
        assert_eq!(slot.load(Ordering::Acquire).tag(), THREADS * PER_THREAD);
    }
}

//! Hazard-pointer reclamation.
//!
//! A thread that wants to read a node publishes the node's id in a hazard
//! slot, then re-checks that the node is still reachable. A node that has been
//! unlinked is *retired*; it is handed back to its `Reclaim` target only once a
//! scan finds no published hazard on it.
//!
//! `HazardContext` is the seam the queue is generic over. `HazardDomain` is the
//! production implementation; `instrumented::RecordingContext` records every
//! step for the property checkers.

use std::cell::UnsafeCell;
use std::collections::HashSet;
use std::fmt;
use std::mem;
use std::ptr;
use std::sync::atomic::{self, AtomicBool, AtomicPtr, AtomicU64, AtomicUsize, Ordering};

use tracing::{debug, trace};

use crate::arena::Reclaim;
use crate::config::{ConfigError, HazardConfig};
use crate::tagged::NodeId;

/// Identity of a reclamation domain. Queues in different domains never share
/// hazard records or retire lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DomainId(pub u32);

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "domain-{}", self.0)
    }
}

/// A source of hazard shields and the owner of retired nodes.
pub trait HazardContext: Send + Sync {
    type Shield<'a>: Shield
    where
        Self: 'a;

    fn domain(&self) -> DomainId;

    /// Handle for one operation. Hazards published through it are visible
    /// to every scan in this context until cleared.
    fn shield(&self) -> Self::Shield<'_>;

    /// Reclaim every retired node. Exclusive access means no hazard is live.
    fn flush(&mut self, reclaim: &dyn Reclaim);
}

/// Per-operation hazard handle.
pub trait Shield {
    /// Publish `node` in `slot`. On return the hazard is visible to any scan
    /// that starts afterwards.
    fn publish(&self, slot: usize, node: NodeId);

    fn clear(&self, slot: usize);

    /// Hand `node` over for reclamation.
    ///
    /// # Safety
    ///
    /// `node` must be unreachable from the structure, must be retired only
    /// once per allocation, and `reclaim` must be the arena that owns it.
    unsafe fn retire(&self, node: NodeId, reclaim: &dyn Reclaim);

    /// Publish `node` in `slot` until the returned guard drops.
    fn protect(&self, slot: usize, node: NodeId) -> HazardGuard<'_, Self> {
        self.publish(slot, node);
        HazardGuard { shield: self, slot }
    }
}

/// Clears its hazard slot when dropped.
#[must_use = "the hazard is withdrawn as soon as the guard is dropped"]
pub struct HazardGuard<'s, S: Shield + ?Sized> {
    shield: &'s S,
    slot: usize,
}

impl<S: Shield + ?Sized> HazardGuard<'_, S> {
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl<S: Shield + ?Sized> Drop for HazardGuard<'_, S> {
    fn drop(&mut self) {
        self.shield.clear(self.slot);
    }
}

/// Empty hazard slot.
const VACANT: u64 = u64::MAX;

struct HazardRecord {
    slots: Box<[AtomicU64]>,
    active: AtomicBool,
    /// Only touched by the thread that holds `active`, or under `&mut` domain
    retired: UnsafeCell<Vec<NodeId>>,
    /// Fixed before the record is published
    next: *mut HazardRecord,
}

// SAFETY: `slots` and `active` are atomics; `retired` is only accessed by the
// thread that claimed the record (or with exclusive access to the domain),
// and the claim is an Acquire CAS paired with a Release store on release.
unsafe impl Sync for HazardRecord {}

impl HazardRecord {
    fn new(slots: usize) -> Self {
        Self {
            slots: (0..slots).map(|_| AtomicU64::new(VACANT)).collect(),
            active: AtomicBool::new(true),
            retired: UnsafeCell::new(Vec::new()),
            next: ptr::null_mut(),
        }
    }
}

/// Lock-free hazard-pointer domain.
///
/// Records are pushed onto a list and never removed until the domain drops.
/// Each shield claims an idle record for its lifetime; retired nodes stay in
/// the record's retire list and are scanned once it reaches
/// `HazardConfig::retire_threshold`.
pub struct HazardDomain {
    id: DomainId,
    config: HazardConfig,
    records: AtomicPtr<HazardRecord>,
    record_count: AtomicUsize,
    pending: AtomicUsize,
}

impl HazardDomain {
    #[must_use]
    pub fn new(id: DomainId) -> Self {
        Self {
            id,
            config: HazardConfig::default(),
            records: AtomicPtr::new(ptr::null_mut()),
            record_count: AtomicUsize::new(0),
            pending: AtomicUsize::new(0),
        }
    }

    pub fn with_config(id: DomainId, config: HazardConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            id,
            config,
            records: AtomicPtr::new(ptr::null_mut()),
            record_count: AtomicUsize::new(0),
            pending: AtomicUsize::new(0),
        })
    }

    pub fn config(&self) -> &HazardConfig {
        &self.config
    }

    /// Hazard records registered so far; roughly the peak number of
    /// concurrent operations.
    pub fn record_count(&self) -> usize {
        self.record_count.load(Ordering::Relaxed)
    }

    /// Retired nodes not yet reclaimed.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    fn iter_records(&self) -> impl Iterator<Item = &HazardRecord> {
        let mut cur = self.records.load(Ordering::Acquire);
        std::iter::from_fn(move || {
            // SAFETY: records are never freed while the domain is alive.
            let record = unsafe { cur.as_ref()? };
            cur = record.next;
            Some(record)
        })
    }

    fn claim(&self) -> &HazardRecord {
        for record in self.iter_records() {
            if !record.active.load(Ordering::Relaxed)
                && record
                    .active
                    .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                return record;
            }
        }
        self.register()
    }

    fn register(&self) -> &HazardRecord {
        let record = Box::into_raw(Box::new(HazardRecord::new(self.config.slots_per_record)));
        let mut head = self.records.load(Ordering::Relaxed);
        loop {
            // SAFETY: not yet published, we are the only owner.
            unsafe { (*record).next = head };
            match self
                .records
                .compare_exchange_weak(head, record, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => head = actual,
            }
        }

        let count = self.record_count.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(domain = %self.id, records = count, "registered hazard record");

        // SAFETY: published records live as long as the domain.
        unsafe { &*record }
    }

    /// Move the retire lists of idle records other than `own` into `retired`,
    /// so nodes left behind by finished shields are scanned too.
    fn adopt_orphans(&self, own: &HazardRecord, retired: &mut Vec<NodeId>) {
        for record in self.iter_records() {
            if ptr::eq(record, own)
                || record.active.load(Ordering::Relaxed)
                || record
                    .active
                    .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                    .is_err()
            {
                continue;
            }
            // SAFETY: claimed above; `own` is a different record.
            retired.append(unsafe { &mut *record.retired.get() });
            record.active.store(false, Ordering::Release);
        }
    }

    /// Reclaim the nodes in `retired` that no slot in the domain protects.
    fn scan(&self, retired: &mut Vec<NodeId>, reclaim: &dyn Reclaim) {
        atomic::fence(Ordering::SeqCst);

        let protected: HashSet<u64> = self
            .iter_records()
            .flat_map(|r| r.slots.iter())
            .map(|s| s.load(Ordering::Acquire))
            .filter(|&v| v != VACANT)
            .collect();

        let before = retired.len();
        let mut kept = Vec::with_capacity(before);
        for node in mem::take(retired) {
            if protected.contains(&u64::from(node.index())) {
                kept.push(node);
            } else {
                // SAFETY: retired, unlinked and unprotected after the fence.
                unsafe { reclaim.reclaim(node) };
            }
        }
        let freed = before - kept.len();
        *retired = kept;
        self.pending.fetch_sub(freed, Ordering::Relaxed);

        trace!(
            domain = %self.id,
            hazards = protected.len(),
            reclaimed = freed,
            kept = retired.len(),
            "hazard scan"
        );
    }
}

impl HazardContext for HazardDomain {
    type Shield<'a> = DomainShield<'a>;

    fn domain(&self) -> DomainId {
        self.id
    }

    fn shield(&self) -> DomainShield<'_> {
        DomainShield {
            domain: self,
            record: self.claim(),
        }
    }

    fn flush(&mut self, reclaim: &dyn Reclaim) {
        let mut freed = 0;
        for record in self.iter_records() {
            debug_assert!(record
                .slots
                .iter()
                .all(|s| s.load(Ordering::Relaxed) == VACANT));
            // SAFETY: `&mut self` rules out live shields.
            let retired = unsafe { &mut *record.retired.get() };
            for node in retired.drain(..) {
                // SAFETY: no operation is in flight, so nothing is protected.
                unsafe { reclaim.reclaim(node) };
                freed += 1;
            }
        }
        *self.pending.get_mut() -= freed;
        debug!(domain = %self.id, reclaimed = freed, "flushed hazard domain");
    }
}

impl Drop for HazardDomain {
    fn drop(&mut self) {
        let mut cur = *self.records.get_mut();
        while !cur.is_null() {
            // SAFETY: every record was created by `register` via Box.
            let record = unsafe { Box::from_raw(cur) };
            cur = record.next;
        }
    }
}

impl fmt::Debug for HazardDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HazardDomain")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("records", &self.record_count())
            .field("pending", &self.pending())
            .finish()
    }
}

/// Shield backed by a claimed `HazardDomain` record.
pub struct DomainShield<'d> {
    domain: &'d HazardDomain,
    record: &'d HazardRecord,
}

impl Shield for DomainShield<'_> {
    fn publish(&self, slot: usize, node: NodeId) {
        self.record.slots[slot].store(u64::from(node.index()), Ordering::Release);
        // Orders the hazard before the caller's validating load.
        atomic::fence(Ordering::SeqCst);
    }

    fn clear(&self, slot: usize) {
        self.record.slots[slot].store(VACANT, Ordering::Release);
    }

    unsafe fn retire(&self, node: NodeId, reclaim: &dyn Reclaim) {
        // SAFETY: this shield holds the record's claim.
        let retired = &mut *self.record.retired.get();
        retired.push(node);
        self.domain.pending.fetch_add(1, Ordering::Relaxed);
        if retired.len() >= self.domain.config.retire_threshold {
            self.domain.adopt_orphans(self.record, retired);
            self.domain.scan(retired, reclaim);
        }
    }
}

impl Drop for DomainShield<'_> {
    fn drop(&mut self) {
        for slot in self.record.slots.iter() {
            slot.store(VACANT, Ordering::Release);
        }
        self.record.active.store(false, Ordering::Release);
    }
}

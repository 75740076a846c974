//! A `u64` queue that records its history for `QueuePropertyChecker`.

use std::sync::{Mutex, MutexGuard};

use msq_core::{QueueHistory, QueueProperties};

use crate::hazard::{HazardContext, HazardDomain};
use crate::queue::LockFreeQueue;

#[derive(Debug, Default)]
struct Tracker {
    enqueued: Vec<u64>,
    dequeued: Vec<u64>,
    history: QueueHistory,
    step: u64,
}

/// `LockFreeQueue<u64>` plus an operation log.
///
/// Operations are logged after they complete. Under real concurrency the log
/// is in completion order, which the FIFO replay may reject; the multiset
/// properties hold either way.
pub struct TrackedQueue<H: HazardContext = HazardDomain> {
    queue: LockFreeQueue<u64, H>,
    tracker: Mutex<Tracker>,
}

impl TrackedQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::with_queue(LockFreeQueue::new())
    }
}

impl Default for TrackedQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: HazardContext> TrackedQueue<H> {
    pub fn with_queue(queue: LockFreeQueue<u64, H>) -> Self {
        Self {
            queue,
            tracker: Mutex::new(Tracker::default()),
        }
    }

    pub fn queue(&self) -> &LockFreeQueue<u64, H> {
        &self.queue
    }

    fn tracker(&self) -> MutexGuard<'_, Tracker> {
        // A panicking test thread must not hide the history from the checker.
        self.tracker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn enqueue(&self, thread_id: u64, value: u64) {
        self.queue.enqueue(value);
        let mut t = self.tracker();
        t.step += 1;
        let step = t.step;
        t.enqueued.push(value);
        t.history.record_enqueue(thread_id, value, step);
    }

    pub fn dequeue(&self, thread_id: u64) -> Option<u64> {
        let result = self.queue.dequeue();
        let mut t = self.tracker();
        t.step += 1;
        let step = t.step;
        if let Some(value) = result {
            t.dequeued.push(value);
        }
        t.history.record_dequeue(thread_id, result, step);
        result
    }

    /// Operations recorded so far.
    pub fn steps(&self) -> u64 {
        self.tracker().step
    }
}

impl<H: HazardContext> QueueProperties for TrackedQueue<H> {
    fn enqueued_elements(&self) -> Vec<u64> {
        self.tracker().enqueued.clone()
    }

    fn dequeued_elements(&self) -> Vec<u64> {
        self.tracker().dequeued.clone()
    }

    fn current_contents(&self) -> Vec<u64> {
        self.queue.snapshot()
    }

    fn history(&self) -> QueueHistory {
        self.tracker().history.clone()
    }
}

//! Reclamation tests: drain on drop, protocol checks under contention,
//! dequeues interrupted inside the protect window and bounded retire backlog
//! in the lock-free hazard domain.
//!
//! Set `MSQ_STRESS_MS` to lengthen the timed run.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use msq::{
    DomainId, HazardConfig, HazardDomain, LockFreeQueue, QueueConfig, RecordingContext,
};
use msq_core::{PropertyChecker, ReclamationPropertyChecker};

/// Hazard slot the engine uses for the node behind `head`.
const SLOT_NEXT: usize = 1;

fn stress_duration() -> Duration {
    let ms = std::env::var("MSQ_STRESS_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(200);
    Duration::from_millis(ms)
}

/// Clones of a payload whose slot had already been reset by reclamation.
static RECLAIMED_READS: AtomicUsize = AtomicUsize::new(0);

/// `None` only in sentinels and reclaimed slots, which a dequeue must never
/// copy out.
#[derive(Debug, Default, PartialEq)]
struct Payload(Option<u64>);

impl Clone for Payload {
    fn clone(&self) -> Self {
        if self.0.is_none() {
            RECLAIMED_READS.fetch_add(1, Ordering::SeqCst);
        }
        Payload(self.0)
    }
}

#[test]
fn test_drop_retires_every_node_once() {
    for k in [0u64, 1, 7, 100] {
        let context = RecordingContext::new(DomainId(4));
        let recorder = context.recorder();
        {
            let queue = LockFreeQueue::with_hazards(context);
            for i in 0..k {
                queue.enqueue(i);
            }
        }
        assert_eq!(recorder.retired(), k + 1, "k = {}", k);
        assert_eq!(recorder.reclaimed(), k + 1, "k = {}", k);
        assert_eq!(recorder.pending(), 0);

        let checker = ReclamationPropertyChecker::new(recorder.as_ref());
        assert!(checker.all_hold(), "k = {}\n{}", k, checker.report());
    }
}

#[test]
fn test_partial_drain_then_drop() {
    let context = RecordingContext::new(DomainId(0));
    let recorder = context.recorder();
    {
        let queue = LockFreeQueue::with_hazards(context);
        for i in 0..10u64 {
            queue.enqueue(i);
        }
        for i in 0..4 {
            assert_eq!(queue.dequeue(), Some(i));
        }
        assert_eq!(recorder.retired(), 4);
    }
    assert_eq!(recorder.retired(), 11);
    assert_eq!(recorder.reclaimed(), 11);
}

#[test]
fn test_protocol_holds_under_contention() {
    const THREADS: u64 = 4;

    let context = RecordingContext::new(DomainId(1));
    let recorder = context.recorder();
    let enqueued = {
        let queue = LockFreeQueue::with_hazards(context);
        let stop = AtomicBool::new(false);
        let enqueued: u64 = thread::scope(|s| {
            let workers: Vec<_> = (0..THREADS)
                .map(|t| {
                    let queue = &queue;
                    let stop = &stop;
                    s.spawn(move || {
                        let mut i = 0u64;
                        while !stop.load(Ordering::Relaxed) {
                            queue.enqueue(t << 32 | i);
                            if i % 2 == 1 {
                                queue.dequeue();
                                queue.dequeue();
                            }
                            i += 1;
                        }
                        i
                    })
                })
                .collect();
            thread::sleep(stress_duration());
            stop.store(true, Ordering::Relaxed);
            workers.into_iter().map(|w| w.join().unwrap()).sum()
        });
        assert!(recorder.max_live_shields() >= 1);
        enqueued
    };

    // Every node allocated, sentinel included, was retired once and recycled.
    assert_eq!(recorder.retired(), enqueued + 1);
    assert_eq!(recorder.reclaimed(), recorder.retired());

    let checker = ReclamationPropertyChecker::new(recorder.as_ref());
    assert!(checker.all_hold(), "{}", checker.report());
}

#[test]
fn test_dequeue_revalidates_after_protecting_next() {
    let context = RecordingContext::new(DomainId(5));
    let recorder = context.recorder();
    let queue = Arc::new(LockFreeQueue::with_hazards(context));
    for v in 1..=3 {
        queue.enqueue(Payload(Some(v)));
    }

    // Between reading `head.next` and protecting it, another consumer takes
    // two elements. The node that held 1 becomes a sentinel, is unlinked in
    // turn and is reclaimed while the first dequeue still holds its id.
    let taken = Arc::new(Mutex::new(Vec::new()));
    {
        let queue = Arc::clone(&queue);
        let taken = Arc::clone(&taken);
        recorder.interrupt_before_publish(SLOT_NEXT, move || {
            let mut taken = taken.lock().unwrap();
            taken.push(queue.dequeue());
            taken.push(queue.dequeue());
        });
    }

    assert_eq!(queue.dequeue(), Some(Payload(Some(3))));
    assert_eq!(
        *taken.lock().unwrap(),
        vec![Some(Payload(Some(1))), Some(Payload(Some(2)))]
    );
    assert_eq!(RECLAIMED_READS.load(Ordering::SeqCst), 0);
    assert!(recorder.reclaimed() >= 1);
    assert_eq!(queue.dequeue(), None);

    drop(queue);
    assert_eq!(recorder.retired(), 4);
    let checker = ReclamationPropertyChecker::new(recorder.as_ref());
    assert!(checker.all_hold(), "{}", checker.report());
}

#[test]
fn test_empty_dequeue_interrupted_before_protecting_head() {
    let context = RecordingContext::new(DomainId(6));
    let recorder = context.recorder();
    let queue = Arc::new(LockFreeQueue::<u64, _>::with_hazards(context));

    // The sentinel the dequeue is about to protect is unlinked and reclaimed
    // first; the dequeue must notice `head` moved and report the new state.
    let taken = Arc::new(Mutex::new(None));
    {
        let queue = Arc::clone(&queue);
        let taken = Arc::clone(&taken);
        recorder.interrupt_before_publish(0, move || {
            queue.enqueue(9);
            *taken.lock().unwrap() = queue.dequeue();
        });
    }

    assert_eq!(queue.dequeue(), None);
    assert_eq!(*taken.lock().unwrap(), Some(9));
    assert_eq!(recorder.reclaimed(), 1);

    drop(queue);
    assert_eq!(recorder.retired(), 2);
    let checker = ReclamationPropertyChecker::new(recorder.as_ref());
    assert!(checker.all_hold(), "{}", checker.report());
}

#[test]
fn test_hazard_domain_backlog_stays_bounded() {
    const THREADS: usize = 4;
    let threshold = 16;

    let queue = LockFreeQueue::<u64>::with_config(QueueConfig {
        domain: DomainId(3),
        hazard: HazardConfig {
            retire_threshold: threshold,
            ..HazardConfig::default()
        },
        backoff: false,
    })
    .unwrap();
    let stop = AtomicBool::new(false);

    thread::scope(|s| {
        for t in 0..THREADS as u64 {
            let queue = &queue;
            let stop = &stop;
            s.spawn(move || {
                let mut i = 0;
                while !stop.load(Ordering::Relaxed) && i < 20_000 {
                    queue.enqueue(t << 32 | i);
                    queue.dequeue();
                    i += 1;
                }
            });
        }
        thread::sleep(std::time::Duration::from_millis(100));
        stop.store(true, Ordering::Relaxed);
    });

    let domain: &HazardDomain = queue.hazard_domain();
    let records = domain.record_count();
    assert!(records >= 1);
    // A record scans once it holds `threshold` nodes and keeps only those
    // named by some hazard slot in the domain.
    let bound = records * (threshold + 2 * records);
    assert!(domain.pending() <= bound, "pending {} > {}", domain.pending(), bound);

    let stats = queue.arena_stats();
    assert!(
        stats.slots <= (bound + THREADS * 3 + 1) as u64,
        "arena grew to {} slots",
        stats.slots
    );
}

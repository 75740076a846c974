//! DST integration tests.
//!
//! Runs `LockFreeQueue` through the fault-injecting runner and the simulated
//! thread harness, then checks the queue properties from msq-core.
//!
//! Reproduce a failure with `DST_SEED=<seed>`; widen the search with
//! `DST_ITERATIONS=<n>`.

use msq::{DomainId, HazardConfig, LockFreeQueue, QueueConfig, RecordingContext, TrackedQueue};
use msq_core::{PropertyChecker, QueuePropertyChecker, ReclamationPropertyChecker};
use msq_dst::{
    get_or_generate_seed, iterations_or, run_dst_scenario, DeterministicRng, DstHarness, DstOp,
    DstRunner, DstTestableQueue, FaultConfig, HarnessConfig,
};

struct DstQueue(LockFreeQueue<u64>);

impl DstTestableQueue for DstQueue {
    fn new() -> Self {
        let config = QueueConfig {
            hazard: HazardConfig::eager(),
            ..QueueConfig::default()
        };
        match LockFreeQueue::with_config(config) {
            Ok(queue) => Self(queue),
            Err(e) => panic!("eager config rejected: {}", e),
        }
    }

    fn enqueue(&self, value: u64) {
        self.0.enqueue(value);
    }

    fn dequeue(&self) -> Option<u64> {
        self.0.dequeue()
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn contents(&self) -> Vec<u64> {
        self.0.snapshot()
    }
}

fn random_ops(seed: u64, len: usize) -> Vec<DstOp> {
    let mut rng = DeterministicRng::new(seed);
    let mut next = 0u64;
    (0..len)
        .map(|_| {
            if rng.gen_bool(0.6) {
                next += 1;
                DstOp::Enqueue(next)
            } else {
                DstOp::Dequeue
            }
        })
        .collect()
}

#[test]
fn test_queue_with_dst_runner() {
    let seed = get_or_generate_seed();
    let mut runner: DstRunner<DstQueue> =
        DstRunner::with_fault_config(seed, FaultConfig::aggressive());

    for op in random_ops(seed, 500) {
        // Faults are part of the run.
        let _ = runner.apply(op);
    }

    let stats = runner.stats();
    println!("{}", stats.format());
    assert!(stats.operations_count > 0);

    let failures: Vec<_> = runner.check().into_iter().filter(|p| !p.holds).collect();
    assert!(failures.is_empty(), "DST_SEED={} {:?}", seed, failures);
}

#[test]
fn test_many_seeds() {
    let base = get_or_generate_seed();
    for i in 0..iterations_or(20) {
        let seed = base.wrapping_add(i).max(1);
        let result = run_dst_scenario::<DstQueue>(seed, &random_ops(seed, 200));
        assert!(result.passed, "{}", result.format());
    }
}

#[test]
fn test_scenario_is_reproducible() {
    let ops = random_ops(7, 300);
    let a = run_dst_scenario::<DstQueue>(12345, &ops);
    let b = run_dst_scenario::<DstQueue>(12345, &ops);
    assert_eq!(a.stats, b.stats);
    assert_eq!(a.fault_errors, b.fault_errors);
    assert!(a.passed, "{}", a.format());
}

#[test]
fn test_simulated_threads_preserve_fifo() {
    let seed = get_or_generate_seed();
    let config = HarnessConfig {
        threads_count: 4,
        operations_per_thread: 200,
        yield_probability: 0.4,
        invariant_check_interval: 50,
        ..HarnessConfig::default()
    };
    let mut harness = DstHarness::new(seed.max(1), config);
    let queue = TrackedQueue::new();

    let result = harness.run_concurrent(
        |env, thread, step| {
            if env.rng().gen_bool(0.55) {
                Some(Some(((thread as u64) << 32) | step))
            } else {
                Some(None)
            }
        },
        |_env, thread, op: Option<u64>| {
            match op {
                Some(value) => queue.enqueue(thread as u64, value),
                None => {
                    queue.dequeue(thread as u64);
                }
            }
            Ok(())
        },
        || {
            let checker = QueuePropertyChecker::new(&queue);
            match checker.failures().into_iter().next() {
                None => Ok(()),
                Some(failure) => Err(failure.to_string()),
            }
        },
    );

    println!("{}", result.format());
    assert!(result.all_invariants_held, "{}", result.format());
    assert_eq!(result.operations_count, 800);
}

#[test]
fn test_simulated_threads_reclamation_protocol() {
    let seed = get_or_generate_seed();
    let context = RecordingContext::new(DomainId(8));
    let recorder = context.recorder();
    let queue = LockFreeQueue::with_hazards(context);

    let mut harness = DstHarness::new(seed.max(1), HarnessConfig::quick());
    let result = harness.run_concurrent(
        |env, _thread, step| Some((env.rng().gen_bool(0.5), step)),
        |_env, _thread, (enqueue, step): (bool, u64)| {
            if enqueue {
                queue.enqueue(step);
            } else {
                queue.dequeue();
            }
            Ok(())
        },
        || {
            let checker = ReclamationPropertyChecker::new(recorder.as_ref());
            match checker.failures().into_iter().next() {
                None => Ok(()),
                Some(failure) => Err(failure.to_string()),
            }
        },
    );
    assert!(result.all_invariants_held, "{}", result.format());

    drop(queue);
    let checker = ReclamationPropertyChecker::new(recorder.as_ref());
    assert!(checker.all_hold(), "{}", checker.report());
    assert_eq!(recorder.retired(), recorder.reclaimed());
}

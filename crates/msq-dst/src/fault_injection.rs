//! Fault injection at queue operation boundaries.
//!
//! Faults are decided by the runner before and after each call into the
//! queue; the queue itself is never instrumented. A fault can:
//!
//! - refuse an enqueue before it starts (allocation failure)
//! - abandon a call, either before it runs or after it completed but before
//!   the caller saw the result (thread crash)
//! - advance simulated time (delay)
//!
//! Every completed operation is recorded in linearization order, so the run
//! can be handed straight to `QueuePropertyChecker`.

use msq_core::{
    PropertyChecker, PropertyResult, QueueHistory, QueueProperties, QueuePropertyChecker,
};

use crate::env::DstEnv;
use crate::fault::FaultConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    BeforeOperation,
    AfterOperation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultType {
    /// The node allocation is refused; the enqueue never starts
    AllocationFailure,
    /// The calling thread dies at the fault point
    ThreadCrash,
    /// The caller stalls for a while
    Delay,
}

/// Queue surface the runner drives. Implementations know nothing about DST.
pub trait DstTestableQueue {
    fn new() -> Self;
    fn enqueue(&self, value: u64);
    fn dequeue(&self) -> Option<u64>;
    fn is_empty(&self) -> bool;
    /// Queued elements, head to tail.
    fn contents(&self) -> Vec<u64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DstOp {
    Enqueue(u64),
    Dequeue,
}

/// Drives a `DstTestableQueue` and injects faults between operations.
pub struct DstRunner<Q> {
    queue: Q,
    env: DstEnv,
    enqueued: Vec<u64>,
    dequeued: Vec<u64>,
    history: QueueHistory,
    step: u64,
    operations_count: u64,
    faults_injected: u64,
    abandoned_operations: u64,
}

impl<Q: DstTestableQueue> DstRunner<Q> {
    pub fn new(seed: u64) -> Self {
        Self::with_fault_config(seed, FaultConfig::default())
    }

    pub fn with_fault_config(seed: u64, config: FaultConfig) -> Self {
        Self {
            queue: Q::new(),
            env: DstEnv::new(seed).with_fault_config(config),
            enqueued: Vec::new(),
            dequeued: Vec::new(),
            history: QueueHistory::new(),
            step: 0,
            operations_count: 0,
            faults_injected: 0,
            abandoned_operations: 0,
        }
    }

    pub fn seed(&self) -> u64 {
        self.env.seed()
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    fn next_step(&mut self) -> u64 {
        self.step += 1;
        self.step
    }

    fn maybe_inject_fault(&mut self, point: FaultPoint) -> Option<FaultType> {
        if !self.env.fault().should_fail() {
            return None;
        }
        self.faults_injected += 1;
        let fault = match (point, self.env.rng().gen_range(0..3)) {
            (FaultPoint::BeforeOperation, 0) => FaultType::AllocationFailure,
            (_, 1) => FaultType::ThreadCrash,
            _ => FaultType::Delay,
        };
        if fault == FaultType::Delay {
            let ns = self.env.rng().gen_range(1..=10_000);
            self.env.clock().advance_ns(ns);
        }
        Some(fault)
    }

    pub fn enqueue(&mut self, value: u64) -> Result<(), FaultType> {
        match self.maybe_inject_fault(FaultPoint::BeforeOperation) {
            Some(fault @ (FaultType::AllocationFailure | FaultType::ThreadCrash)) => {
                self.abandoned_operations += 1;
                return Err(fault);
            }
            _ => {}
        }

        self.queue.enqueue(value);
        self.operations_count += 1;
        // The element is in the queue whether or not the caller survives.
        let step = self.next_step();
        self.enqueued.push(value);
        self.history.record_enqueue(0, value, step);

        if let Some(FaultType::ThreadCrash) = self.maybe_inject_fault(FaultPoint::AfterOperation) {
            self.abandoned_operations += 1;
            return Err(FaultType::ThreadCrash);
        }
        Ok(())
    }

    pub fn dequeue(&mut self) -> Result<Option<u64>, FaultType> {
        if let Some(FaultType::ThreadCrash) = self.maybe_inject_fault(FaultPoint::BeforeOperation)
        {
            self.abandoned_operations += 1;
            return Err(FaultType::ThreadCrash);
        }

        let result = self.queue.dequeue();
        self.operations_count += 1;
        let step = self.next_step();
        if let Some(value) = result {
            self.dequeued.push(value);
        }
        self.history.record_dequeue(0, result, step);

        if let Some(FaultType::ThreadCrash) = self.maybe_inject_fault(FaultPoint::AfterOperation) {
            // Dequeued, then lost with the caller. Still accounted for.
            self.abandoned_operations += 1;
            return Err(FaultType::ThreadCrash);
        }
        Ok(result)
    }

    pub fn apply(&mut self, op: DstOp) -> Result<(), FaultType> {
        match op {
            DstOp::Enqueue(v) => self.enqueue(v),
            DstOp::Dequeue => self.dequeue().map(|_| ()),
        }
    }

    /// Run every queue property over what happened so far.
    pub fn check(&self) -> Vec<PropertyResult> {
        QueuePropertyChecker::new(self)
            .with_seed(self.seed().max(1))
            .check_all()
    }

    pub fn stats(&self) -> DstStats {
        DstStats {
            seed: self.seed(),
            operations_count: self.operations_count,
            faults_injected: self.faults_injected,
            abandoned_operations: self.abandoned_operations,
            simulated_ns: self.env.now_ns(),
        }
    }
}

impl<Q: DstTestableQueue> QueueProperties for DstRunner<Q> {
    fn enqueued_elements(&self) -> Vec<u64> {
        self.enqueued.clone()
    }

    fn dequeued_elements(&self) -> Vec<u64> {
        self.dequeued.clone()
    }

    fn current_contents(&self) -> Vec<u64> {
        self.queue.contents()
    }

    fn history(&self) -> QueueHistory {
        self.history.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DstStats {
    pub seed: u64,
    pub operations_count: u64,
    pub faults_injected: u64,
    pub abandoned_operations: u64,
    pub simulated_ns: u64,
}

impl DstStats {
    pub fn format(&self) -> String {
        format!(
            "DST_SEED={} ops={} faults={} abandoned={} simulated_ns={}",
            self.seed,
            self.operations_count,
            self.faults_injected,
            self.abandoned_operations,
            self.simulated_ns
        )
    }
}

#[derive(Debug)]
pub struct DstResult {
    pub passed: bool,
    pub properties: Vec<PropertyResult>,
    pub stats: DstStats,
    pub fault_errors: Vec<FaultType>,
}

impl DstResult {
    pub fn violations(&self) -> impl Iterator<Item = &PropertyResult> {
        self.properties.iter().filter(|p| !p.holds)
    }

    pub fn format(&self) -> String {
        let status = if self.passed { "PASS" } else { "FAIL" };
        let mut out = format!("[{}] {}", status, self.stats.format());
        for violation in self.violations() {
            out.push_str(&format!("\n  VIOLATION: {}", violation));
        }
        out
    }
}

/// Replay `operations` against a fresh `Q` under seeded faults, then check
/// every queue property.
pub fn run_dst_scenario<Q: DstTestableQueue>(seed: u64, operations: &[DstOp]) -> DstResult {
    let mut runner: DstRunner<Q> = DstRunner::new(seed);
    let fault_errors = operations
        .iter()
        .filter_map(|&op| runner.apply(op).err())
        .collect();

    let properties = runner.check();
    DstResult {
        passed: properties.iter().all(|p| p.holds),
        properties,
        stats: runner.stats(),
        fault_errors,
    }
}

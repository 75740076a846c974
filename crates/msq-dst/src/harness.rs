//! Simulated multi-threaded runs.
//!
//! Each simulated thread owns a sequence of operations; the seeded scheduler
//! decides after every operation whether to switch. Operations execute whole,
//! so the harness explores interleavings at operation granularity and checks
//! invariants at a fixed interval and once more at the end.

use crate::env::DstEnv;
use crate::fault::FaultConfig;
use crate::scheduler::ScheduleDecision;

/// Shape of a simulated run.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Simulated threads interleaved by the scheduler
    pub threads_count: usize,
    /// Operations each simulated thread performs
    pub operations_per_thread: u64,
    /// Chance of a context switch at each yield point
    pub yield_probability: f64,
    /// Faults and delays the environment injects
    pub fault_config: FaultConfig,
    /// Check invariants every N operations; 0 only checks at the end
    pub invariant_check_interval: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            threads_count: 4,
            operations_per_thread: 100,
            yield_probability: 0.2,
            fault_config: FaultConfig::default(),
            invariant_check_interval: 10,
        }
    }
}

impl HarnessConfig {
    /// Two threads, no faults; fast enough for every test run.
    pub fn quick() -> Self {
        Self {
            threads_count: 2,
            operations_per_thread: 50,
            yield_probability: 0.1,
            fault_config: FaultConfig::none(),
            invariant_check_interval: 10,
        }
    }

    /// Eight threads with aggressive faults and frequent switches.
    pub fn stress() -> Self {
        Self {
            threads_count: 8,
            operations_per_thread: 1_000,
            yield_probability: 0.3,
            fault_config: FaultConfig::aggressive(),
            invariant_check_interval: 100,
        }
    }
}

/// Outcome of a harness run.
#[derive(Debug, Clone)]
pub struct HarnessResult {
    /// Seed to pass as `DST_SEED` to replay the run
    pub seed: u64,
    /// Operations executed before the run finished or stopped
    pub operations_count: u64,
    /// Scheduler decisions that changed the running thread
    pub context_switches_count: u64,
    /// Faults the environment injected
    pub faults_injected_count: u64,
    /// Invariant checks performed, including the final one
    pub invariant_checks_count: u64,
    /// Whether every operation and check succeeded
    pub all_invariants_held: bool,
    /// The message that stopped the run, if any
    pub first_violation: Option<String>,
}

impl HarnessResult {
    /// One-line summary, plus the violation when there is one.
    pub fn format(&self) -> String {
        let status = if self.all_invariants_held { "PASS" } else { "FAIL" };
        let mut out = format!(
            "[{}] DST_SEED={} ops={} switches={} faults={} checks={}",
            status,
            self.seed,
            self.operations_count,
            self.context_switches_count,
            self.faults_injected_count,
            self.invariant_checks_count
        );
        if let Some(violation) = &self.first_violation {
            out.push_str(&format!("\n  Violation: {}", violation));
        }
        out
    }
}

/// Deterministic driver for simulated threads.
pub struct DstHarness {
    env: DstEnv,
    config: HarnessConfig,
    operations_count: u64,
    context_switches_count: u64,
    invariant_checks_count: u64,
    violation: Option<String>,
}

impl DstHarness {
    pub fn new(seed: u64, config: HarnessConfig) -> Self {
        debug_assert!(seed != 0, "Seed should not be zero");
        debug_assert!(config.threads_count > 0, "Must have at least one thread");
        debug_assert!(
            config.threads_count <= 64,
            "Too many threads for DST: {}",
            config.threads_count
        );

        let env = DstEnv::new(seed)
            .with_fault_config(config.fault_config.clone())
            .with_scheduler(config.threads_count, config.yield_probability);
        Self {
            env,
            config,
            operations_count: 0,
            context_switches_count: 0,
            invariant_checks_count: 0,
            violation: None,
        }
    }

    pub fn seed(&self) -> u64 {
        self.env.seed()
    }

    /// The environment, for operations the generators do not cover.
    pub fn env(&mut self) -> &mut DstEnv {
        &mut self.env
    }

    /// Whether an operation or invariant check has failed.
    pub fn is_stopped(&self) -> bool {
        self.violation.is_some()
    }

    fn stop(&mut self, message: String) {
        self.violation.get_or_insert(message);
    }

    fn check_due(&self) -> bool {
        self.config.invariant_check_interval != 0
            && self.operations_count % self.config.invariant_check_interval == 0
    }

    fn current_thread(&mut self) -> usize {
        self.env.scheduler().map_or(0, |s| s.current_thread())
    }

    fn yield_point(&mut self) {
        let decision = self
            .env
            .scheduler()
            .map_or(ScheduleDecision::Continue, |s| s.decide());
        if let ScheduleDecision::Switch(_) = decision {
            self.context_switches_count += 1;
        }
    }

    /// Run `operations_per_thread` steps on a single logical thread.
    ///
    /// `generate` may return `None` to skip a step.
    pub fn run_single_threaded<T, G, X>(&mut self, mut generate: G, mut execute: X) -> HarnessResult
    where
        G: FnMut(&mut DstEnv, u64) -> Option<T>,
        X: FnMut(&mut DstEnv, T) -> Result<(), String>,
    {
        for step in 0..self.config.operations_per_thread {
            if let Some(op) = generate(&mut self.env, step) {
                if let Err(e) = execute(&mut self.env, op) {
                    self.stop(e);
                    break;
                }
                self.operations_count += 1;
            }
            self.env.maybe_delay();
        }
        self.result()
    }

    /// Interleave `threads_count` simulated threads under the scheduler.
    ///
    /// `generate(env, thread, step)` produces the thread's next operation and
    /// `execute(env, thread, op)` applies it. `check` runs every
    /// `invariant_check_interval` operations and after the last one.
    pub fn run_concurrent<T, G, X, C>(
        &mut self,
        mut generate: G,
        mut execute: X,
        mut check: C,
    ) -> HarnessResult
    where
        G: FnMut(&mut DstEnv, usize, u64) -> Option<T>,
        X: FnMut(&mut DstEnv, usize, T) -> Result<(), String>,
        C: FnMut() -> Result<(), String>,
    {
        let per_thread = self.config.operations_per_thread;
        let mut steps = vec![0u64; self.config.threads_count];

        while !self.is_stopped() {
            let thread = self.current_thread();
            if steps[thread] >= per_thread {
                if steps.iter().all(|&s| s >= per_thread) {
                    break;
                }
                if let Some(scheduler) = self.env.scheduler() {
                    scheduler.force_switch();
                }
                continue;
            }

            if let Some(op) = generate(&mut self.env, thread, steps[thread]) {
                if let Err(e) = execute(&mut self.env, thread, op) {
                    self.stop(format!("Thread {}: {}", thread, e));
                    break;
                }
                self.operations_count += 1;
                if self.check_due() {
                    self.invariant_checks_count += 1;
                    if let Err(e) = check() {
                        self.stop(e);
                        break;
                    }
                }
            }
            steps[thread] += 1;
            self.yield_point();
        }

        if !self.is_stopped() {
            self.invariant_checks_count += 1;
            if let Err(e) = check() {
                self.stop(e);
            }
        }
        self.result()
    }

    fn result(&self) -> HarnessResult {
        HarnessResult {
            seed: self.env.seed(),
            operations_count: self.operations_count,
            context_switches_count: self.context_switches_count,
            faults_injected_count: self.env.fault_stats().faults_count,
            invariant_checks_count: self.invariant_checks_count,
            all_invariants_held: self.violation.is_none(),
            first_violation: self.violation.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_threaded_runs_every_step() {
        let mut harness = DstHarness::new(12345, HarnessConfig::quick());
        let mut sum = 0u64;
        let result = harness.run_single_threaded(
            |_env, step| (step < 10).then_some(step),
            |_env, op| {
                sum += op;
                Ok(())
            },
        );
        assert!(result.all_invariants_held);
        assert_eq!(result.operations_count, 10);
        assert_eq!(sum, 45);
    }

    #[test]
    fn test_stops_on_first_violation() {
        let mut harness = DstHarness::new(12345, HarnessConfig::quick());
        let result = harness.run_single_threaded(
            |_env, step| Some(step),
            |_env, op| {
                if op == 5 {
                    Err("broke at 5".to_string())
                } else {
                    Ok(())
                }
            },
        );
        assert!(!result.all_invariants_held);
        assert_eq!(result.first_violation.as_deref(), Some("broke at 5"));
        assert_eq!(result.operations_count, 5);
        assert!(result.format().starts_with("[FAIL]"));
    }

    #[test]
    fn test_concurrent_runs_every_thread_to_completion() {
        let config = HarnessConfig {
            threads_count: 3,
            operations_per_thread: 20,
            yield_probability: 0.5,
            invariant_check_interval: 7,
            ..HarnessConfig::quick()
        };
        let mut harness = DstHarness::new(777, config);
        let mut per_thread = vec![0u64; 3];
        let mut checks = 0;

        let result = harness.run_concurrent(
            |_env, _thread, step| Some(step),
            |_env, thread, _op| {
                per_thread[thread] += 1;
                Ok(())
            },
            || {
                checks += 1;
                Ok(())
            },
        );

        assert!(result.all_invariants_held, "{}", result.format());
        assert_eq!(per_thread, vec![20, 20, 20]);
        assert_eq!(result.operations_count, 60);
        assert!(result.context_switches_count > 0);
        // 60 / 7 periodic checks plus the final one.
        assert_eq!(checks, 9);
        assert_eq!(result.invariant_checks_count, 9);
    }

    #[test]
    fn test_same_seed_same_interleaving() {
        let trace = |seed| {
            let mut harness = DstHarness::new(seed, HarnessConfig::quick());
            let mut order = Vec::new();
            harness.run_concurrent(
                |_env, thread, _step| Some(thread),
                |_env, thread, _op| {
                    order.push(thread);
                    Ok(())
                },
                || Ok(()),
            );
            order
        };
        assert_eq!(trace(31), trace(31));
    }

    #[test]
    fn test_stress_preset_completes_under_faults() {
        let config = HarnessConfig::stress();
        let expected = config.threads_count as u64 * config.operations_per_thread;
        let mut harness = DstHarness::new(4242, config);

        let result = harness.run_concurrent(
            |_env, _thread, step| Some(step),
            |_env, _thread, _op| Ok(()),
            || Ok(()),
        );

        assert!(result.all_invariants_held, "{}", result.format());
        assert_eq!(result.operations_count, expected);
    }
}

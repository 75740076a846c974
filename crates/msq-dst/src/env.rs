//! Everything a simulation may consult, derived from one seed.

use crate::clock::SimClock;
use crate::fault::{FaultConfig, FaultInjector};
use crate::random::DeterministicRng;
use crate::scheduler::Scheduler;

/// Upper bound for a single injected delay.
const MAX_DELAY_NS: u64 = 1_000_000;

/// Seeded environment: randomness, faults, time and an optional scheduler.
///
/// Each component draws from its own stream so that, for example, enabling
/// the scheduler does not shift which operations fault.
#[derive(Debug, Clone)]
pub struct DstEnv {
    seed: u64,
    rng: DeterministicRng,
    fault: FaultInjector,
    clock: SimClock,
    scheduler: Option<Scheduler>,
}

impl DstEnv {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: DeterministicRng::new(seed),
            fault: FaultInjector::new(
                DeterministicRng::new(seed.wrapping_add(1)),
                FaultConfig::default(),
            ),
            clock: SimClock::new(),
            scheduler: None,
        }
    }

    #[must_use]
    pub fn with_fault_config(mut self, config: FaultConfig) -> Self {
        self.fault = FaultInjector::new(DeterministicRng::new(self.seed.wrapping_add(1)), config);
        self
    }

    #[must_use]
    pub fn with_scheduler(mut self, threads_count: usize, yield_probability: f64) -> Self {
        self.scheduler = Some(Scheduler::new(
            DeterministicRng::new(self.seed.wrapping_add(2)),
            threads_count,
            yield_probability,
        ));
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn rng(&mut self) -> &mut DeterministicRng {
        &mut self.rng
    }

    pub fn fault(&mut self) -> &mut FaultInjector {
        &mut self.fault
    }

    pub fn fault_stats(&self) -> crate::fault::FaultStats {
        self.fault.stats()
    }

    pub fn now_ns(&self) -> u64 {
        self.clock.now_ns()
    }

    pub fn clock(&mut self) -> &mut SimClock {
        &mut self.clock
    }

    pub fn scheduler(&mut self) -> Option<&mut Scheduler> {
        self.scheduler.as_mut()
    }

    /// If a fault fires, advance the clock by a random delay. Returns the
    /// delay applied.
    pub fn maybe_delay(&mut self) -> Option<u64> {
        if !self.fault.should_fail() {
            return None;
        }
        let delay = self.rng.gen_range(1..=MAX_DELAY_NS);
        self.clock.advance_ns(delay);
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_environment() {
        let mut a = DstEnv::new(42).with_fault_config(FaultConfig::aggressive());
        let mut b = DstEnv::new(42).with_fault_config(FaultConfig::aggressive());
        for _ in 0..100 {
            assert_eq!(a.maybe_delay(), b.maybe_delay());
            assert_eq!(a.rng().gen::<u64>(), b.rng().gen::<u64>());
        }
        assert_eq!(a.clock().now_ns(), b.clock().now_ns());
    }

    #[test]
    fn test_no_faults_no_delay() {
        let mut env = DstEnv::new(1).with_fault_config(FaultConfig::none());
        assert!((0..100).all(|_| env.maybe_delay().is_none()));
        assert_eq!(env.clock().now_ns(), 0);
    }

    #[test]
    fn test_scheduler_is_optional() {
        let mut env = DstEnv::new(5);
        assert!(env.scheduler().is_none());
        let mut env = env.with_scheduler(3, 0.5);
        assert_eq!(env.scheduler().map(|s| s.threads_count()), Some(3));
    }
}

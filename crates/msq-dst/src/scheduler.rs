//! Deterministic choice of which simulated thread runs next.

use crate::random::DeterministicRng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleDecision {
    /// Keep running the current thread
    Continue,
    /// Switch to the given thread
    Switch(usize),
}

/// Picks simulated threads from a seeded stream.
#[derive(Debug, Clone)]
pub struct Scheduler {
    rng: DeterministicRng,
    threads_count: usize,
    yield_probability: f64,
    current: usize,
}

impl Scheduler {
    pub fn new(rng: DeterministicRng, threads_count: usize, yield_probability: f64) -> Self {
        assert!(threads_count > 0, "scheduler needs at least one thread");
        Self {
            rng,
            threads_count,
            yield_probability,
            current: 0,
        }
    }

    pub fn threads_count(&self) -> usize {
        self.threads_count
    }

    pub fn current_thread(&self) -> usize {
        self.current
    }

    /// At a yield point: maybe hand control to another thread.
    pub fn decide(&mut self) -> ScheduleDecision {
        if self.threads_count == 1 || !self.rng.gen_bool(self.yield_probability) {
            return ScheduleDecision::Continue;
        }
        self.switch()
    }

    /// Unconditionally move to a different thread.
    pub fn force_switch(&mut self) -> ScheduleDecision {
        if self.threads_count == 1 {
            return ScheduleDecision::Continue;
        }
        self.switch()
    }

    fn switch(&mut self) -> ScheduleDecision {
        // Skip over the current thread so a switch always changes it.
        let offset = self.rng.gen_range(1..self.threads_count);
        self.current = (self.current + offset) % self.threads_count;
        ScheduleDecision::Switch(self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_changes_thread() {
        let mut scheduler = Scheduler::new(DeterministicRng::new(3), 4, 1.0);
        let mut last = scheduler.current_thread();
        for _ in 0..100 {
            match scheduler.decide() {
                ScheduleDecision::Switch(next) => {
                    assert_ne!(next, last);
                    assert!(next < 4);
                    last = next;
                }
                ScheduleDecision::Continue => panic!("probability 1.0 must switch"),
            }
        }
    }

    #[test]
    fn test_single_thread_never_switches() {
        let mut scheduler = Scheduler::new(DeterministicRng::new(3), 1, 1.0);
        assert_eq!(scheduler.decide(), ScheduleDecision::Continue);
        assert_eq!(scheduler.force_switch(), ScheduleDecision::Continue);
    }

    #[test]
    fn test_zero_probability_continues() {
        let mut scheduler = Scheduler::new(DeterministicRng::new(3), 3, 0.0);
        assert!((0..50).all(|_| scheduler.decide() == ScheduleDecision::Continue));
    }
}

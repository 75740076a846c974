//! Probabilistic fault decisions.

use crate::random::DeterministicRng;

/// How often faults fire.
#[derive(Debug, Clone, PartialEq)]
pub struct FaultConfig {
    /// Chance that a single check fails
    pub probability: f64,
    /// Stop injecting after this many faults
    pub max_faults: Option<u64>,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            probability: 0.05,
            max_faults: None,
        }
    }
}

impl FaultConfig {
    /// Never fail.
    pub fn none() -> Self {
        Self {
            probability: 0.0,
            max_faults: None,
        }
    }

    pub fn aggressive() -> Self {
        Self {
            probability: 0.25,
            max_faults: None,
        }
    }
}

/// Counters for a `FaultInjector`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultStats {
    pub checks_count: u64,
    pub faults_count: u64,
}

/// Decides, reproducibly, whether the next fault point fires.
#[derive(Debug, Clone)]
pub struct FaultInjector {
    rng: DeterministicRng,
    config: FaultConfig,
    stats: FaultStats,
}

impl FaultInjector {
    pub fn new(rng: DeterministicRng, config: FaultConfig) -> Self {
        debug_assert!(
            (0.0..=1.0).contains(&config.probability),
            "fault probability {} out of range",
            config.probability
        );
        Self {
            rng,
            config,
            stats: FaultStats::default(),
        }
    }

    pub fn config(&self) -> &FaultConfig {
        &self.config
    }

    pub fn should_fail(&mut self) -> bool {
        self.stats.checks_count += 1;
        if self
            .config
            .max_faults
            .is_some_and(|max| self.stats.faults_count >= max)
        {
            return false;
        }
        let fail = self.rng.gen_bool(self.config.probability);
        if fail {
            self.stats.faults_count += 1;
        }
        fail
    }

    pub fn stats(&self) -> FaultStats {
        self.stats
    }
}

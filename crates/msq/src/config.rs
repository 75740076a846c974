//! Queue and hazard-domain configuration.

use thiserror::Error;

use crate::hazard::DomainId;

/// Hazard slots the queue engine needs per in-flight operation.
pub const ENGINE_HAZARD_SLOTS: usize = 2;

/// Tuning for a `HazardDomain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HazardConfig {
    /// Hazard slots in each per-thread record; the engine uses two
    pub slots_per_record: usize,
    /// Retired nodes a record accumulates before it scans for reclaimable ones
    pub retire_threshold: usize,
}

impl Default for HazardConfig {
    fn default() -> Self {
        Self {
            slots_per_record: ENGINE_HAZARD_SLOTS,
            retire_threshold: 64,
        }
    }
}

impl HazardConfig {
    /// Scan on every retirement. Keeps the pending set minimal; useful in tests.
    pub fn eager() -> Self {
        Self {
            retire_threshold: 1,
            ..Self::default()
        }
    }

    /// Batch retirements in larger groups to amortise scans.
    pub fn batched() -> Self {
        Self {
            retire_threshold: 512,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slots_per_record < ENGINE_HAZARD_SLOTS {
            return Err(ConfigError::TooFewHazardSlots {
                requested: self.slots_per_record,
                required: ENGINE_HAZARD_SLOTS,
            });
        }
        if self.retire_threshold == 0 {
            return Err(ConfigError::ZeroRetireThreshold);
        }
        Ok(())
    }
}

/// Configuration for a `LockFreeQueue`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueueConfig {
    /// Identity of the queue's reclamation domain
    pub domain: DomainId,
    pub hazard: HazardConfig,
    /// Spin with exponential backoff between failed CAS attempts
    pub backoff: bool,
}

impl QueueConfig {
    pub fn for_domain(domain: DomainId) -> Self {
        Self {
            domain,
            ..Self::default()
        }
    }

    /// Configuration for heavily contended queues.
    pub fn contended(domain: DomainId) -> Self {
        Self {
            domain,
            hazard: HazardConfig::batched(),
            backoff: true,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.hazard.validate()
    }
}

/// Rejected configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("hazard records need at least {required} slots, got {requested}")]
    TooFewHazardSlots { requested: usize, required: usize },

    #[error("retire threshold must be at least 1")]
    ZeroRetireThreshold,
}

//! # msq-core
//!
//! Core types for checking the lock-free queue and its reclamation scheme.
//!
//! This crate provides:
//! - `PropertyResult` and `PropertyChecker` for verifying invariants
//! - `Counterexample` for rendering failure paths
//! - Invariant traits: `QueueProperties` for FIFO behaviour and
//!   `ReclamationProperties` for the hazard-pointer protocol

pub mod counterexample;
pub mod invariants;
pub mod property;

pub use counterexample::{Counterexample, MemoryIssue, StateSnapshot, ThreadAction};
pub use invariants::{
    QueueHistory, QueueOpType, QueueProperties, QueuePropertyChecker, ReclamationEvent,
    ReclamationEventKind, ReclamationProperties, ReclamationPropertyChecker,
};
pub use property::{PropertyChecker, PropertyResult};

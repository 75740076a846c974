//! Invariant traits and checkers.
//!
//! - `queue`: FIFO queue invariants (NoLostElements, NoDuplicates, FIFO_Order)
//! - `reclamation`: hazard-pointer protocol invariants (NoReclaimWhileProtected,
//!   NoDoubleRetire, NoLeak)

pub mod queue;
pub mod reclamation;

pub use queue::{QueueHistory, QueueOpType, QueueOperation, QueueProperties, QueuePropertyChecker};
pub use reclamation::{
    protected_nodes, ReclamationEvent, ReclamationEventKind, ReclamationProperties,
    ReclamationPropertyChecker,
};

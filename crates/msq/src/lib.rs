//! # msq
//!
//! An unbounded lock-free multi-producer multi-consumer FIFO queue after
//! Michael and Scott, with hazard-pointer reclamation.
//!
//! - `tagged` / `atomic`: `(node, tag)` pairs compared and exchanged as one
//!   16-byte value; every successful CAS bumps the tag, which defeats ABA
//! - `arena`: nodes live in a segmented arena addressed by stable `NodeId`s
//!   and are recycled through a tagged free list
//! - `hazard`: the `HazardContext` seam and the lock-free `HazardDomain`
//! - `queue`: the engine, `LockFreeQueue`
//! - `registry`: a fixed set of independently reclaimed queues
//! - `tracked` / `instrumented`: hooks for the `msq-core` property checkers
//!
//! ```
//! use std::sync::Arc;
//! use std::thread;
//!
//! use msq::LockFreeQueue;
//!
//! let queue = Arc::new(LockFreeQueue::new());
//! let producers: Vec<_> = (0..4)
//!     .map(|p| {
//!         let queue = Arc::clone(&queue);
//!         thread::spawn(move || {
//!             for i in 0..100u64 {
//!                 queue.enqueue(p * 1_000 + i);
//!             }
//!         })
//!     })
//!     .collect();
//! for p in producers {
//!     p.join().unwrap();
//! }
//!
//! let mut drained = 0;
//! while queue.dequeue().is_some() {
//!     drained += 1;
//! }
//! assert_eq!(drained, 400);
//! ```

pub mod arena;
pub mod atomic;
pub mod config;
pub mod hazard;
pub mod instrumented;
pub mod queue;
pub mod registry;
pub mod tagged;
pub mod tracked;

pub use arena::{ArenaStats, NodeArena, Reclaim};
pub use atomic::AtomicTagged;
pub use config::{ConfigError, HazardConfig, QueueConfig};
pub use hazard::{DomainId, DomainShield, HazardContext, HazardDomain, HazardGuard, Shield};
pub use instrumented::{Recorder, RecordingContext, RecordingShield};
pub use queue::LockFreeQueue;
pub use registry::QueueRegistry;
pub use tagged::{NodeId, TaggedPtr};
pub use tracked::TrackedQueue;

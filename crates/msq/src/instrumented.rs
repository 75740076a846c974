//! A hazard context that records and checks every step.
//!
//! `RecordingContext` reclaims eagerly: each retirement immediately reclaims
//! every retired node nobody protects. All decisions are taken under one lock,
//! so the event log is a faithful replay for `ReclamationPropertyChecker`.
//! Protocol violations panic on the spot:
//!
//! - a node retired twice before being reclaimed
//! - a shield retiring a node it still protects
//! - a hazard slot outside the engine's two
//! - a flush while hazards are still published
//!
//! `Recorder::interrupt_before_publish` runs a caller-supplied operation in
//! the window between an engine reading a node id and its hazard on that node
//! becoming visible, which is exactly where a missing re-validation would
//! let the engine read a reclaimed node.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use msq_core::{ReclamationEvent, ReclamationEventKind, ReclamationProperties};
use tracing::debug;

use crate::arena::Reclaim;
use crate::config::ENGINE_HAZARD_SLOTS;
use crate::hazard::{DomainId, HazardContext, Shield};
use crate::tagged::NodeId;

#[derive(Debug, Default)]
struct State {
    hazards: HashMap<(u64, usize), NodeId>,
    pending: Vec<NodeId>,
    events: Vec<ReclamationEvent>,
    step: u64,
    live_shields: usize,
    max_live_shields: usize,
}

impl State {
    fn log(&mut self, shield: u64, kind: ReclamationEventKind) {
        self.step += 1;
        self.events.push(ReclamationEvent {
            step: self.step,
            thread_id: shield,
            kind,
        });
    }

    fn is_protected(&self, node: NodeId) -> bool {
        self.hazards.values().any(|&n| n == node)
    }
}

/// One-shot operation run ahead of a publish into `slot`.
struct Interrupt {
    slot: usize,
    run: Box<dyn FnOnce() + Send>,
}

impl fmt::Debug for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interrupt").field("slot", &self.slot).finish()
    }
}

/// Shared view of a `RecordingContext`, still readable after the queue that
/// owned the context has been dropped.
#[derive(Debug, Default)]
pub struct Recorder {
    state: Mutex<State>,
    interrupt: Mutex<Option<Interrupt>>,
    retired: AtomicU64,
    reclaimed: AtomicU64,
    torn_down: AtomicBool,
}

impl Recorder {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn retired(&self) -> u64 {
        self.retired.load(Ordering::SeqCst)
    }

    pub fn reclaimed(&self) -> u64 {
        self.reclaimed.load(Ordering::SeqCst)
    }

    /// Retired nodes still waiting on a hazard.
    pub fn pending(&self) -> usize {
        self.state().pending.len()
    }

    /// Run `run` once, the next time any shield publishes into `slot`,
    /// before that hazard is recorded. `run` may use the same queue; it
    /// executes outside every internal lock.
    pub fn interrupt_before_publish<F>(&self, slot: usize, run: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut interrupt = self
            .interrupt
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *interrupt = Some(Interrupt {
            slot,
            run: Box::new(run),
        });
    }

    fn take_interrupt(&self, slot: usize) -> Option<Interrupt> {
        let mut interrupt = self
            .interrupt
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match interrupt.as_ref() {
            Some(pending) if pending.slot == slot => interrupt.take(),
            _ => None,
        }
    }

    /// Most shields alive at the same time.
    pub fn max_live_shields(&self) -> usize {
        self.state().max_live_shields
    }
}

impl ReclamationProperties for Recorder {
    fn events(&self) -> Vec<ReclamationEvent> {
        self.state().events.clone()
    }

    /// Between two retirements only protected nodes stay pending, and each
    /// live shield protects at most two.
    fn pending_bound(&self) -> usize {
        ENGINE_HAZARD_SLOTS * self.state().max_live_shields + 1
    }

    fn torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }
}

/// Instrumented `HazardContext`.
#[derive(Debug)]
pub struct RecordingContext {
    domain: DomainId,
    recorder: Arc<Recorder>,
    next_shield: AtomicU64,
}

impl RecordingContext {
    #[must_use]
    pub fn new(domain: DomainId) -> Self {
        Self {
            domain,
            recorder: Arc::new(Recorder::default()),
            next_shield: AtomicU64::new(0),
        }
    }

    pub fn recorder(&self) -> Arc<Recorder> {
        Arc::clone(&self.recorder)
    }
}

impl HazardContext for RecordingContext {
    type Shield<'a> = RecordingShield<'a>;

    fn domain(&self) -> DomainId {
        self.domain
    }

    fn shield(&self) -> RecordingShield<'_> {
        let id = self.next_shield.fetch_add(1, Ordering::Relaxed);
        let mut state = self.recorder.state();
        state.live_shields += 1;
        state.max_live_shields = state.max_live_shields.max(state.live_shields);
        RecordingShield { context: self, id }
    }

    fn flush(&mut self, reclaim: &dyn Reclaim) {
        let recorder = &self.recorder;
        let mut state = recorder.state();
        assert!(
            state.hazards.is_empty(),
            "flush with {} hazards still published",
            state.hazards.len()
        );
        for node in std::mem::take(&mut state.pending) {
            // SAFETY: retired and nothing is published.
            unsafe { reclaim.reclaim(node) };
            state.log(u64::MAX, ReclamationEventKind::Reclaim { node: u64::from(node.index()) });
            recorder.reclaimed.fetch_add(1, Ordering::SeqCst);
        }
        recorder.torn_down.store(true, Ordering::SeqCst);
        debug!(
            domain = %self.domain,
            retired = recorder.retired(),
            reclaimed = recorder.reclaimed(),
            "recording context flushed"
        );
    }
}

/// Shield handed out by `RecordingContext`.
pub struct RecordingShield<'a> {
    context: &'a RecordingContext,
    id: u64,
}

impl Shield for RecordingShield<'_> {
    fn publish(&self, slot: usize, node: NodeId) {
        assert!(slot < ENGINE_HAZARD_SLOTS, "hazard slot {} out of range", slot);
        if let Some(interrupt) = self.context.recorder.take_interrupt(slot) {
            (interrupt.run)();
        }
        let mut state = self.context.recorder.state();
        state.hazards.insert((self.id, slot), node);
        state.log(
            self.id,
            ReclamationEventKind::Publish {
                slot,
                node: u64::from(node.index()),
            },
        );
    }

    fn clear(&self, slot: usize) {
        let mut state = self.context.recorder.state();
        if state.hazards.remove(&(self.id, slot)).is_some() {
            state.log(self.id, ReclamationEventKind::Clear { slot });
        }
    }

    unsafe fn retire(&self, node: NodeId, reclaim: &dyn Reclaim) {
        let recorder = &self.context.recorder;
        let mut state = recorder.state();

        assert!(!state.pending.contains(&node), "{} retired twice", node);
        assert!(
            (0..ENGINE_HAZARD_SLOTS).all(|slot| state.hazards.get(&(self.id, slot)) != Some(&node)),
            "shield {} retired {} while protecting it",
            self.id,
            node
        );

        state.log(self.id, ReclamationEventKind::Retire { node: u64::from(node.index()) });
        state.pending.push(node);
        recorder.retired.fetch_add(1, Ordering::SeqCst);

        let pending = std::mem::take(&mut state.pending);
        for candidate in pending {
            if state.is_protected(candidate) {
                state.pending.push(candidate);
                continue;
            }
            // SAFETY: retired, and no hazard names it while we hold the lock.
            reclaim.reclaim(candidate);
            state.log(
                self.id,
                ReclamationEventKind::Reclaim {
                    node: u64::from(candidate.index()),
                },
            );
            recorder.reclaimed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for RecordingShield<'_> {
    fn drop(&mut self) {
        let mut state = self.context.recorder.state();
        for slot in 0..ENGINE_HAZARD_SLOTS {
            if state.hazards.remove(&(self.id, slot)).is_some() {
                state.log(self.id, ReclamationEventKind::Clear { slot });
            }
        }
        state.live_shields -= 1;
    }
}

//! Hazard-pointer reclamation invariants.
//!
//! | Property | Description |
//! |----------|-------------|
//! | NoReclaimWhileProtected | A node is never reclaimed while any thread publishes a hazard on it |
//! | NoDoubleRetire | A node is retired at most once per allocation |
//! | RetireBeforeReclaim | Only retired nodes are reclaimed |
//! | BoundedPending | Retired-but-unreclaimed nodes stay under the context's bound |
//! | NoLeak | After teardown every retired node has been reclaimed |
//!
//! Checked by replaying an event log. The log must be recorded in an order
//! consistent with the context's own decisions, e.g. under the same lock that
//! decides when a node is reclaimable.

use std::collections::{HashMap, HashSet};

use crate::counterexample::{Counterexample, MemoryIssue};
use crate::property::{PropertyChecker, PropertyResult};

/// One observable reclamation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReclamationEvent {
    pub step: u64,
    pub thread_id: u64,
    pub kind: ReclamationEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclamationEventKind {
    /// Hazard published in `slot`
    Publish { slot: usize, node: u64 },
    /// Hazard in `slot` withdrawn
    Clear { slot: usize },
    Retire { node: u64 },
    Reclaim { node: u64 },
}

/// State a reclamation context exposes for property checking.
pub trait ReclamationProperties {
    /// Every event in the order the context decided them.
    fn events(&self) -> Vec<ReclamationEvent>;

    /// Upper bound on retired-but-unreclaimed nodes.
    fn pending_bound(&self) -> usize;

    /// True once the owning structure has been torn down.
    fn torn_down(&self) -> bool;
}

/// Result of replaying the event log once.
#[derive(Debug, Default)]
struct Replay {
    reclaimed_while_protected: Option<MemoryIssue>,
    double_retire: Option<MemoryIssue>,
    reclaim_without_retire: Option<(u64, u64)>,
    max_pending: usize,
    pending: HashMap<u64, u64>,
}

fn replay(events: &[ReclamationEvent]) -> Replay {
    let mut out = Replay::default();
    let mut hazards: HashMap<(u64, usize), u64> = HashMap::new();

    for ev in events {
        match ev.kind {
            ReclamationEventKind::Publish { slot, node } => {
                hazards.insert((ev.thread_id, slot), node);
            }
            ReclamationEventKind::Clear { slot } => {
                hazards.remove(&(ev.thread_id, slot));
            }
            ReclamationEventKind::Retire { node } => {
                if let Some(&first_step) = out.pending.get(&node) {
                    out.double_retire.get_or_insert(MemoryIssue::DoubleRetire {
                        node,
                        first_step,
                        second_step: ev.step,
                    });
                } else {
                    out.pending.insert(node, ev.step);
                }
                out.max_pending = out.max_pending.max(out.pending.len());
            }
            ReclamationEventKind::Reclaim { node } => {
                if let Some(((holder, _), _)) = hazards.iter().find(|(_, n)| **n == node) {
                    out.reclaimed_while_protected
                        .get_or_insert(MemoryIssue::ReclaimedWhileProtected {
                            node,
                            thread_id: *holder,
                            step: ev.step,
                        });
                }
                if out.pending.remove(&node).is_none() {
                    out.reclaim_without_retire.get_or_insert((node, ev.step));
                }
            }
        }
    }

    out
}

/// Property checker for reclamation contexts.
pub struct ReclamationPropertyChecker<'a, R: ReclamationProperties> {
    context: &'a R,
}

impl<'a, R: ReclamationProperties> ReclamationPropertyChecker<'a, R> {
    #[must_use]
    pub fn new(context: &'a R) -> Self {
        Self { context }
    }

    fn issue_result(name: &'static str, issue: Option<MemoryIssue>) -> PropertyResult {
        match issue {
            None => PropertyResult::pass(name),
            Some(issue) => {
                let mut ce = Counterexample::new();
                let msg = issue.to_string();
                ce.add_memory_issue(issue);
                PropertyResult::fail(name, msg, Some(ce))
            }
        }
    }
}

impl<R: ReclamationProperties> PropertyChecker for ReclamationPropertyChecker<'_, R> {
    fn check_all(&self) -> Vec<PropertyResult> {
        let events = self.context.events();
        let replayed = replay(&events);
        let bound = self.context.pending_bound();

        let retire_before_reclaim = match replayed.reclaim_without_retire {
            None => PropertyResult::pass("RetireBeforeReclaim"),
            Some((node, step)) => PropertyResult::fail(
                "RetireBeforeReclaim",
                format!("Node {} reclaimed at step {} without being retired", node, step),
                None,
            ),
        };

        let bounded = if replayed.max_pending <= bound {
            PropertyResult::pass("BoundedPending")
        } else {
            PropertyResult::fail(
                "BoundedPending",
                format!(
                    "{} nodes awaited reclamation at once, bound is {}",
                    replayed.max_pending, bound
                ),
                None,
            )
        };

        let leak = if self.context.torn_down() {
            replayed
                .pending
                .iter()
                .min_by_key(|(node, _)| **node)
                .map(|(&node, &step)| MemoryIssue::Leak {
                    node,
                    allocated_at_step: step,
                })
        } else {
            None
        };

        vec![
            Self::issue_result("NoReclaimWhileProtected", replayed.reclaimed_while_protected),
            Self::issue_result("NoDoubleRetire", replayed.double_retire),
            retire_before_reclaim,
            bounded,
            Self::issue_result("NoLeak", leak),
        ]
    }
}

/// Nodes currently hazarded by any thread after replaying `events`.
#[must_use]
pub fn protected_nodes(events: &[ReclamationEvent]) -> HashSet<u64> {
    let mut hazards: HashMap<(u64, usize), u64> = HashMap::new();
    for ev in events {
        match ev.kind {
            ReclamationEventKind::Publish { slot, node } => {
                hazards.insert((ev.thread_id, slot), node);
            }
            ReclamationEventKind::Clear { slot } => {
                hazards.remove(&(ev.thread_id, slot));
            }
            _ => {}
        }
    }
    hazards.into_values().collect()
}

//! FIFO queue invariants.
//!
//! | Property | Description |
//! |----------|-------------|
//! | NoLostElements | Every enqueued element is still queued or was dequeued |
//! | NoDuplicates | No element is returned (or queued) more often than it was enqueued |
//! | NoPhantomElements | Nothing comes out that never went in (e.g. a sentinel's default) |
//! | FIFO_Order | Replaying the history against a model queue matches every result |

use std::collections::{HashMap, VecDeque};

use crate::counterexample::{Counterexample, StateSnapshot, ThreadAction};
use crate::property::{PropertyChecker, PropertyResult};

/// State a queue implementation exposes for property checking.
pub trait QueueProperties {
    /// Every element enqueued so far (multiset, completion order).
    fn enqueued_elements(&self) -> Vec<u64>;

    /// Every element returned by a successful dequeue (completion order).
    fn dequeued_elements(&self) -> Vec<u64>;

    /// Elements currently in the queue, head to tail.
    fn current_contents(&self) -> Vec<u64>;

    /// Operation history for order checking.
    fn history(&self) -> QueueHistory;
}

/// Recorded queue operations.
#[derive(Debug, Clone, Default)]
pub struct QueueHistory {
    /// Operations in the order they were recorded
    pub operations: Vec<QueueOperation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOperation {
    pub thread_id: u64,
    pub op_type: QueueOpType,
    /// The enqueued value, or the dequeued result
    pub element: Option<u64>,
    pub step: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOpType {
    Enqueue,
    Dequeue,
    DequeueEmpty,
}

impl QueueHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_enqueue(&mut self, thread_id: u64, element: u64, step: u64) {
        debug_assert!(step > 0, "Step must be positive");
        self.operations.push(QueueOperation {
            thread_id,
            op_type: QueueOpType::Enqueue,
            element: Some(element),
            step,
        });
    }

    pub fn record_dequeue(&mut self, thread_id: u64, element: Option<u64>, step: u64) {
        debug_assert!(step > 0, "Step must be positive");
        self.operations.push(QueueOperation {
            thread_id,
            op_type: if element.is_some() {
                QueueOpType::Dequeue
            } else {
                QueueOpType::DequeueEmpty
            },
            element,
            step,
        });
    }

    fn to_counterexample(&self, seed: Option<u64>, failing_step: u64) -> Counterexample {
        let mut ce = match seed {
            Some(seed) => Counterexample::with_seed(seed),
            None => Counterexample::new(),
        };
        for op in self.operations.iter().filter(|op| op.step <= failing_step) {
            let action = match (op.op_type, op.element) {
                (QueueOpType::Enqueue, Some(e)) => format!("enqueue({})", e),
                (QueueOpType::Dequeue, Some(e)) => format!("dequeue() -> {}", e),
                _ => "dequeue() -> None".to_string(),
            };
            ce.add_action(ThreadAction {
                thread_id: op.thread_id,
                step: op.step,
                action,
                success: op.step != failing_step,
            });
        }
        ce
    }
}

fn counts(elements: impl IntoIterator<Item = u64>) -> HashMap<u64, usize> {
    let mut map = HashMap::new();
    for e in elements {
        *map.entry(e).or_insert(0) += 1;
    }
    map
}

/// Property checker for queue implementations.
pub struct QueuePropertyChecker<'a, Q: QueueProperties> {
    queue: &'a Q,
    dst_seed: Option<u64>,
}

impl<'a, Q: QueueProperties> QueuePropertyChecker<'a, Q> {
    #[must_use]
    pub fn new(queue: &'a Q) -> Self {
        Self {
            queue,
            dst_seed: None,
        }
    }

    /// Attach a DST seed to any counterexample produced.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        debug_assert!(seed != 0, "DST seed should not be zero");
        self.dst_seed = Some(seed);
        self
    }

    fn snapshot_counterexample(&self, description: String) -> Counterexample {
        let mut ce = match self.dst_seed {
            Some(seed) => Counterexample::with_seed(seed),
            None => Counterexample::new(),
        };
        ce.add_state(StateSnapshot {
            step: 1,
            description: description.clone(),
            variables: vec![
                (
                    "enqueued".to_string(),
                    format!("{:?}", self.queue.enqueued_elements()),
                ),
                (
                    "dequeued".to_string(),
                    format!("{:?}", self.queue.dequeued_elements()),
                ),
                (
                    "contents".to_string(),
                    format!("{:?}", self.queue.current_contents()),
                ),
            ],
        });
        ce.with_description(description)
    }

    fn check_no_lost_elements(&self) -> PropertyResult {
        let enqueued = counts(self.queue.enqueued_elements());
        let accounted = counts(
            self.queue
                .dequeued_elements()
                .into_iter()
                .chain(self.queue.current_contents()),
        );

        let mut lost: Vec<u64> = enqueued
            .iter()
            .filter(|(e, n)| accounted.get(e).copied().unwrap_or(0) < **n)
            .map(|(e, _)| *e)
            .collect();
        lost.sort_unstable();

        match lost.first() {
            None => PropertyResult::pass("NoLostElements"),
            Some(first) => {
                let msg = format!(
                    "Element {} was enqueued but is neither queued nor dequeued ({} lost in total)",
                    first,
                    lost.len()
                );
                PropertyResult::fail(
                    "NoLostElements",
                    msg.clone(),
                    Some(self.snapshot_counterexample(msg)),
                )
            }
        }
    }

    fn check_no_duplicates(&self) -> PropertyResult {
        let enqueued = counts(self.queue.enqueued_elements());
        let accounted = counts(
            self.queue
                .dequeued_elements()
                .into_iter()
                .chain(self.queue.current_contents()),
        );

        for (element, seen) in &accounted {
            let allowed = enqueued.get(element).copied().unwrap_or(0);
            if allowed > 0 && *seen > allowed {
                return PropertyResult::fail(
                    "NoDuplicates",
                    format!(
                        "Element {} observed {} times but enqueued {} times",
                        element, seen, allowed
                    ),
                    None,
                );
            }
        }

        PropertyResult::pass("NoDuplicates")
    }

    fn check_no_phantom_elements(&self) -> PropertyResult {
        let enqueued = counts(self.queue.enqueued_elements());
        let phantom = self
            .queue
            .dequeued_elements()
            .into_iter()
            .chain(self.queue.current_contents())
            .find(|e| !enqueued.contains_key(e));

        match phantom {
            None => PropertyResult::pass("NoPhantomElements"),
            Some(e) => PropertyResult::fail(
                "NoPhantomElements",
                format!("Element {} came out of the queue but was never enqueued", e),
                None,
            ),
        }
    }

    /// Replay the history against a model queue.
    ///
    /// Only meaningful when the history was recorded in a linearization order
    /// (single-threaded or DST-simulated runs). Concurrent runs record in
    /// completion order, which may legitimately differ.
    fn check_fifo_order(&self) -> PropertyResult {
        let history = self.queue.history();
        let mut model: VecDeque<u64> = VecDeque::new();

        for op in &history.operations {
            let violation = match (op.op_type, op.element) {
                (QueueOpType::Enqueue, Some(e)) => {
                    model.push_back(e);
                    None
                }
                (QueueOpType::Dequeue, Some(got)) => match model.pop_front() {
                    Some(expected) if expected == got => None,
                    Some(expected) => Some(format!(
                        "dequeue returned {} but model expected {} (step {})",
                        got, expected, op.step
                    )),
                    None => Some(format!(
                        "dequeue returned {} but model queue was empty (step {})",
                        got, op.step
                    )),
                },
                (QueueOpType::DequeueEmpty, _) if !model.is_empty() => Some(format!(
                    "dequeue returned None but model holds {} elements (step {})",
                    model.len(),
                    op.step
                )),
                _ => None,
            };

            if let Some(msg) = violation {
                let ce = history
                    .to_counterexample(self.dst_seed, op.step)
                    .with_description(msg.clone());
                return PropertyResult::fail("FIFO_Order", msg, Some(ce));
            }
        }

        PropertyResult::pass("FIFO_Order")
    }
}

impl<Q: QueueProperties> PropertyChecker for QueuePropertyChecker<'_, Q> {
    fn check_all(&self) -> Vec<PropertyResult> {
        vec![
            self.check_no_lost_elements(),
            self.check_no_duplicates(),
            self.check_no_phantom_elements(),
            self.check_fifo_order(),
        ]
    }
}

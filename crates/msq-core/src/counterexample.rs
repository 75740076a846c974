//! Counterexample representation and rendering.
//!
//! When a property checker finds a violation it can attach a counterexample:
//! the per-thread queue operations that led there, snapshots of the queue
//! state, and any reclamation issues observed along the way.

use std::fmt;

/// A failure path for a queue or reclamation property.
#[derive(Debug, Clone, Default)]
pub struct Counterexample {
    /// State snapshots, ordered by step
    pub states: Vec<StateSnapshot>,
    /// Thread operations in the order they were observed
    pub interleaving: Vec<ThreadAction>,
    /// Reclamation issues detected
    pub memory_issues: Vec<MemoryIssue>,
    /// DST seed for reproduction (if applicable)
    pub dst_seed: Option<u64>,
    /// Free-form description of the failure
    pub description: Option<String>,
}

/// Queue state at one step.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub step: u64,
    pub description: String,
    /// Named values, e.g. `("contents", "[1, 2]")`
    pub variables: Vec<(String, String)>,
}

/// One operation performed by a thread.
#[derive(Debug, Clone)]
pub struct ThreadAction {
    pub thread_id: u64,
    pub step: u64,
    /// e.g. `enqueue(4)` or `dequeue() -> 4`
    pub action: String,
    /// False when the action is the one that broke the property
    pub success: bool,
}

/// Reclamation-protocol issue tied to a node slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryIssue {
    /// A slot was reclaimed while some thread published a hazard on it
    ReclaimedWhileProtected { node: u64, thread_id: u64, step: u64 },
    /// A slot was handed to the reclaimer twice without being reallocated
    DoubleRetire { node: u64, first_step: u64, second_step: u64 },
    /// A tagged slot was overwritten without its tag advancing
    TagNotAdvanced { slot: String, old_tag: u64, new_tag: u64, step: u64 },
    /// A slot was allocated and never reclaimed after teardown
    Leak { node: u64, allocated_at_step: u64 },
}

impl Counterexample {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a counterexample carrying a DST seed.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        debug_assert!(seed != 0, "DST seed should not be zero");
        Self {
            dst_seed: Some(seed),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a state snapshot. Steps must be strictly increasing.
    pub fn add_state(&mut self, state: StateSnapshot) {
        debug_assert!(
            self.states.last().map_or(true, |last| state.step > last.step),
            "States must be added in step order"
        );
        self.states.push(state);
    }

    pub fn add_action(&mut self, action: ThreadAction) {
        self.interleaving.push(action);
    }

    pub fn add_memory_issue(&mut self, issue: MemoryIssue) {
        self.memory_issues.push(issue);
    }

    /// Render as a step-by-thread table.
    ///
    /// ```text
    /// DST_SEED=42
    ///
    /// Step | Thread 0 | Thread 1 | State
    /// -----|----------|----------|------
    ///    1 | enqueue(1) |          | head=S tail=N1
    ///    2 |          | dequeue() -> 1 | head=N1
    /// ```
    #[must_use]
    pub fn render_diagram(&self) -> String {
        let mut output = String::new();

        if let Some(seed) = self.dst_seed {
            output.push_str(&format!("DST_SEED={}\n\n", seed));
        }

        if let Some(ref desc) = self.description {
            output.push_str(&format!("Failure: {}\n\n", desc));
        }

        let mut threads: Vec<u64> = self.interleaving.iter().map(|a| a.thread_id).collect();
        threads.sort_unstable();
        threads.dedup();

        if threads.is_empty() {
            output.push_str("(no thread actions recorded)\n");
        } else {
            output.push_str("Step |");
            for tid in &threads {
                output.push_str(&format!(" Thread {} |", tid));
            }
            output.push_str(" State\n-----|");
            for _ in &threads {
                output.push_str("----------|");
            }
            output.push_str("------\n");

            let max_step = self.interleaving.iter().map(|a| a.step).max().unwrap_or(0);
            for step in 1..=max_step {
                output.push_str(&format!("{:4} |", step));
                for tid in &threads {
                    let cell = self
                        .interleaving
                        .iter()
                        .find(|a| a.step == step && a.thread_id == *tid);
                    match cell {
                        Some(a) if a.success => output.push_str(&format!(" {} |", a.action)),
                        Some(a) => output.push_str(&format!(" {} [FAIL] |", a.action)),
                        None => output.push_str("          |"),
                    }
                }
                if let Some(state) = self.states.iter().find(|s| s.step == step) {
                    output.push_str(&format!(" {}", state.description));
                }
                output.push('\n');
            }
        }

        if !self.memory_issues.is_empty() {
            output.push_str("\nMemory Issues:\n");
            for issue in &self.memory_issues {
                output.push_str(&format!("  - {}\n", issue));
            }
        }

        output
    }
}

impl fmt::Display for MemoryIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryIssue::ReclaimedWhileProtected {
                node,
                thread_id,
                step,
            } => write!(
                f,
                "Reclaimed while protected: node {} still hazarded by thread {} at step {}",
                node, thread_id, step
            ),
            MemoryIssue::DoubleRetire {
                node,
                first_step,
                second_step,
            } => write!(
                f,
                "Double retire: node {} retired at step {} and again at step {}",
                node, first_step, second_step
            ),
            MemoryIssue::TagNotAdvanced {
                slot,
                old_tag,
                new_tag,
                step,
            } => write!(
                f,
                "Tag not advanced: {} went from tag {} to {} at step {}",
                slot, old_tag, new_tag, step
            ),
            MemoryIssue::Leak {
                node,
                allocated_at_step,
            } => write!(
                f,
                "Leak: node {} allocated at step {}, never reclaimed",
                node, allocated_at_step
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counterexample_with_seed() {
        let ce = Counterexample::with_seed(12345);
        assert_eq!(ce.dst_seed, Some(12345));
        assert!(ce.states.is_empty());
        assert!(ce.interleaving.is_empty());
    }

    #[test]
    fn test_render_diagram() {
        let mut ce = Counterexample::with_seed(42).with_description("element 1 lost");

        ce.add_action(ThreadAction {
            thread_id: 0,
            step: 1,
            action: "enqueue(1)".to_string(),
            success: true,
        });
        ce.add_action(ThreadAction {
            thread_id: 1,
            step: 2,
            action: "dequeue() -> None".to_string(),
            success: false,
        });
        ce.add_state(StateSnapshot {
            step: 1,
            description: "contents=[1]".to_string(),
            variables: vec![],
        });
        ce.add_memory_issue(MemoryIssue::DoubleRetire {
            node: 3,
            first_step: 1,
            second_step: 2,
        });

        let diagram = ce.render_diagram();
        assert!(diagram.contains("DST_SEED=42"));
        assert!(diagram.contains("Failure: element 1 lost"));
        assert!(diagram.contains("Thread 1"));
        assert!(diagram.contains("enqueue(1)"));
        assert!(diagram.contains("dequeue() -> None [FAIL]"));
        assert!(diagram.contains("contents=[1]"));
        assert!(diagram.contains("Double retire: node 3"));
    }

    #[test]
    fn test_render_without_actions() {
        let diagram = Counterexample::new().render_diagram();
        assert!(diagram.contains("no thread actions recorded"));
    }
}

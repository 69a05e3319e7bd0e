//! Status enums for graph nodes, workflow executions and dispatched tasks.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a node in a [`DependencyGraph`](crate::graph::DependencyGraph).
///
/// Workflow steps report the same states through the execution context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    /// Waiting for dependencies.
    #[default]
    Pending,
    /// All dependencies completed; handed out by `ready_tasks` but not started.
    Ready,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error, or blocked by a failed dependency.
    Failed,
}

impl NodeState {
    /// Returns true if the node will never change state again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Overall status of a workflow execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Created, not yet picked up by the engine.
    #[default]
    Pending,
    /// Wavefronts are being scheduled.
    Running,
    /// Every step completed.
    Completed,
    /// At least one step failed.
    Failed,
    /// The run was cancelled before it finished.
    Cancelled,
}

impl ExecutionStatus {
    /// Returns true if the execution is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns true if moving from `self` to `next` never regresses.
    ///
    /// Terminal states accept no further transitions.
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        match self {
            Self::Pending => next != Self::Pending,
            Self::Running => next.is_terminal(),
            Self::Completed | Self::Failed | Self::Cancelled => false,
        }
    }
}

/// Status of a task handed to the dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchStatus {
    /// Accepted and waiting in the worker-pool queue.
    #[default]
    Queued,
    /// Picked up by a pool worker.
    Running,
    /// Kernel returned successfully.
    Completed,
    /// Decoding, resolution or execution failed.
    Failed,
    /// Refused at admission (queue full or unauthorized).
    Rejected,
}

impl DispatchStatus {
    /// Returns true if the task reached a final outcome.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_status_is_monotonic() {
        use ExecutionStatus::*;

        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(!Running.can_transition_to(Pending));
        assert!(!Running.can_transition_to(Running));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Cancelled.can_transition_to(Running));
    }

    #[test]
    fn test_node_state_terminal() {
        assert!(NodeState::Completed.is_terminal());
        assert!(NodeState::Failed.is_terminal());
        assert!(!NodeState::Ready.is_terminal());
    }

    #[test]
    fn test_status_serde_format() {
        let json = serde_json::to_string(&DispatchStatus::Queued).unwrap();
        assert_eq!(json, "\"QUEUED\"");
    }
}

//! Engine errors.

use thiserror::Error;

use computegrid_core::{ExecutionId, GraphError, TaskError, WorkflowId};

/// Errors returned by the workflow engine's public operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No workflow is registered under this id.
    #[error("Unknown workflow: {0}")]
    UnknownWorkflow(WorkflowId),

    /// No execution is tracked under this id.
    #[error("Unknown execution: {0}")]
    UnknownExecution(ExecutionId),

    /// The workflow definition is malformed.
    #[error("Invalid workflow '{workflow}': {message}")]
    InvalidWorkflow { workflow: WorkflowId, message: String },

    /// Dependency graph construction failed.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Admission control refused a new execution.
    #[error("Engine overloaded: {limit} executions already active")]
    Overloaded { limit: usize },

    /// The engine is shutting down and accepts no new work.
    #[error("Engine is shutting down")]
    ShuttingDown,

    /// The orchestrating task terminated abnormally.
    #[error("Execution task failed: {0}")]
    Join(String),
}

/// Errors produced by a single step attempt.
#[derive(Debug, Error)]
pub enum ActionError {
    /// The action reported a failure.
    #[error("{0}")]
    Failed(String),

    /// The attempt exceeded the step timeout.
    #[error("step timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// A provider-backed task failed.
    #[error(transparent)]
    Task(#[from] TaskError),

    /// The action panicked or its blocking worker was lost.
    #[error("step action aborted: {0}")]
    Aborted(String),
}

impl ActionError {
    /// Build a [`ActionError::Failed`] from anything displayable.
    pub fn msg(message: impl std::fmt::Display) -> Self {
        ActionError::Failed(message.to_string())
    }
}

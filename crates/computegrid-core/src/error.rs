//! Core domain errors.

use thiserror::Error;

/// Errors raised by the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// A node with this id is already present.
    #[error("Duplicate node: {0}")]
    DuplicateNode(String),

    /// The referenced node does not exist.
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    /// A node cannot depend on itself.
    #[error("Node '{0}' cannot depend on itself")]
    SelfDependency(String),

    /// The dependency edges form a cycle.
    #[error("Dependency cycle detected involving '{0}'")]
    Cycle(String),

    /// The requested state transition is not allowed.
    #[error("Invalid state transition for '{node}': {from} -> {to}")]
    InvalidTransition {
        node: String,
        from: String,
        to: String,
    },
}

/// Errors raised by task providers, the registry and the wire envelope.
#[derive(Debug, Error)]
pub enum TaskError {
    /// No provider is registered for the task type.
    #[error("Unknown task type: {0}")]
    UnknownTaskType(String),

    /// The task type exists but not at the requested precision.
    #[error("Task type '{task_type}' has no {precision} provider")]
    UnsupportedPrecision { task_type: String, precision: String },

    /// The envelope carries a version this build cannot decode.
    #[error("Unsupported envelope version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    /// The payload or the task arguments could not be decoded.
    #[error("Invalid task payload: {0}")]
    InvalidPayload(String),

    /// The kernel rejected its input or failed while computing.
    #[error("Task execution failed: {0}")]
    Execution(String),

    /// The output could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for TaskError {
    fn from(err: serde_json::Error) -> Self {
        TaskError::InvalidPayload(err.to_string())
    }
}

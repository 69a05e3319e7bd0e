//! ComputeGrid Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network/gRPC
//! - Async runtimes
//!
//! It provides the dependency graph used by the workflow engine, the task
//! abstraction shared by the engine and the dispatcher, and the versioned
//! wire envelope for dispatched tasks.

pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod graph;
pub mod ids;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use dispatch::DispatchRecord;
pub use envelope::{TaskEnvelope, ENVELOPE_VERSION};
pub use error::{GraphError, TaskError};
pub use graph::{DependencyGraph, NodeSnapshot};
pub use ids::{ExecutionId, StepId, TaskId, WorkflowId};
pub use status::{DispatchStatus, ExecutionStatus, NodeState};
pub use task::{
    DistributedTask, ErasedTask, Precision, ProviderRegistry, ProviderRegistryBuilder, TaskKind,
    TaskProvider,
};

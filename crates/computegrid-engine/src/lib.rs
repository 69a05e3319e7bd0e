//! ComputeGrid Workflow Engine
//!
//! Runs DAGs of asynchronous steps. A workflow is validated when it is built
//! and registered under its id; each execution instantiates a fresh
//! dependency graph and advances through it one wavefront at a time, with
//! per-step retry, linear backoff and an optional per-attempt timeout.
//!
//! ```ignore
//! let engine = WorkflowEngine::default();
//! engine
//!     .register_workflow(
//!         Workflow::builder("pipeline")
//!             .step(Step::from_fn("fetch", |_| async { Ok(json!(1)) }))
//!             .step(Step::from_fn("render", |_| async { Ok(json!(2)) }).retries(2))
//!             .dependency("render", "fetch")
//!             .build()?,
//!     )
//!     .await;
//! let ctx = engine.run(&"pipeline".into(), StepInputs::new()).await?;
//! ```

pub mod action;
pub mod context;
pub mod engine;
pub mod error;
pub mod repository;
pub mod retry;
pub mod step;
pub mod workflow;

pub use action::TaskAction;
pub use context::{ExecutionContext, StepRecord};
pub use engine::{EngineConfig, ExecutionHandle, WorkflowEngine};
pub use error::{ActionError, EngineError};
pub use repository::ExecutionRepository;
pub use step::{FnAction, Step, StepAction, StepInputs};
pub use workflow::{StepGraph, Workflow, WorkflowBuilder};

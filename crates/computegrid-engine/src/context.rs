//! Per-execution state.
//!
//! An [`ExecutionContext`] is shared between the orchestrating task, the step
//! tasks and any observers. Status moves forward only; once the execution
//! reaches a terminal status its outputs and step records are frozen and
//! late writes from abandoned step tasks are dropped.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use computegrid_core::{ExecutionId, ExecutionStatus, NodeState, StepId};

use crate::step::StepInputs;
use crate::workflow::Workflow;

/// Lifecycle record of one step within an execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StepRecord {
    pub status: NodeState,
    /// Attempts made so far, including the first.
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug)]
struct State {
    status: ExecutionStatus,
    outputs: HashMap<StepId, Value>,
    steps: HashMap<StepId, StepRecord>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

/// Shared state of one workflow execution.
#[derive(Debug)]
pub struct ExecutionContext {
    id: ExecutionId,
    workflow: Arc<Workflow>,
    inputs: StepInputs,
    created_at: DateTime<Utc>,
    state: RwLock<State>,
}

impl ExecutionContext {
    /// Create a PENDING context with a fresh id.
    pub fn new(workflow: Arc<Workflow>, inputs: StepInputs) -> Self {
        let steps = workflow
            .steps()
            .iter()
            .map(|s| (s.id().clone(), StepRecord::default()))
            .collect();
        Self {
            id: ExecutionId::generate(),
            workflow,
            inputs,
            created_at: Utc::now(),
            state: RwLock::new(State {
                status: ExecutionStatus::Pending,
                outputs: HashMap::new(),
                steps,
                started_at: None,
                finished_at: None,
                error: None,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &ExecutionId {
        &self.id
    }

    pub fn workflow(&self) -> &Arc<Workflow> {
        &self.workflow
    }

    /// Inputs supplied when the execution was started.
    pub fn inputs(&self) -> &StepInputs {
        &self.inputs
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> ExecutionStatus {
        self.read().status
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// When the execution moved to RUNNING. None if it never ran.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.read().started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.read().finished_at
    }

    /// Execution-level failure cause, if any.
    pub fn error(&self) -> Option<String> {
        self.read().error.clone()
    }

    /// Move to `next` if the transition is allowed.
    ///
    /// Returns false, leaving the status untouched, for backward or
    /// post-terminal transitions.
    pub fn transition(&self, next: ExecutionStatus) -> bool {
        let mut state = self.write();
        if !state.status.can_transition_to(next) {
            return false;
        }
        state.status = next;
        if next == ExecutionStatus::Running {
            state.started_at = Some(Utc::now());
        }
        if next.is_terminal() {
            state.finished_at = Some(Utc::now());
        }
        true
    }

    /// Fail the execution with an execution-level cause.
    pub fn fail(&self, cause: impl Into<String>) -> bool {
        let mut state = self.write();
        if !state.status.can_transition_to(ExecutionStatus::Failed) {
            return false;
        }
        state.status = ExecutionStatus::Failed;
        state.error = Some(cause.into());
        state.finished_at = Some(Utc::now());
        true
    }

    /// Output of a completed step.
    pub fn output(&self, step: &StepId) -> Option<Value> {
        self.read().outputs.get(step).cloned()
    }

    pub fn outputs(&self) -> HashMap<StepId, Value> {
        self.read().outputs.clone()
    }

    pub fn step_record(&self, step: &StepId) -> Option<StepRecord> {
        self.read().steps.get(step).cloned()
    }

    pub fn step_records(&self) -> HashMap<StepId, StepRecord> {
        self.read().steps.clone()
    }

    pub fn step_statuses(&self) -> HashMap<StepId, NodeState> {
        self.read()
            .steps
            .iter()
            .map(|(id, r)| (id.clone(), r.status))
            .collect()
    }

    /// True if any step has failed.
    pub fn has_failures(&self) -> bool {
        self.read()
            .steps
            .values()
            .any(|r| r.status == NodeState::Failed)
    }

    /// Execution inputs overlaid with completed step outputs.
    ///
    /// A step output shadows an execution input with the same key.
    pub fn merged_inputs(&self) -> StepInputs {
        let state = self.read();
        let mut merged = self.inputs.clone();
        for (id, output) in &state.outputs {
            merged.insert(id.to_string(), output.clone());
        }
        merged
    }

    fn update_step(&self, step: &StepId, f: impl FnOnce(&mut State, &StepId)) -> bool {
        let mut state = self.write();
        if state.status.is_terminal() || !state.steps.contains_key(step) {
            return false;
        }
        f(&mut state, step);
        true
    }

    pub(crate) fn record_step_started(&self, step: &StepId) -> bool {
        self.update_step(step, |state, step| {
            if let Some(record) = state.steps.get_mut(step) {
                record.status = NodeState::Running;
                record.started_at = Some(Utc::now());
            }
        })
    }

    pub(crate) fn record_step_completed(&self, step: &StepId, output: Value, attempts: u32) -> bool {
        self.update_step(step, |state, step| {
            if let Some(record) = state.steps.get_mut(step) {
                record.status = NodeState::Completed;
                record.attempts = attempts;
                record.finished_at = Some(Utc::now());
            }
            state.outputs.insert(step.clone(), output);
        })
    }

    pub(crate) fn record_step_failed(&self, step: &StepId, error: String, attempts: u32) -> bool {
        self.update_step(step, |state, step| {
            if let Some(record) = state.steps.get_mut(step) {
                record.status = NodeState::Failed;
                record.attempts = attempts;
                record.finished_at = Some(Utc::now());
                record.error = Some(error);
            }
        })
    }

    /// A step that never ran because an upstream step failed.
    pub(crate) fn record_step_blocked(&self, step: &StepId, cause: String) -> bool {
        self.record_step_failed(step, cause, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::Step;

    fn context() -> ExecutionContext {
        let workflow = Workflow::builder("wf")
            .step(Step::from_fn("a", |_| async { Ok(Value::Null) }))
            .step(Step::from_fn("b", |_| async { Ok(Value::Null) }))
            .dependency("b", "a")
            .build()
            .unwrap();
        let mut inputs = StepInputs::new();
        inputs.insert("seed".into(), Value::from(1));
        inputs.insert("a".into(), Value::from("input"));
        ExecutionContext::new(Arc::new(workflow), inputs)
    }

    #[test]
    fn test_status_is_monotonic() {
        let ctx = context();
        assert_eq!(ctx.status(), ExecutionStatus::Pending);
        assert!(ctx.transition(ExecutionStatus::Running));
        assert!(!ctx.transition(ExecutionStatus::Pending));
        assert!(ctx.transition(ExecutionStatus::Completed));
        assert!(!ctx.transition(ExecutionStatus::Failed));
        assert_eq!(ctx.status(), ExecutionStatus::Completed);
        assert!(ctx.finished_at().is_some());
    }

    #[test]
    fn test_running_transition_records_start() {
        let ctx = context();
        assert!(ctx.started_at().is_none());
        assert!(ctx.transition(ExecutionStatus::Running));
        let started = ctx.started_at().unwrap();
        assert!(started >= ctx.created_at());
        assert!(ctx.finished_at().is_none());

        assert!(ctx.transition(ExecutionStatus::Completed));
        assert_eq!(ctx.started_at(), Some(started));
        assert!(ctx.finished_at().unwrap() >= started);

        // Cancelled before running: never started
        let cancelled = context();
        assert!(cancelled.transition(ExecutionStatus::Cancelled));
        assert!(cancelled.started_at().is_none());
    }

    #[test]
    fn test_outputs_shadow_inputs() {
        let ctx = context();
        ctx.transition(ExecutionStatus::Running);
        let a = StepId::new("a");
        ctx.record_step_started(&a);
        ctx.record_step_completed(&a, Value::from("output"), 1);

        let merged = ctx.merged_inputs();
        assert_eq!(merged["a"], Value::from("output"));
        assert_eq!(merged["seed"], Value::from(1));
        assert_eq!(ctx.inputs()["a"], Value::from("input"));
    }

    #[test]
    fn test_outputs_frozen_after_terminal() {
        let ctx = context();
        ctx.transition(ExecutionStatus::Running);
        ctx.transition(ExecutionStatus::Cancelled);

        let a = StepId::new("a");
        assert!(!ctx.record_step_completed(&a, Value::from(1), 1));
        assert!(ctx.output(&a).is_none());
        assert_eq!(ctx.step_record(&a).unwrap().status, NodeState::Pending);
    }

    #[test]
    fn test_failure_bookkeeping() {
        let ctx = context();
        ctx.transition(ExecutionStatus::Running);
        let (a, b) = (StepId::new("a"), StepId::new("b"));
        ctx.record_step_failed(&a, "boom".into(), 3);
        ctx.record_step_blocked(&b, "dependency 'a' failed".into());

        assert!(ctx.has_failures());
        let record = ctx.step_record(&a).unwrap();
        assert_eq!(record.attempts, 3);
        assert_eq!(record.error.as_deref(), Some("boom"));
        assert_eq!(ctx.step_statuses()[&b], NodeState::Failed);

        assert!(ctx.fail("step failures"));
        assert_eq!(ctx.error().as_deref(), Some("step failures"));
    }
}

//! The workflow engine.
//!
//! Executions advance in wavefronts: every step whose dependencies have
//! completed is started at once, and the next wavefront is computed only
//! after all steps of the current one have finished. Step concurrency across
//! all executions is bounded by a shared semaphore.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use computegrid_core::{ExecutionId, ExecutionStatus, NodeState, StepId, WorkflowId};

use crate::context::ExecutionContext;
use crate::error::EngineError;
use crate::repository::ExecutionRepository;
use crate::retry::execute_with_retry;
use crate::step::{Step, StepInputs};
use crate::workflow::{StepGraph, Workflow};

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Steps allowed to run at once across all executions.
    pub max_parallel_steps: usize,
    /// Retry `n` of a step waits `backoff_base * n`.
    pub backoff_base: Duration,
    /// Executions allowed to be in flight at once.
    pub max_active_executions: usize,
    /// How long finished executions stay queryable.
    pub completed_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            max_parallel_steps: parallelism * 2,
            backoff_base: Duration::from_millis(1000),
            max_active_executions: 256,
            completed_ttl: Duration::from_secs(3600),
        }
    }
}

type CancelMap = Arc<Mutex<HashMap<ExecutionId, CancellationToken>>>;

/// Handle to a started execution.
pub struct ExecutionHandle {
    context: Arc<ExecutionContext>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ExecutionHandle {
    pub fn id(&self) -> &ExecutionId {
        self.context.id()
    }

    /// Live view of the execution.
    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.context
    }

    /// Request cancellation. Steps already running are abandoned.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the execution to reach a terminal status.
    pub async fn wait(self) -> Result<Arc<ExecutionContext>, EngineError> {
        if let Err(e) = self.task.await {
            self.context.fail(format!("execution task aborted: {}", e));
            return Err(EngineError::Join(e.to_string()));
        }
        Ok(self.context)
    }
}

/// Runs registered workflows.
pub struct WorkflowEngine {
    config: EngineConfig,
    repository: Arc<ExecutionRepository>,
    step_permits: Arc<Semaphore>,
    execution_permits: Arc<Semaphore>,
    running: CancelMap,
    shutdown: CancellationToken,
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl WorkflowEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            repository: Arc::new(ExecutionRepository::new(config.completed_ttl)),
            step_permits: Arc::new(Semaphore::new(config.max_parallel_steps.max(1))),
            execution_permits: Arc::new(Semaphore::new(config.max_active_executions.max(1))),
            running: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn repository(&self) -> &Arc<ExecutionRepository> {
        &self.repository
    }

    /// Register a workflow, replacing any definition with the same id.
    pub async fn register_workflow(&self, workflow: Workflow) -> Option<Arc<Workflow>> {
        let id = workflow.id().clone();
        let steps = workflow.steps().len();
        let previous = self.repository.register(workflow).await;
        if previous.is_some() {
            warn!(workflow_id = %id, steps, "Replaced existing workflow definition");
        } else {
            info!(workflow_id = %id, steps, "Registered workflow");
        }
        previous
    }

    pub async fn workflow(&self, id: &WorkflowId) -> Option<Arc<Workflow>> {
        self.repository.workflow(id).await
    }

    pub async fn workflow_ids(&self) -> Vec<WorkflowId> {
        self.repository.workflow_ids().await
    }

    /// Start an execution of a registered workflow.
    pub async fn execute(
        &self,
        workflow_id: &WorkflowId,
        inputs: StepInputs,
    ) -> Result<ExecutionHandle, EngineError> {
        if self.shutdown.is_cancelled() {
            return Err(EngineError::ShuttingDown);
        }
        let workflow = self
            .repository
            .workflow(workflow_id)
            .await
            .ok_or_else(|| EngineError::UnknownWorkflow(workflow_id.clone()))?;

        let admission = self
            .execution_permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| EngineError::Overloaded {
                limit: self.config.max_active_executions,
            })?;

        self.repository.evict_expired().await;

        let context = Arc::new(ExecutionContext::new(workflow, inputs));
        self.repository.insert_execution(context.clone()).await;

        let cancel = self.shutdown.child_token();
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(context.id().clone(), cancel.clone());

        let runner = Runner {
            context: context.clone(),
            step_permits: self.step_permits.clone(),
            backoff_base: self.config.backoff_base,
            cancel: cancel.clone(),
        };
        let running = self.running.clone();
        let task = tokio::spawn(async move {
            let id = runner.context.id().clone();
            runner.run(admission).await;
            running
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
        });

        Ok(ExecutionHandle {
            context,
            cancel,
            task,
        })
    }

    /// Start an execution and wait for it to finish.
    pub async fn run(
        &self,
        workflow_id: &WorkflowId,
        inputs: StepInputs,
    ) -> Result<Arc<ExecutionContext>, EngineError> {
        self.execute(workflow_id, inputs).await?.wait().await
    }

    pub async fn get_execution(&self, id: &ExecutionId) -> Option<Arc<ExecutionContext>> {
        self.repository.execution(id).await
    }

    /// Tracked executions, oldest first.
    pub async fn list_executions(&self) -> Vec<Arc<ExecutionContext>> {
        self.repository.executions().await
    }

    /// Number of executions currently holding an admission slot.
    pub fn active_executions(&self) -> usize {
        self.config.max_active_executions.max(1) - self.execution_permits.available_permits()
    }

    /// Cancel a running execution. Cancelling a finished one is a no-op.
    pub async fn cancel(&self, id: &ExecutionId) -> Result<(), EngineError> {
        let token = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned();
        match token {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None if self.repository.execution(id).await.is_some() => Ok(()),
            None => Err(EngineError::UnknownExecution(id.clone())),
        }
    }

    /// Cancel every running execution and refuse new ones.
    pub fn shutdown(&self) {
        info!("Shutting down workflow engine");
        self.shutdown.cancel();
    }
}

struct Runner {
    context: Arc<ExecutionContext>,
    step_permits: Arc<Semaphore>,
    backoff_base: Duration,
    cancel: CancellationToken,
}

impl Runner {
    #[instrument(
        name = "workflow_execution",
        skip_all,
        fields(
            execution_id = %self.context.id(),
            workflow_id = %self.context.workflow().id(),
        )
    )]
    async fn run(self, _admission: OwnedSemaphorePermit) {
        let ctx = &self.context;
        if self.cancel.is_cancelled() {
            ctx.transition(ExecutionStatus::Cancelled);
            warn!("Execution cancelled before start");
            return;
        }
        if !ctx.transition(ExecutionStatus::Running) {
            return;
        }
        info!("Execution started");

        let graph = match ctx.workflow().dependency_graph() {
            Ok(graph) => Arc::new(graph),
            Err(e) => {
                error!(error = %e, "Failed to build dependency graph");
                ctx.fail(e.to_string());
                return;
            }
        };

        let mut wavefront = 0usize;
        loop {
            if self.cancel.is_cancelled() {
                ctx.transition(ExecutionStatus::Cancelled);
                warn!(wavefront, "Execution cancelled");
                return;
            }
            if graph.is_complete() {
                break;
            }

            let ready = graph.ready_tasks();
            if ready.is_empty() {
                // Nothing runs between wavefronts, so an incomplete graph with
                // no ready step can never make progress.
                self.fail_stalled(&graph);
                return;
            }

            wavefront += 1;
            let ids: Vec<StepId> = ready.iter().map(|(id, _)| id.clone()).collect();
            info!(wavefront, steps = ?ids, "Starting wavefront");

            let mut tasks = Vec::with_capacity(ready.len());
            for (step_id, step) in ready {
                if let Err(e) = graph.mark_started(&step_id) {
                    warn!(step_id = %step_id, error = %e, "Unexpected step state");
                }
                let inputs = ctx.merged_inputs();
                tasks.push(tokio::spawn(run_step(
                    ctx.clone(),
                    graph.clone(),
                    step,
                    inputs,
                    self.step_permits.clone(),
                    self.backoff_base,
                )));
            }

            let results = tokio::select! {
                results = join_all(tasks) => results,
                _ = self.cancel.cancelled() => {
                    ctx.transition(ExecutionStatus::Cancelled);
                    warn!(wavefront, "Execution cancelled");
                    return;
                }
            };

            for (step_id, result) in ids.iter().zip(results) {
                if let Err(e) = result {
                    fail_step(ctx, &graph, step_id, format!("step task aborted: {}", e), 1);
                }
            }
        }

        if ctx.has_failures() {
            ctx.fail("one or more steps failed");
            error!(wavefronts = wavefront, "Execution failed");
        } else {
            ctx.transition(ExecutionStatus::Completed);
            info!(wavefronts = wavefront, "Execution completed");
        }
    }

    fn fail_stalled(&self, graph: &StepGraph) {
        let stuck: Vec<StepId> = graph
            .ids()
            .into_iter()
            .filter(|id| graph.state(id) == Some(NodeState::Pending))
            .collect();
        error!(steps = ?stuck, "Execution stalled with no runnable steps");
        for id in &stuck {
            self.context
                .record_step_blocked(id, "no runnable path to this step".to_string());
        }
        self.context.fail("execution stalled: no runnable steps remain");
    }
}

async fn run_step(
    ctx: Arc<ExecutionContext>,
    graph: Arc<StepGraph>,
    step: Step,
    inputs: StepInputs,
    permits: Arc<Semaphore>,
    backoff_base: Duration,
) {
    let step_id = step.id().clone();
    let _permit = match permits.acquire_owned().await {
        Ok(permit) => permit,
        Err(e) => {
            fail_step(&ctx, &graph, &step_id, e.to_string(), 0);
            return;
        }
    };

    ctx.record_step_started(&step_id);
    info!(step_id = %step_id, "Step started");

    match execute_with_retry(&step, &inputs, backoff_base).await {
        Ok(success) => {
            if let Err(e) = graph.mark_completed(&step_id, success.output.clone()) {
                warn!(step_id = %step_id, error = %e, "Unexpected step state");
            }
            ctx.record_step_completed(&step_id, success.output, success.attempts);
            info!(step_id = %step_id, attempts = success.attempts, "Step completed");
        }
        Err(failure) => {
            fail_step(
                &ctx,
                &graph,
                &step_id,
                failure.error.to_string(),
                failure.attempts,
            );
        }
    }
}

fn fail_step(
    ctx: &ExecutionContext,
    graph: &StepGraph,
    step_id: &StepId,
    message: String,
    attempts: u32,
) {
    error!(step_id = %step_id, attempts, error = %message, "Step failed");
    let blocked = graph
        .mark_failed(step_id, message.clone())
        .unwrap_or_default();
    ctx.record_step_failed(step_id, message, attempts);
    for id in blocked {
        let cause = graph
            .error(&id)
            .unwrap_or_else(|| format!("dependency '{}' failed", step_id));
        warn!(step_id = %id, cause = %cause, "Step blocked");
        ctx.record_step_blocked(&id, cause);
    }
}

//! In-memory registry of workflows and executions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use computegrid_core::{ExecutionId, WorkflowId};

use crate::context::ExecutionContext;
use crate::workflow::Workflow;

/// Workflow definitions and the executions started from them.
pub struct ExecutionRepository {
    workflows: RwLock<HashMap<WorkflowId, Arc<Workflow>>>,
    executions: RwLock<HashMap<ExecutionId, Arc<ExecutionContext>>>,
    /// How long terminal executions stay queryable.
    completed_ttl: Duration,
}

impl ExecutionRepository {
    pub fn new(completed_ttl: Duration) -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
            executions: RwLock::new(HashMap::new()),
            completed_ttl,
        }
    }

    /// Register a workflow, replacing any previous definition with the same
    /// id. Running executions keep the definition they started with.
    pub async fn register(&self, workflow: Workflow) -> Option<Arc<Workflow>> {
        let id = workflow.id().clone();
        self.workflows.write().await.insert(id, Arc::new(workflow))
    }

    pub async fn workflow(&self, id: &WorkflowId) -> Option<Arc<Workflow>> {
        self.workflows.read().await.get(id).cloned()
    }

    pub async fn workflow_ids(&self) -> Vec<WorkflowId> {
        let mut ids: Vec<_> = self.workflows.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn insert_execution(&self, context: Arc<ExecutionContext>) {
        self.executions
            .write()
            .await
            .insert(context.id().clone(), context);
    }

    pub async fn execution(&self, id: &ExecutionId) -> Option<Arc<ExecutionContext>> {
        self.executions.read().await.get(id).cloned()
    }

    /// All tracked executions, oldest first.
    pub async fn executions(&self) -> Vec<Arc<ExecutionContext>> {
        let mut all: Vec<_> = self.executions.read().await.values().cloned().collect();
        all.sort_by_key(|c| c.created_at());
        all
    }

    pub async fn execution_count(&self) -> usize {
        self.executions.read().await.len()
    }

    /// Drop terminal executions that finished longer than the TTL ago.
    pub async fn evict_expired(&self) -> usize {
        let ttl = chrono::Duration::from_std(self.completed_ttl).unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();
        let mut executions = self.executions.write().await;
        let before = executions.len();
        executions.retain(|_, ctx| match ctx.finished_at() {
            Some(finished) if ctx.is_terminal() => now - finished < ttl,
            _ => true,
        });
        let evicted = before - executions.len();
        if evicted > 0 {
            debug!(evicted, "Evicted expired executions");
        }
        evicted
    }
}

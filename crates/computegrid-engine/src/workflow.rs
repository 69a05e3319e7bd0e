//! Workflow definitions.
//!
//! A [`Workflow`] is validated once, when it is built: step ids are unique,
//! every dependency edge names known steps, and the dependency relation is
//! acyclic. Executions therefore never start on a graph that cannot finish.

use std::collections::HashSet;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use serde_json::Value;

use computegrid_core::{DependencyGraph, StepId, WorkflowId};

use crate::error::EngineError;
use crate::step::Step;

/// Graph type a workflow instantiates per execution.
pub type StepGraph = DependencyGraph<StepId, Step, Value>;

/// A validated DAG of steps.
#[derive(Debug, Clone)]
pub struct Workflow {
    id: WorkflowId,
    name: String,
    steps: Vec<Step>,
    /// `(step, depends_on)` pairs.
    dependencies: Vec<(StepId, StepId)>,
    /// A topological order of step ids.
    order: Vec<StepId>,
}

impl Workflow {
    pub fn builder(id: impl Into<WorkflowId>) -> WorkflowBuilder {
        WorkflowBuilder::new(id)
    }

    pub fn id(&self) -> &WorkflowId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step(&self, id: &StepId) -> Option<&Step> {
        self.steps.iter().find(|s| s.id() == id)
    }

    pub fn dependencies(&self) -> &[(StepId, StepId)] {
        &self.dependencies
    }

    /// Direct dependencies of `id`.
    pub fn dependencies_of(&self, id: &StepId) -> Vec<&StepId> {
        self.dependencies
            .iter()
            .filter(|(step, _)| step == id)
            .map(|(_, dep)| dep)
            .collect()
    }

    pub fn topological_order(&self) -> &[StepId] {
        &self.order
    }

    /// Build a fresh dependency graph with every step PENDING.
    pub fn dependency_graph(&self) -> Result<StepGraph, EngineError> {
        let graph = StepGraph::new();
        for step in &self.steps {
            graph.add_task(step.id().clone(), step.clone())?;
        }
        for (step, depends_on) in &self.dependencies {
            graph.add_dependency(step, depends_on)?;
        }
        Ok(graph)
    }
}

/// Builder for [`Workflow`].
#[derive(Debug)]
pub struct WorkflowBuilder {
    id: WorkflowId,
    name: Option<String>,
    steps: Vec<Step>,
    dependencies: Vec<(StepId, StepId)>,
}

impl WorkflowBuilder {
    pub fn new(id: impl Into<WorkflowId>) -> Self {
        Self {
            id: id.into(),
            name: None,
            steps: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// `step` cannot start before `depends_on` has completed.
    pub fn dependency(mut self, step: impl Into<StepId>, depends_on: impl Into<StepId>) -> Self {
        self.dependencies.push((step.into(), depends_on.into()));
        self
    }

    /// Validate and build the workflow.
    pub fn build(self) -> Result<Workflow, EngineError> {
        let invalid = |message: String| EngineError::InvalidWorkflow {
            workflow: self.id.clone(),
            message,
        };

        if self.id.is_empty() {
            return Err(invalid("workflow id must not be empty".into()));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.id().is_empty() {
                return Err(invalid("step id must not be empty".into()));
            }
            if !seen.insert(step.id().as_str()) {
                return Err(invalid(format!("duplicate step '{}'", step.id())));
            }
        }

        // Edge direction: depends_on -> step
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for step in &self.steps {
            graph.add_node(step.id().as_str());
        }
        for (step, depends_on) in &self.dependencies {
            for id in [step, depends_on] {
                if !seen.contains(id.as_str()) {
                    return Err(invalid(format!("dependency references unknown step '{}'", id)));
                }
            }
            if step == depends_on {
                return Err(invalid(format!("step '{}' depends on itself", step)));
            }
            graph.add_edge(depends_on.as_str(), step.as_str(), ());
        }

        let order = match toposort(&graph, None) {
            Ok(order) => order.into_iter().map(StepId::from).collect(),
            Err(cycle) => {
                return Err(invalid(format!(
                    "cycle detected involving step '{}'",
                    cycle.node_id()
                )))
            }
        };

        let mut dependencies = self.dependencies.clone();
        dependencies.dedup();

        Ok(Workflow {
            name: self.name.clone().unwrap_or_else(|| self.id.to_string()),
            id: self.id.clone(),
            steps: self.steps.clone(),
            dependencies,
            order,
        })
    }
}

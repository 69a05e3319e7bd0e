//! Local demo workflow: Monte Carlo pi batches fanned out and merged.

use std::time::Duration;

use serde_json::{json, Value};

use computegrid_core::ProviderRegistry;
use computegrid_engine::{ActionError, EngineError, Step, StepInputs, TaskAction, Workflow};
use computegrid_kernels::{PiEstimate, MONTE_CARLO_PI};

/// Id of the workflow built by [`pi_workflow`].
pub const DEMO_WORKFLOW: &str = "pi-fan-out";

/// Id of the final step.
pub const MERGE_STEP: &str = "merge";

/// Options for [`pi_workflow`].
#[derive(Debug, Clone)]
pub struct DemoOptions {
    pub batches: usize,
    pub samples_per_batch: u64,
    pub retries: u32,
    pub timeout: Option<Duration>,
}

fn batch_id(index: usize) -> String {
    format!("batch-{}", index)
}

/// `batches` independent sampling steps followed by a merge step that
/// depends on all of them.
pub fn pi_workflow(registry: &ProviderRegistry, opts: &DemoOptions) -> Result<Workflow, EngineError> {
    let mut builder = Workflow::builder(DEMO_WORKFLOW).name("Monte Carlo pi fan-out");

    for index in 0..opts.batches {
        let action = TaskAction::new(registry.clone(), MONTE_CARLO_PI).args(json!({
            "samples": opts.samples_per_batch,
            "seed": index as u64,
        }));
        let mut step = Step::new(batch_id(index), action)
            .name(format!("Sample batch {}", index))
            .retries(opts.retries);
        if let Some(timeout) = opts.timeout {
            step = step.timeout(timeout);
        }
        builder = builder.step(step);
    }

    let batches = opts.batches;
    builder = builder.step(
        Step::from_fn(MERGE_STEP, move |inputs| async move { merge(&inputs, batches) })
            .name("Merge estimates"),
    );
    for index in 0..opts.batches {
        builder = builder.dependency(MERGE_STEP, batch_id(index));
    }

    builder.build()
}

fn merge(inputs: &StepInputs, batches: usize) -> Result<Value, ActionError> {
    let estimates = (0..batches)
        .map(|index| {
            let id = batch_id(index);
            let output = inputs
                .get(&id)
                .cloned()
                .ok_or_else(|| ActionError::msg(format!("missing output of '{}'", id)))?;
            serde_json::from_value::<PiEstimate>(output)
                .map_err(|e| ActionError::msg(format!("bad output of '{}': {}", id, e)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let merged = PiEstimate::merge(&estimates);
    serde_json::to_value(merged).map_err(|e| ActionError::msg(e.to_string()))
}

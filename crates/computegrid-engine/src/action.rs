//! Provider-backed step actions.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use computegrid_core::{Precision, ProviderRegistry};

use crate::error::ActionError;
use crate::step::{StepAction, StepInputs};

/// Where a [`TaskAction`] takes its task arguments from.
#[derive(Debug, Clone)]
enum ArgsSource {
    /// Fixed arguments set at definition time.
    Fixed(Value),
    /// A single entry of the step inputs.
    Input(String),
    /// All step inputs as one JSON object.
    AllInputs,
}

/// Runs a registered [`computegrid_core::DistributedTask`] as a workflow step.
///
/// The task is resolved from the registry on every attempt and executed on
/// the blocking pool.
#[derive(Clone)]
pub struct TaskAction {
    registry: ProviderRegistry,
    task_type: String,
    precision: Option<Precision>,
    args: ArgsSource,
}

impl TaskAction {
    pub fn new(registry: ProviderRegistry, task_type: impl Into<String>) -> Self {
        Self {
            registry,
            task_type: task_type.into(),
            precision: None,
            args: ArgsSource::AllInputs,
        }
    }

    pub fn precision(mut self, precision: Precision) -> Self {
        self.precision = Some(precision);
        self
    }

    /// Use fixed arguments instead of the step inputs.
    pub fn args(mut self, args: Value) -> Self {
        self.args = ArgsSource::Fixed(args);
        self
    }

    /// Use one named step input (often an upstream step id) as arguments.
    pub fn args_from(mut self, key: impl Into<String>) -> Self {
        self.args = ArgsSource::Input(key.into());
        self
    }

    fn build_args(&self, inputs: StepInputs) -> Result<Value, ActionError> {
        match &self.args {
            ArgsSource::Fixed(args) => Ok(args.clone()),
            ArgsSource::Input(key) => inputs
                .get(key)
                .cloned()
                .ok_or_else(|| ActionError::msg(format!("missing input '{}'", key))),
            ArgsSource::AllInputs => Ok(Value::Object(inputs.into_iter().collect::<Map<_, _>>())),
        }
    }
}

#[async_trait]
impl StepAction for TaskAction {
    async fn run(&self, inputs: StepInputs) -> Result<Value, ActionError> {
        let args = self.build_args(inputs)?;
        let task = self.registry.resolve(&self.task_type, self.precision)?;
        debug!(task_type = %self.task_type, "Running task on blocking pool");

        tokio::task::spawn_blocking(move || task.execute_value(args))
            .await
            .map_err(|e| ActionError::Aborted(e.to_string()))?
            .map_err(ActionError::from)
    }
}

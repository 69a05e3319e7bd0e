//! Workflow steps and the actions they run.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use computegrid_core::StepId;

use crate::error::ActionError;

/// Inputs handed to a step: execution inputs overlaid with upstream outputs
/// keyed by step id.
pub type StepInputs = HashMap<String, Value>;

/// The asynchronous unit of work behind a step.
///
/// An action may be invoked several times for one execution when the step
/// has retries configured.
#[async_trait]
pub trait StepAction: Send + Sync {
    async fn run(&self, inputs: StepInputs) -> Result<Value, ActionError>;
}

/// Adapts an async closure into a [`StepAction`].
pub struct FnAction<F>(F);

impl<F> FnAction<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> StepAction for FnAction<F>
where
    F: Fn(StepInputs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ActionError>> + Send,
{
    async fn run(&self, inputs: StepInputs) -> Result<Value, ActionError> {
        (self.0)(inputs).await
    }
}

/// A node of a workflow.
#[derive(Clone)]
pub struct Step {
    id: StepId,
    name: String,
    action: Arc<dyn StepAction>,
    retries: u32,
    timeout: Option<Duration>,
}

impl Step {
    /// Create a step with no retries and no timeout.
    pub fn new(id: impl Into<StepId>, action: impl StepAction + 'static) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            action: Arc::new(action),
            retries: 0,
            timeout: None,
        }
    }

    /// Create a step from an async closure.
    pub fn from_fn<F, Fut>(id: impl Into<StepId>, f: F) -> Self
    where
        F: Fn(StepInputs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ActionError>> + Send + 'static,
    {
        Self::new(id, FnAction::new(f))
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Additional attempts after the first failure.
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Bound on a single attempt.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn id(&self) -> &StepId {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.name
    }

    pub fn action(&self) -> &Arc<dyn StepAction> {
        &self.action
    }

    pub fn max_retries(&self) -> u32 {
        self.retries
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("retries", &self.retries)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_action_receives_inputs() {
        let step = Step::from_fn("double", |inputs: StepInputs| async move {
            let x = inputs.get("x").and_then(Value::as_i64).unwrap_or_default();
            Ok(Value::from(x * 2))
        });

        let mut inputs = StepInputs::new();
        inputs.insert("x".into(), Value::from(21));
        let out = step.action().run(inputs).await.unwrap();
        assert_eq!(out, Value::from(42));
    }

    #[test]
    fn test_builder_settings() {
        let step = Step::from_fn("s", |_| async { Ok(Value::Null) })
            .name("Render")
            .retries(3)
            .timeout(Duration::from_millis(250));

        assert_eq!(step.id().as_str(), "s");
        assert_eq!(step.display_name(), "Render");
        assert_eq!(step.max_retries(), 3);
        assert_eq!(step.attempt_timeout(), Some(Duration::from_millis(250)));
    }
}

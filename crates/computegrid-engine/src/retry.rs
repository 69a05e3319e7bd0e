//! Per-step retry with linear backoff and per-attempt timeout.

use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use crate::error::ActionError;
use crate::step::{Step, StepInputs};

/// Outcome of a step that eventually succeeded.
#[derive(Debug)]
pub struct StepSuccess {
    pub output: Value,
    pub attempts: u32,
}

/// Outcome of a step that exhausted its attempts.
#[derive(Debug)]
pub struct StepFailure {
    /// Error of the last attempt.
    pub error: ActionError,
    pub attempts: u32,
}

/// Delay before retry number `attempt` (1-based).
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(attempt)
}

async fn run_attempt(step: &Step, inputs: StepInputs) -> Result<Value, ActionError> {
    let attempt = step.action().run(inputs);
    match step.attempt_timeout() {
        Some(limit) => tokio::time::timeout(limit, attempt)
            .await
            .map_err(|_| ActionError::Timeout {
                after_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            })?,
        None => attempt.await,
    }
}

/// Run `step` up to `1 + retries` times.
///
/// After failed attempt `n` the step sleeps `backoff_base * n` before the
/// next attempt. Every attempt gets a fresh copy of `inputs`.
pub async fn execute_with_retry(
    step: &Step,
    inputs: &StepInputs,
    backoff_base: Duration,
) -> Result<StepSuccess, StepFailure> {
    let mut attempts = 0u32;
    loop {
        let result = run_attempt(step, inputs.clone()).await;
        attempts += 1;
        match result {
            Ok(output) => return Ok(StepSuccess { output, attempts }),
            Err(error) if attempts > step.max_retries() => {
                return Err(StepFailure { error, attempts })
            }
            Err(error) => {
                let delay = backoff_delay(backoff_base, attempts);
                warn!(
                    step_id = %step.id(),
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Step attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

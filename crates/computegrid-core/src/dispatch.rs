//! Dispatch records tracking tasks handed to the dispatcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{DispatchStatus, TaskId};

/// Lifecycle record of one dispatched task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRecord {
    /// Task identifier (caller-supplied or generated).
    pub task_id: TaskId,

    /// Task type from the envelope, once decoded.
    pub task_type: Option<String>,

    /// Current status.
    pub status: DispatchStatus,

    /// Principal that submitted the task.
    pub submitted_by: String,

    /// When the task was accepted.
    pub submitted_at: DateTime<Utc>,

    /// When a pool worker picked the task up.
    pub started_at: Option<DateTime<Utc>>,

    /// When the task reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,

    /// Kernel output, if completed.
    pub output: Option<Value>,

    /// Error message, if failed.
    pub error_message: Option<String>,
}

impl DispatchRecord {
    /// Create a QUEUED record.
    pub fn queued(task_id: TaskId, submitted_by: impl Into<String>) -> Self {
        Self {
            task_id,
            task_type: None,
            status: DispatchStatus::Queued,
            submitted_by: submitted_by.into(),
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            output: None,
            error_message: None,
        }
    }

    /// Mark the task as picked up by a worker.
    pub fn start(&mut self) {
        self.status = DispatchStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Mark the task as completed with its output.
    pub fn complete(&mut self, output: Value) {
        self.status = DispatchStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.output = Some(output);
    }

    /// Mark the task as failed.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = DispatchStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error_message = Some(error.into());
    }

    /// Mark the task as refused at admission.
    pub fn reject(&mut self, reason: impl Into<String>) {
        self.status = DispatchStatus::Rejected;
        self.finished_at = Some(Utc::now());
        self.error_message = Some(reason.into());
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Milliseconds between pickup and completion, if both are known.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_lifecycle() {
        let mut record = DispatchRecord::queued(TaskId::new("t-1"), "alice");
        assert_eq!(record.status, DispatchStatus::Queued);
        assert!(!record.is_terminal());

        record.start();
        assert_eq!(record.status, DispatchStatus::Running);
        assert!(record.started_at.is_some());

        record.complete(Value::from(2.5));
        assert!(record.is_terminal());
        assert!(record.duration_ms().unwrap() >= 0);
    }

    #[test]
    fn test_record_failure_keeps_message() {
        let mut record = DispatchRecord::queued(TaskId::generate(), "bob");
        record.start();
        record.fail("Unknown task type: warp");
        assert_eq!(record.status, DispatchStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some("Unknown task type: warp"));
    }

    #[test]
    fn test_rejected_record_is_terminal() {
        let mut record = DispatchRecord::queued(TaskId::generate(), "carol");
        record.reject("queue full");
        assert!(record.is_terminal());
        assert_eq!(record.status, DispatchStatus::Rejected);
        assert!(record.duration_ms().is_none());
    }
}

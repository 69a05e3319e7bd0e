//! Converters between proto types and domain types.

use crate::pb;
use computegrid_core::{DispatchRecord, DispatchStatus, Precision, TaskKind};

// ============================================================================
// DispatchStatus conversions
// ============================================================================

impl From<DispatchStatus> for pb::DispatchStatus {
    fn from(status: DispatchStatus) -> Self {
        match status {
            DispatchStatus::Queued => pb::DispatchStatus::Queued,
            DispatchStatus::Running => pb::DispatchStatus::Running,
            DispatchStatus::Completed => pb::DispatchStatus::Completed,
            DispatchStatus::Failed => pb::DispatchStatus::Failed,
            DispatchStatus::Rejected => pb::DispatchStatus::Rejected,
        }
    }
}

impl From<pb::DispatchStatus> for DispatchStatus {
    fn from(status: pb::DispatchStatus) -> Self {
        match status {
            pb::DispatchStatus::Unspecified => DispatchStatus::Queued,
            pb::DispatchStatus::Queued => DispatchStatus::Queued,
            pb::DispatchStatus::Running => DispatchStatus::Running,
            pb::DispatchStatus::Completed => DispatchStatus::Completed,
            pb::DispatchStatus::Failed => DispatchStatus::Failed,
            pb::DispatchStatus::Rejected => DispatchStatus::Rejected,
        }
    }
}

// ============================================================================
// Precision conversions
// ============================================================================

impl From<Precision> for pb::Precision {
    fn from(precision: Precision) -> Self {
        match precision {
            Precision::Standard => pb::Precision::Standard,
            Precision::High => pb::Precision::High,
        }
    }
}

impl From<pb::Precision> for Precision {
    fn from(precision: pb::Precision) -> Self {
        match precision {
            pb::Precision::Unspecified => Precision::Standard,
            pb::Precision::Standard => Precision::Standard,
            pb::Precision::High => Precision::High,
        }
    }
}

// ============================================================================
// TaskKind conversions
// ============================================================================

impl From<TaskKind> for pb::TaskKind {
    fn from(kind: TaskKind) -> Self {
        pb::TaskKind {
            task_type: kind.task_type,
            precision: pb::Precision::from(kind.precision).into(),
        }
    }
}

impl From<pb::TaskKind> for TaskKind {
    fn from(proto: pb::TaskKind) -> Self {
        TaskKind {
            precision: proto.precision().into(),
            task_type: proto.task_type,
        }
    }
}

// ============================================================================
// DispatchRecord conversions
// ============================================================================

impl From<&DispatchRecord> for pb::TaskResult {
    fn from(record: &DispatchRecord) -> Self {
        pb::TaskResult {
            task_id: record.task_id.to_string(),
            status: pb::DispatchStatus::from(record.status).into(),
            output: record
                .output
                .as_ref()
                .and_then(|v| serde_json::to_vec(v).ok())
                .unwrap_or_default(),
            error_message: record.error_message.clone().unwrap_or_default(),
            finished_at_ms: record
                .finished_at
                .map(|t| t.timestamp_millis())
                .unwrap_or_default(),
            task_type: record.task_type.clone().unwrap_or_default(),
        }
    }
}

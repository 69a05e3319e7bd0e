//! Versioned wire envelope for dispatched tasks.
//!
//! Payloads submitted to the dispatcher are JSON documents carrying a format
//! version, the task type, the requested precision and the task arguments.
//! Arguments stay as untyped JSON until the registry resolves a provider and
//! the provider's task decodes them into its own input type.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TaskError;
use crate::task::{Precision, ProviderRegistry};

/// Envelope format version produced by this build.
pub const ENVELOPE_VERSION: u32 = 1;

/// Upper bound on an encoded envelope.
pub const MAX_ENVELOPE_BYTES: usize = 4 * 1024 * 1024;

/// A task as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub version: u32,
    pub task_type: String,
    #[serde(default)]
    pub precision: Precision,
    #[serde(default)]
    pub args: Value,
}

impl TaskEnvelope {
    /// Create an envelope at the current version.
    pub fn new(task_type: impl Into<String>, precision: Precision, args: Value) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            task_type: task_type.into(),
            precision,
            args,
        }
    }

    /// Create an envelope, serializing typed arguments.
    pub fn with_args<A: Serialize>(
        task_type: impl Into<String>,
        precision: Precision,
        args: &A,
    ) -> Result<Self, TaskError> {
        let args = serde_json::to_value(args).map_err(|e| TaskError::Serialization(e.to_string()))?;
        Ok(Self::new(task_type, precision, args))
    }

    /// Encode to bytes.
    pub fn encode(&self) -> Result<Vec<u8>, TaskError> {
        serde_json::to_vec(self).map_err(|e| TaskError::Serialization(e.to_string()))
    }

    /// Decode from bytes, rejecting oversized payloads and unknown versions.
    pub fn decode(bytes: &[u8]) -> Result<Self, TaskError> {
        if bytes.is_empty() {
            return Err(TaskError::InvalidPayload("empty payload".to_string()));
        }
        if bytes.len() > MAX_ENVELOPE_BYTES {
            return Err(TaskError::InvalidPayload(format!(
                "payload of {} bytes exceeds limit of {}",
                bytes.len(),
                MAX_ENVELOPE_BYTES
            )));
        }
        let envelope: TaskEnvelope = serde_json::from_slice(bytes)?;
        if envelope.version != ENVELOPE_VERSION {
            return Err(TaskError::UnsupportedVersion {
                found: envelope.version,
                expected: ENVELOPE_VERSION,
            });
        }
        if envelope.task_type.is_empty() {
            return Err(TaskError::InvalidPayload("task_type is required".to_string()));
        }
        Ok(envelope)
    }

    /// Resolve the provider and run the task synchronously.
    pub fn run(self, registry: &ProviderRegistry) -> Result<Value, TaskError> {
        let task = registry.resolve(&self.task_type, Some(self.precision))?;
        task.execute_value(self.args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_accepts_current_version() {
        let bytes = br#"{"version":1,"task_type":"monte_carlo_pi","args":{"samples":10}}"#;
        let envelope = TaskEnvelope::decode(bytes).unwrap();
        assert_eq!(envelope.task_type, "monte_carlo_pi");
        assert_eq!(envelope.precision, Precision::Standard);
        assert_eq!(envelope.args, json!({"samples": 10}));
    }

    #[test]
    fn test_decode_rejects_unknown_version() {
        let bytes = br#"{"version":7,"task_type":"x"}"#;
        assert!(matches!(
            TaskEnvelope::decode(bytes),
            Err(TaskError::UnsupportedVersion { found: 7, .. })
        ));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            TaskEnvelope::decode(b"\xac\xed\x00\x05sr"),
            Err(TaskError::InvalidPayload(_))
        ));
        assert!(matches!(
            TaskEnvelope::decode(b""),
            Err(TaskError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_encode_then_decode_keeps_precision() {
        let envelope = TaskEnvelope::new("mandelbrot", Precision::High, json!({"width": 4}));
        let decoded = TaskEnvelope::decode(&envelope.encode().unwrap()).unwrap();
        assert_eq!(decoded, envelope);
    }
}

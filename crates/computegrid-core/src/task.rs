//! Task abstraction and provider registry.
//!
//! A [`DistributedTask`] is a typed unit of work. Providers construct tasks
//! for a `(task_type, precision)` pair and are collected into an immutable
//! [`ProviderRegistry`] at startup. The scheduler and the dispatcher only
//! ever see the type-erased [`ErasedTask`] view, which speaks JSON.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TaskError;

/// Numeric precision / implementation variant of a task type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Precision {
    /// Fast, lower-precision implementation.
    #[default]
    Standard,
    /// Slower, higher-precision implementation.
    High,
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precision::Standard => f.write_str("standard"),
            Precision::High => f.write_str("high"),
        }
    }
}

/// A typed unit of work.
///
/// `execute` must be callable repeatedly with different inputs; any state a
/// task keeps between calls must be explicitly scoped by the implementor.
pub trait DistributedTask: Send + Sync {
    /// Input decoded from the wire.
    type Input: DeserializeOwned + Send;
    /// Output encoded back onto the wire.
    type Output: Serialize + Send;

    /// Logical task type used for routing.
    fn task_type(&self) -> &str;

    /// Run the computation.
    fn execute(&self, input: Self::Input) -> Result<Self::Output, TaskError>;
}

/// JSON-in/JSON-out view of a [`DistributedTask`].
pub trait ErasedTask: Send + Sync {
    /// Logical task type used for routing.
    fn task_type(&self) -> &str;

    /// Decode `input`, run the task and encode the output.
    fn execute_value(&self, input: Value) -> Result<Value, TaskError>;
}

impl<T> ErasedTask for T
where
    T: DistributedTask,
{
    fn task_type(&self) -> &str {
        DistributedTask::task_type(self)
    }

    fn execute_value(&self, input: Value) -> Result<Value, TaskError> {
        let input: T::Input = serde_json::from_value(input)?;
        let output = self.execute(input)?;
        serde_json::to_value(output).map_err(|e| TaskError::Serialization(e.to_string()))
    }
}

/// Factory for one `(task_type, precision)` combination.
pub trait TaskProvider: Send + Sync {
    /// Task type this provider serves.
    fn task_type(&self) -> &str;

    /// Precision this provider serves.
    fn precision(&self) -> Precision {
        Precision::Standard
    }

    /// Create a fresh task instance.
    fn create(&self) -> Box<dyn ErasedTask>;
}

/// Enumerable description of a registered task kind.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskKind {
    pub task_type: String,
    pub precision: Precision,
}

/// Immutable registry of task providers.
///
/// Built once through [`ProviderRegistry::builder`] and shared behind an
/// `Arc`; lookups never contend with writers.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Arc<BTreeMap<(String, Precision), Arc<dyn TaskProvider>>>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("kinds", &self.task_kinds())
            .finish()
    }
}

impl ProviderRegistry {
    /// Start building a registry.
    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::default()
    }

    /// Create a task for `task_type`.
    ///
    /// `None` selects [`Precision::Standard`].
    pub fn resolve(
        &self,
        task_type: &str,
        precision: Option<Precision>,
    ) -> Result<Box<dyn ErasedTask>, TaskError> {
        let precision = precision.unwrap_or_default();
        if let Some(provider) = self.providers.get(&(task_type.to_string(), precision)) {
            return Ok(provider.create());
        }
        if self.providers.keys().any(|(t, _)| t == task_type) {
            Err(TaskError::UnsupportedPrecision {
                task_type: task_type.to_string(),
                precision: precision.to_string(),
            })
        } else {
            Err(TaskError::UnknownTaskType(task_type.to_string()))
        }
    }

    /// All registered task kinds, sorted.
    pub fn task_kinds(&self) -> Vec<TaskKind> {
        self.providers
            .keys()
            .map(|(task_type, precision)| TaskKind {
                task_type: task_type.clone(),
                precision: *precision,
            })
            .collect()
    }

    /// Returns true if at least one provider serves `task_type`.
    pub fn contains(&self, task_type: &str) -> bool {
        self.providers.keys().any(|(t, _)| t == task_type)
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Returns true if no provider is registered.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Builder for [`ProviderRegistry`].
#[derive(Default)]
pub struct ProviderRegistryBuilder {
    providers: BTreeMap<(String, Precision), Arc<dyn TaskProvider>>,
}

impl ProviderRegistryBuilder {
    /// Register a provider. A later provider for the same
    /// `(task_type, precision)` replaces the earlier one.
    pub fn register<P>(mut self, provider: P) -> Self
    where
        P: TaskProvider + 'static,
    {
        let key = (provider.task_type().to_string(), provider.precision());
        self.providers.insert(key, Arc::new(provider));
        self
    }

    /// Freeze the registry.
    pub fn build(self) -> ProviderRegistry {
        ProviderRegistry {
            providers: Arc::new(self.providers),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Doubler;

    impl DistributedTask for Doubler {
        type Input = i64;
        type Output = i64;

        fn task_type(&self) -> &str {
            "double"
        }

        fn execute(&self, input: i64) -> Result<i64, TaskError> {
            input
                .checked_mul(2)
                .ok_or_else(|| TaskError::Execution("overflow".to_string()))
        }
    }

    struct DoublerProvider(Precision);

    impl TaskProvider for DoublerProvider {
        fn task_type(&self) -> &str {
            "double"
        }

        fn precision(&self) -> Precision {
            self.0
        }

        fn create(&self) -> Box<dyn ErasedTask> {
            Box::new(Doubler)
        }
    }

    #[test]
    fn test_resolve_defaults_to_standard() {
        let registry = ProviderRegistry::builder()
            .register(DoublerProvider(Precision::Standard))
            .build();

        let task = registry.resolve("double", None).unwrap();
        assert_eq!(task.task_type(), "double");
        assert_eq!(task.execute_value(Value::from(21)).unwrap(), Value::from(42));
    }

    #[test]
    fn test_resolve_errors() {
        let registry = ProviderRegistry::builder()
            .register(DoublerProvider(Precision::Standard))
            .build();

        assert!(matches!(
            registry.resolve("triple", None),
            Err(TaskError::UnknownTaskType(_))
        ));
        assert!(matches!(
            registry.resolve("double", Some(Precision::High)),
            Err(TaskError::UnsupportedPrecision { .. })
        ));
    }

    #[test]
    fn test_erased_task_rejects_bad_input() {
        let task: Box<dyn ErasedTask> = Box::new(Doubler);
        let err = task.execute_value(Value::from("twenty")).unwrap_err();
        assert!(matches!(err, TaskError::InvalidPayload(_)));

        let err = task.execute_value(Value::from(i64::MAX)).unwrap_err();
        assert!(matches!(err, TaskError::Execution(_)));
    }

    #[test]
    fn test_task_kinds_are_enumerable() {
        let registry = ProviderRegistry::builder()
            .register(DoublerProvider(Precision::High))
            .register(DoublerProvider(Precision::Standard))
            .build();

        let kinds = registry.task_kinds();
        assert_eq!(kinds.len(), 2);
        assert_eq!(kinds[0].precision, Precision::Standard);
        assert!(registry.contains("double"));
    }
}

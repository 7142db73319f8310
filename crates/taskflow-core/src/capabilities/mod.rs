//! Capabilities: named, non-generative actions a workflow step can invoke.
//!
//! A capability returns `Ok(outcome)` for any result it can explain,
//! including documented reduced-functionality results (`StepOutcome::degraded`)
//! and its own verdict that the action failed (`StepOutcome::failed`).
//! `Err` is reserved for unexpected failures; those are retried by the
//! step executor.

pub mod code_exec;
pub mod file_ops;
pub mod registry;
pub mod web_search;

use async_trait::async_trait;
use serde_json::Value;

use crate::models::{Metadata, StepOutcome, StepResults, Task};

pub use crate::workflow::schema::Parameters;
pub use code_exec::CodeExecutionCapability;
pub use file_ops::FileOperationsCapability;
pub use registry::CapabilityRegistry;
pub use web_search::WebSearchCapability;

#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("{0}")]
    Other(String),
}

/// Read-only view of the task a capability runs for.
pub struct CapabilityContext<'a> {
    pub task_id: &'a str,
    pub task_type: &'a str,
    pub content: &'a str,
    pub metadata: &'a Metadata,
    pub step_results: &'a StepResults,
    /// Name of the step being executed.
    pub step_name: &'a str,
}

impl<'a> CapabilityContext<'a> {
    pub fn new(task: &'a Task, step_name: &'a str) -> Self {
        Self {
            task_id: &task.id,
            task_type: &task.task_type,
            content: &task.content,
            metadata: &task.metadata,
            step_results: &task.step_results,
            step_name,
        }
    }

    /// A string setting taken from parameters first, then task metadata.
    pub fn setting(&self, params: &Parameters, key: &str) -> Option<String> {
        params
            .get(key)
            .or_else(|| self.metadata.get(key))
            .and_then(value_as_string)
            .filter(|s| !s.is_empty())
    }

    /// A boolean setting taken from parameters first, then task metadata.
    pub fn flag(&self, params: &Parameters, key: &str, default: bool) -> bool {
        match params.get(key).or_else(|| self.metadata.get(key)) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => true,
                "false" | "no" | "0" => false,
                _ => default,
            },
            Some(Value::Number(n)) => n.as_i64().map(|n| n != 0).unwrap_or(default),
            _ => default,
        }
    }
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(
        &self,
        ctx: &CapabilityContext<'_>,
        params: &Parameters,
    ) -> Result<StepOutcome, CapabilityError>;
}

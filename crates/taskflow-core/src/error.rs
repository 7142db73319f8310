//! Core error type for the Taskflow engine.
//!
//! `EngineError` is used throughout the core (stores, definitions, engine).
//! The first five variants form the task-level failure taxonomy; their
//! `Display` output is what ends up in a failed task's `error` field.

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("Malformed workflow '{workflow}': {reason}")]
    MalformedWorkflow { workflow: String, reason: String },

    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    #[error("Capability failure in step '{step}': {message}")]
    CapabilityFailure { step: String, message: String },

    #[error("Generation failure in step '{step}': {message}")]
    GenerationFailure { step: String, message: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn malformed(workflow: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedWorkflow {
            workflow: workflow.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error is fatal to a single task rather than to the engine.
    ///
    /// Task-level errors are recorded on the task; everything else is an
    /// infrastructure problem the caller has to deal with.
    pub fn is_task_level(&self) -> bool {
        matches!(
            self,
            Self::UnknownTaskType(_)
                | Self::MalformedWorkflow { .. }
                | Self::UnknownCapability(_)
                | Self::CapabilityFailure { .. }
                | Self::GenerationFailure { .. }
        )
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(format!("JSON encoding failed: {}", e))
    }
}

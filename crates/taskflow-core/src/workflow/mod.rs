//! Workflow layer: YAML-defined step pipelines run against queued tasks.
//!
//! # Architecture
//!
//! ```text
//! task_configs/*.yaml ──► DefinitionStore ──► WorkflowEngine
//!                                                  │
//!                          TemplateResolver ◄── StepExecutor ──► CapabilityRegistry
//!                                                  │
//!                                          GenerationBackend (HTTP)
//!                                                  │
//!                                      Ollama / OpenAI-compatible
//! ```

pub mod backend;
pub mod definitions;
pub mod engine;
pub mod executor;
pub mod retry;
pub mod schema;
pub mod template;

pub use backend::{backend_from_config, GenerationBackend, GenerationError, GenerationSettings};
pub use definitions::{write_defaults, DefinitionStore, LoadReport};
pub use engine::{Pacing, RunMode, RunSummary, TaskRunOutcome, WorkflowEngine};
pub use executor::StepExecutor;
pub use retry::{Backoff, RetryPolicy};
pub use schema::{StepKind, StepSpec, WorkflowDefinition};
pub use template::{Resolution, TemplateResolver};

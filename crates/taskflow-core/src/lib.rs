//! Taskflow Core: a persistent task queue driven through YAML-defined
//! workflows.
//!
//! Tasks are ingested from text batches, queued durably in SQLite, and
//! processed strictly one at a time. Each task type maps to an ordered
//! list of steps; a step either calls a generation backend with a
//! templated prompt or invokes a named capability. Every finished step is
//! persisted before the next starts, so an interrupted run resumes where
//! it stopped.
//!
//! The crate has no UI or HTTP server of its own, making it suitable for:
//!
//! - the `taskflow` CLI (via `taskflow-cli`)
//! - other front-ends sharing the same database file

pub mod capabilities;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod models;
pub mod state;
pub mod store;
pub mod workflow;

// Convenience re-exports
pub use config::EngineConfig;
pub use db::Database;
pub use error::EngineError;
pub use state::{AppState, AppStateInner};

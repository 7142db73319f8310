//! Workflow Engine: the sequential task loop.
//!
//! ```text
//! list_interrupted() ──► resume (skip settled steps)
//!        │
//! claim_next() ──► resolve definition ──► for each step:
//!                                            re-read task
//!                                            skip if settled
//!                                            StepExecutor::execute
//!                                            record_step
//!                                            stop on failed
//!                  ──► finalize (completed | failed) ──► export JSON
//! ```
//!
//! One task at a time, one step at a time. Steps of a task never overlap.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::capabilities::CapabilityRegistry;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::models::{Task, TaskStatus};
use crate::store::TaskStore;
use crate::workflow::definitions::DefinitionStore;
use crate::workflow::executor::StepExecutor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Stop once no pending task remains.
    Drain,
    /// Keep polling for new tasks until cancelled.
    Watch,
}

/// Pauses between units of work.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pacing {
    pub between_items: Duration,
    pub between_steps: Duration,
    pub idle_poll: Duration,
}

impl Pacing {
    /// No pauses at all.
    pub fn none() -> Self {
        Self {
            between_items: Duration::ZERO,
            between_steps: Duration::ZERO,
            idle_poll: Duration::from_millis(50),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            between_items: config.item_delay(),
            between_steps: config.step_delay(),
            idle_poll: Duration::from_secs(config.idle_poll_secs.max(1)),
        }
    }
}

/// What happened to one task handed to the engine.
#[derive(Debug, Clone)]
pub enum TaskRunOutcome {
    Completed(Task),
    Failed(Task),
    /// The task was deleted or changed status underneath the engine.
    Abandoned { task_id: String, reason: String },
    /// Cancellation was requested; the task stays `running` for resume.
    Interrupted { task_id: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub completed: usize,
    pub failed: usize,
    pub abandoned: usize,
    pub interrupted: usize,
    /// Tasks picked up in `running` state from a previous run.
    pub resumed: usize,
}

impl RunSummary {
    fn record(&mut self, outcome: &TaskRunOutcome) {
        match outcome {
            TaskRunOutcome::Completed(_) => self.completed += 1,
            TaskRunOutcome::Failed(_) => self.failed += 1,
            TaskRunOutcome::Abandoned { .. } => self.abandoned += 1,
            TaskRunOutcome::Interrupted { .. } => self.interrupted += 1,
        }
    }

    pub fn processed(&self) -> usize {
        self.completed + self.failed + self.abandoned
    }
}

pub struct WorkflowEngine {
    store: TaskStore,
    definitions: Arc<DefinitionStore>,
    capabilities: Arc<CapabilityRegistry>,
    executor: StepExecutor,
    pacing: Pacing,
    results_dir: Option<PathBuf>,
    cancel: CancellationToken,
}

impl WorkflowEngine {
    pub fn new(
        store: TaskStore,
        definitions: Arc<DefinitionStore>,
        executor: StepExecutor,
        pacing: Pacing,
    ) -> Self {
        Self {
            store,
            definitions,
            capabilities: executor.capabilities().clone(),
            executor,
            pacing,
            results_dir: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Export each finished task as `<dir>/<task_id>.json`.
    pub fn with_results_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.results_dir = dir;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request a cooperative stop at the next step boundary.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// Resume interrupted tasks, then process the queue according to `mode`.
    pub async fn run(&self, mode: RunMode) -> Result<RunSummary, EngineError> {
        let mut summary = RunSummary::default();

        let interrupted = self.store.list_interrupted().await?;
        if !interrupted.is_empty() {
            tracing::info!(
                "[Engine] Resuming {} interrupted task(s)",
                interrupted.len()
            );
        }
        for task in interrupted {
            if self.cancel.is_cancelled() {
                return Ok(summary);
            }
            let outcome = self.process(task).await?;
            summary.resumed += 1;
            summary.record(&outcome);
            if matches!(outcome, TaskRunOutcome::Interrupted { .. })
                || !self.pause(self.pacing.between_items).await
            {
                return Ok(summary);
            }
        }

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("[Engine] Stop requested");
                break;
            }
            match self.run_next().await? {
                Some(outcome) => {
                    summary.record(&outcome);
                    if matches!(outcome, TaskRunOutcome::Interrupted { .. }) {
                        break;
                    }
                    if !self.pause(self.pacing.between_items).await {
                        break;
                    }
                }
                None => match mode {
                    RunMode::Drain => {
                        tracing::info!("[Engine] Queue drained");
                        break;
                    }
                    RunMode::Watch => {
                        tracing::debug!("[Engine] Queue empty, waiting for tasks");
                        if !self.pause(self.pacing.idle_poll).await {
                            break;
                        }
                    }
                },
            }
        }

        tracing::info!(
            "[Engine] Run finished: {} completed, {} failed, {} abandoned, {} interrupted",
            summary.completed,
            summary.failed,
            summary.abandoned,
            summary.interrupted
        );
        Ok(summary)
    }

    /// Claim and process the oldest pending task, if any.
    pub async fn run_next(&self) -> Result<Option<TaskRunOutcome>, EngineError> {
        let Some(task) = self.store.claim_next().await? else {
            return Ok(None);
        };
        tracing::info!(
            "[Engine] Claimed task {} (type: {})",
            task.id,
            task.task_type
        );
        self.process(task).await.map(Some)
    }

    /// Drive a `running` task through its workflow.
    ///
    /// Only infrastructure errors are returned as `Err`; every task-level
    /// problem ends up on the task itself.
    pub async fn process(&self, task: Task) -> Result<TaskRunOutcome, EngineError> {
        let task_id = task.id.clone();

        let definition = match self
            .definitions
            .resolve(&task.task_type)
            .and_then(|def| self.capabilities.check_definition(def).map(|_| def))
        {
            Ok(def) => def,
            Err(e) if e.is_task_level() => {
                tracing::error!("[Engine] Task {} cannot run: {}", task_id, e);
                return self.finish(&task_id, TaskStatus::Failed, Some(e.to_string())).await;
            }
            Err(e) => return Err(e),
        };

        let total = definition.steps.len();
        for (index, step) in definition.steps.iter().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::info!(
                    "[Engine] Task {} interrupted before step '{}'",
                    task_id,
                    step.name
                );
                return Ok(TaskRunOutcome::Interrupted { task_id });
            }

            let current = match self.store.get(&task_id).await? {
                Some(t) if t.status == TaskStatus::Running => t,
                Some(t) => return Ok(abandoned(task_id, format!("status changed to {}", t.status))),
                None => return Ok(abandoned(task_id, "task was deleted".to_string())),
            };

            if current.step_results.is_settled(&step.name) {
                tracing::debug!(
                    "[Engine] Task {} step '{}' already settled, skipping",
                    task_id,
                    step.name
                );
                continue;
            }

            tracing::info!(
                "[Engine] Task {} step {}/{}: {} ({})",
                task_id,
                index + 1,
                total,
                step.name,
                step.kind_label()
            );
            let outcome = self.executor.execute(step, &current).await;

            if !self.store.record_step(&task_id, &step.name, &outcome).await? {
                return Ok(abandoned(task_id, "task stopped running during step".to_string()));
            }

            if outcome.is_failed() {
                let error = outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("step '{}' failed", step.name));
                tracing::error!("[Engine] Task {} failed: {}", task_id, error);
                return self.finish(&task_id, TaskStatus::Failed, Some(error)).await;
            }

            if index + 1 < total && !self.pause(self.pacing.between_steps).await {
                return Ok(TaskRunOutcome::Interrupted { task_id });
            }
        }

        // Completion requires a settled outcome for every step.
        let Some(latest) = self.store.get(&task_id).await? else {
            return Ok(abandoned(task_id, "task was deleted".to_string()));
        };
        if let Some(missing) = definition
            .steps
            .iter()
            .find(|s| !latest.step_results.is_settled(&s.name))
        {
            let error = format!("step '{}' has no recorded outcome", missing.name);
            return self.finish(&task_id, TaskStatus::Failed, Some(error)).await;
        }
        self.finish(&task_id, TaskStatus::Completed, None).await
    }

    async fn finish(
        &self,
        task_id: &str,
        status: TaskStatus,
        error: Option<String>,
    ) -> Result<TaskRunOutcome, EngineError> {
        let task = match self.store.finalize(task_id, status, error).await {
            Ok(task) => task,
            Err(EngineError::Conflict(reason)) | Err(EngineError::NotFound(reason)) => {
                return Ok(abandoned(task_id.to_string(), reason));
            }
            Err(e) => return Err(e),
        };
        tracing::info!("[Engine] Task {} {}", task.id, task.status);
        self.export(&task);
        Ok(match status {
            TaskStatus::Completed => TaskRunOutcome::Completed(task),
            _ => TaskRunOutcome::Failed(task),
        })
    }

    fn export(&self, task: &Task) {
        let Some(dir) = &self.results_dir else {
            return;
        };
        let path = dir.join(format!("{}.json", task.id));
        let result = std::fs::create_dir_all(dir)
            .map_err(|e| e.to_string())
            .and_then(|_| serde_json::to_string_pretty(task).map_err(|e| e.to_string()))
            .and_then(|json| std::fs::write(&path, json).map_err(|e| e.to_string()));
        if let Err(e) = result {
            tracing::warn!("[Engine] Failed to export {}: {}", path.display(), e);
        }
    }

    /// Sleep for `duration`. Returns `false` if cancelled meanwhile.
    async fn pause(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.cancel.is_cancelled();
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

fn abandoned(task_id: String, reason: String) -> TaskRunOutcome {
    tracing::warn!("[Engine] Abandoning task {}: {}", task_id, reason);
    TaskRunOutcome::Abandoned { task_id, reason }
}

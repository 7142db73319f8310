use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior};
use uuid::Uuid;

use crate::db::Database;
use crate::error::EngineError;
use crate::models::task::{
    CreateTaskInput, Metadata, OutcomeStatus, StatusCounts, StepOutcome, StepRecord, StepResults,
    Task, TaskStatus, UpdateTaskInput,
};

const TASK_COLUMNS: &str =
    "id, task_type, content, metadata, status, error, created_at, updated_at, started_at, finished_at";

/// Which tasks `clear` removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearScope {
    Pending,
    Completed,
    All,
}

/// Durable record of tasks and their per-step outcomes.
///
/// The store is the single source of truth: every read goes to SQLite, so
/// edits made by other front-ends between two engine reads are always seen.
#[derive(Clone)]
pub struct TaskStore {
    db: Database,
}

impl TaskStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(&self, input: CreateTaskInput) -> Result<Task, EngineError> {
        if input.task_type.trim().is_empty() {
            return Err(EngineError::BadRequest("task type must not be empty".into()));
        }
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4().to_string(),
            task_type: input.task_type.trim().to_string(),
            content: input.content,
            metadata: input.metadata,
            status: TaskStatus::Pending,
            step_results: StepResults::new(),
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        };
        let t = task.clone();
        let metadata = serde_json::to_string(&t.metadata)?;
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT INTO tasks (id, task_type, content, metadata, status, error, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?7)",
                    rusqlite::params![
                        t.id,
                        t.task_type,
                        t.content,
                        metadata,
                        t.status.as_str(),
                        t.created_at.timestamp_millis(),
                        t.updated_at.timestamp_millis(),
                    ],
                )?;
                Ok(())
            })
            .await?;
        tracing::debug!("[TaskStore] Created task {} (type: {})", task.id, task.task_type);
        Ok(task)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Task>, EngineError> {
        let id = id.to_string();
        self.db
            .with_conn_async(move |conn| read_task(conn, &id))
            .await
    }

    /// List tasks oldest first, optionally filtered by status.
    pub async fn list(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, EngineError> {
        self.db
            .with_conn_async(move |conn| {
                let ids: Vec<String> = match status {
                    Some(s) => {
                        let mut stmt = conn.prepare(
                            "SELECT id FROM tasks WHERE status = ?1 ORDER BY created_at ASC, rowid ASC",
                        )?;
                        let rows = stmt
                            .query_map(rusqlite::params![s.as_str()], |row| row.get(0))?
                            .collect::<Result<Vec<_>, _>>()?;
                        rows
                    }
                    None => {
                        let mut stmt =
                            conn.prepare("SELECT id FROM tasks ORDER BY created_at ASC, rowid ASC")?;
                        let rows = stmt
                            .query_map([], |row| row.get(0))?
                            .collect::<Result<Vec<_>, _>>()?;
                        rows
                    }
                };
                let mut tasks = Vec::with_capacity(ids.len());
                for id in ids {
                    if let Some(task) = read_task(conn, &id)? {
                        tasks.push(task);
                    }
                }
                Ok(tasks)
            })
            .await
    }

    /// Tasks left `running` by a crash or a cooperative stop, oldest first.
    pub async fn list_interrupted(&self) -> Result<Vec<Task>, EngineError> {
        self.list(Some(TaskStatus::Running)).await
    }

    pub async fn counts(&self) -> Result<StatusCounts, EngineError> {
        self.db
            .with_conn_async(|conn| {
                let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                let mut counts = StatusCounts::default();
                for (status, n) in rows {
                    let n = n.max(0) as u64;
                    match TaskStatus::from_str(&status) {
                        Some(TaskStatus::Pending) => counts.pending = n,
                        Some(TaskStatus::Running) => counts.running = n,
                        Some(TaskStatus::Completed) => counts.completed = n,
                        Some(TaskStatus::Failed) => counts.failed = n,
                        None => {}
                    }
                }
                Ok(counts)
            })
            .await
    }

    /// Claim the oldest pending task, moving it to `running`.
    ///
    /// The status change is a compare-and-swap on `status = 'pending'`
    /// inside an immediate transaction, so two workers can never claim the
    /// same task.
    pub async fn claim_next(&self) -> Result<Option<Task>, EngineError> {
        self.db
            .with_conn_async(|conn| {
                let tx = rusqlite::Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
                let candidate: Option<String> = tx
                    .query_row(
                        "SELECT id FROM tasks WHERE status = 'pending'
                         ORDER BY created_at ASC, rowid ASC LIMIT 1",
                        [],
                        |row| row.get(0),
                    )
                    .optional()?;
                let Some(id) = candidate else {
                    tx.commit()?;
                    return Ok(None);
                };
                let now = Utc::now().timestamp_millis();
                let changed = tx.execute(
                    "UPDATE tasks SET status = 'running', started_at = ?1, updated_at = ?1
                     WHERE id = ?2 AND status = 'pending'",
                    rusqlite::params![now, id],
                )?;
                let task = if changed == 1 {
                    read_task(&tx, &id)?
                } else {
                    None
                };
                tx.commit()?;
                Ok(task)
            })
            .await
    }

    /// Durably record a finished step.
    ///
    /// Returns `false` without writing when the task no longer exists or is
    /// no longer `running` (deleted or re-queued by someone else).
    pub async fn record_step(
        &self,
        task_id: &str,
        step_name: &str,
        outcome: &StepOutcome,
    ) -> Result<bool, EngineError> {
        let task_id = task_id.to_string();
        let step_name = step_name.to_string();
        let outcome = outcome.clone();
        let value = serde_json::to_string(&outcome.value)?;
        self.db
            .with_conn_async(move |conn| {
                let tx = conn.unchecked_transaction()?;
                let now = Utc::now().timestamp_millis();
                let touched = tx.execute(
                    "UPDATE tasks SET updated_at = ?1 WHERE id = ?2 AND status = 'running'",
                    rusqlite::params![now, task_id],
                )?;
                if touched == 0 {
                    return Ok(false);
                }
                tx.execute(
                    "DELETE FROM task_steps WHERE task_id = ?1 AND step_name = ?2",
                    rusqlite::params![task_id, step_name],
                )?;
                tx.execute(
                    "INSERT INTO task_steps (task_id, step_name, status, value, degraded, error, attempts, finished_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    rusqlite::params![
                        task_id,
                        step_name,
                        outcome.status.as_str(),
                        value,
                        outcome.degraded as i64,
                        outcome.error,
                        outcome.attempts as i64,
                        now,
                    ],
                )?;
                tx.commit()?;
                Ok(true)
            })
            .await
    }

    /// Move a running task to its final status.
    pub async fn finalize(
        &self,
        task_id: &str,
        status: TaskStatus,
        error: Option<String>,
    ) -> Result<Task, EngineError> {
        if !status.is_terminal() {
            return Err(EngineError::BadRequest(format!(
                "cannot finalize a task as '{}'",
                status
            )));
        }
        let id = task_id.to_string();
        let error = if status == TaskStatus::Failed { error } else { None };
        let changed = self
            .db
            .with_conn_async({
                let id = id.clone();
                move |conn| {
                    let now = Utc::now().timestamp_millis();
                    conn.execute(
                        "UPDATE tasks SET status = ?1, error = ?2, updated_at = ?3, finished_at = ?3
                         WHERE id = ?4 AND status = 'running'",
                        rusqlite::params![status.as_str(), error, now, id],
                    )
                }
            })
            .await?;
        if changed == 0 {
            return Err(EngineError::Conflict(format!(
                "task {} is not running and cannot be finalized",
                task_id
            )));
        }
        self.get(&id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("task {}", id)))
    }

    /// Re-queue a completed or failed task.
    ///
    /// Failed step entries and the task error are always dropped; successful
    /// step results are kept unless `reset` is set, so the next run resumes
    /// after the last good step.
    pub async fn requeue(&self, task_id: &str, reset: bool) -> Result<Task, EngineError> {
        let id = task_id.to_string();
        let previous = self
            .db
            .with_conn_async({
                let id = id.clone();
                move |conn| {
                    let tx = conn.unchecked_transaction()?;
                    let status: Option<String> = tx
                        .query_row("SELECT status FROM tasks WHERE id = ?1", rusqlite::params![id], |row| {
                            row.get(0)
                        })
                        .optional()?;
                    let Some(status) = status else {
                        return Ok(None);
                    };
                    let status = TaskStatus::from_str(&status);
                    if !status.is_some_and(|s| s.is_terminal()) {
                        return Ok(Some(status));
                    }
                    if reset {
                        tx.execute("DELETE FROM task_steps WHERE task_id = ?1", rusqlite::params![id])?;
                    } else {
                        tx.execute(
                            "DELETE FROM task_steps WHERE task_id = ?1 AND status = 'failed'",
                            rusqlite::params![id],
                        )?;
                    }
                    tx.execute(
                        "UPDATE tasks SET status = 'pending', error = NULL, started_at = NULL,
                         finished_at = NULL, updated_at = ?1 WHERE id = ?2",
                        rusqlite::params![Utc::now().timestamp_millis(), id],
                    )?;
                    tx.commit()?;
                    Ok(Some(status))
                }
            })
            .await?;

        match previous {
            None => Err(EngineError::NotFound(format!("task {}", task_id))),
            Some(Some(s)) if s.is_terminal() => {
                tracing::info!("[TaskStore] Re-queued task {} (was {}, reset: {})", task_id, s, reset);
                self.get(&id)
                    .await?
                    .ok_or_else(|| EngineError::NotFound(format!("task {}", id)))
            }
            Some(s) => Err(EngineError::Conflict(format!(
                "task {} is {} and cannot be re-queued",
                task_id,
                s.map(|s| s.as_str()).unwrap_or("in an unknown state")
            ))),
        }
    }

    /// Re-queue every failed task, keeping successful step results.
    pub async fn requeue_failed(&self) -> Result<usize, EngineError> {
        self.db
            .with_conn_async(|conn| {
                let tx = conn.unchecked_transaction()?;
                tx.execute(
                    "DELETE FROM task_steps WHERE status = 'failed'
                     AND task_id IN (SELECT id FROM tasks WHERE status = 'failed')",
                    [],
                )?;
                let n = tx.execute(
                    "UPDATE tasks SET status = 'pending', error = NULL, started_at = NULL,
                     finished_at = NULL, updated_at = ?1 WHERE status = 'failed'",
                    rusqlite::params![Utc::now().timestamp_millis()],
                )?;
                tx.commit()?;
                Ok(n)
            })
            .await
    }

    /// Edit a task's type, content or metadata. Refused while it is running.
    ///
    /// Step results no longer describe an edited task, so any real change
    /// drops them and a later re-queue runs every step again.
    pub async fn update(&self, task_id: &str, input: UpdateTaskInput) -> Result<Task, EngineError> {
        let Some(mut task) = self.get(task_id).await? else {
            return Err(EngineError::NotFound(format!("task {}", task_id)));
        };
        if task.status == TaskStatus::Running {
            return Err(EngineError::Conflict(format!(
                "task {} is running and cannot be edited",
                task_id
            )));
        }
        let mut edited = false;
        if let Some(v) = input.task_type {
            let v = v.trim().to_string();
            if v.is_empty() {
                return Err(EngineError::BadRequest("task type must not be empty".into()));
            }
            edited |= v != task.task_type;
            task.task_type = v;
        }
        if let Some(v) = input.content {
            edited |= v != task.content;
            task.content = v;
        }
        if let Some(v) = input.metadata {
            edited |= v != task.metadata;
            task.metadata = v;
        }
        if edited {
            task.step_results = StepResults::new();
        }
        task.updated_at = Utc::now();
        let t = task.clone();
        let metadata = serde_json::to_string(&t.metadata)?;
        let changed = self
            .db
            .with_conn_async(move |conn| {
                let tx = conn.unchecked_transaction()?;
                let n = tx.execute(
                    "UPDATE tasks SET task_type = ?2, content = ?3, metadata = ?4, updated_at = ?5
                     WHERE id = ?1 AND status != 'running'",
                    rusqlite::params![
                        t.id,
                        t.task_type,
                        t.content,
                        metadata,
                        t.updated_at.timestamp_millis(),
                    ],
                )?;
                if n > 0 && edited {
                    tx.execute("DELETE FROM task_steps WHERE task_id = ?1", rusqlite::params![t.id])?;
                }
                tx.commit()?;
                Ok(n)
            })
            .await?;
        if changed == 0 {
            return Err(EngineError::Conflict(format!(
                "task {} changed state while being edited",
                task_id
            )));
        }
        if edited {
            tracing::info!("[TaskStore] Task {} edited, step results cleared", task_id);
        }
        Ok(task)
    }

    pub async fn delete(&self, task_id: &str) -> Result<bool, EngineError> {
        let id = task_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let n = conn.execute("DELETE FROM tasks WHERE id = ?1", rusqlite::params![id])?;
                Ok(n > 0)
            })
            .await
    }

    pub async fn clear(&self, scope: ClearScope) -> Result<usize, EngineError> {
        self.db
            .with_conn_async(move |conn| match scope {
                ClearScope::Pending => conn.execute("DELETE FROM tasks WHERE status = 'pending'", []),
                ClearScope::Completed => {
                    conn.execute("DELETE FROM tasks WHERE status = 'completed'", [])
                }
                ClearScope::All => conn.execute("DELETE FROM tasks", []),
            })
            .await
    }
}

fn read_task(conn: &Connection, id: &str) -> Result<Option<Task>, rusqlite::Error> {
    let sql = format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS);
    let task = conn
        .query_row(&sql, rusqlite::params![id], |row| Ok(row_to_task(row)))
        .optional()?;
    let Some(mut task) = task else {
        return Ok(None);
    };
    task.step_results = read_steps(conn, id)?;
    Ok(Some(task))
}

fn read_steps(conn: &Connection, task_id: &str) -> Result<StepResults, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT step_name, status, value, degraded, error, attempts, finished_at
         FROM task_steps WHERE task_id = ?1 ORDER BY seq ASC",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![task_id], |row| Ok(row_to_step(row)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows.into_iter().collect())
}

fn to_dt(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(|v| Utc.timestamp_millis_opt(v).single())
}

fn row_to_task(row: &Row<'_>) -> Task {
    let metadata: Metadata = row
        .get::<_, String>(3)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default();
    let status = row
        .get::<_, String>(4)
        .ok()
        .and_then(|s| TaskStatus::from_str(&s))
        .unwrap_or(TaskStatus::Pending);

    Task {
        id: row.get(0).unwrap_or_default(),
        task_type: row.get(1).unwrap_or_default(),
        content: row.get(2).unwrap_or_default(),
        metadata,
        status,
        step_results: StepResults::new(),
        error: row.get(5).unwrap_or(None),
        created_at: to_dt(row.get(6).ok()).unwrap_or_else(Utc::now),
        updated_at: to_dt(row.get(7).ok()).unwrap_or_else(Utc::now),
        started_at: to_dt(row.get(8).unwrap_or(None)),
        finished_at: to_dt(row.get(9).unwrap_or(None)),
    }
}

fn row_to_step(row: &Row<'_>) -> StepRecord {
    let status = row
        .get::<_, String>(1)
        .ok()
        .and_then(|s| OutcomeStatus::from_str(&s))
        .unwrap_or(OutcomeStatus::Failed);
    let value = row
        .get::<_, String>(2)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or(serde_json::Value::Null);

    StepRecord {
        name: row.get(0).unwrap_or_default(),
        outcome: StepOutcome {
            status,
            value,
            degraded: row.get::<_, i64>(3).unwrap_or(0) != 0,
            error: row.get(4).unwrap_or(None),
            attempts: row.get::<_, i64>(5).unwrap_or(1).max(1) as u32,
        },
        finished_at: to_dt(row.get(6).ok()).unwrap_or_else(Utc::now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> TaskStore {
        TaskStore::new(Database::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn test_create_and_get_roundtrips_metadata_order() {
        let store = store();
        let input = CreateTaskInput::new("search", "rust async")
            .with_meta("zeta", "last")
            .with_meta("alpha", 3)
            .with_meta("flag", true);
        let created = store.create(input).await.unwrap();

        let task = store.get(&created.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        let keys: Vec<_> = task.metadata.keys().cloned().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "flag"]);
        assert_eq!(task.metadata["alpha"], 3);
    }

    #[tokio::test]
    async fn test_create_rejects_blank_type() {
        let err = store().create(CreateTaskInput::new("  ", "x")).await.unwrap_err();
        assert!(matches!(err, EngineError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_claim_is_fifo_and_exclusive() {
        let store = store();
        let a = store.create(CreateTaskInput::new("code", "a")).await.unwrap();
        let b = store.create(CreateTaskInput::new("search", "b")).await.unwrap();

        let first = store.claim_next().await.unwrap().unwrap();
        assert_eq!(first.id, a.id);
        assert_eq!(first.status, TaskStatus::Running);
        assert!(first.started_at.is_some());

        let second = store.claim_next().await.unwrap().unwrap();
        assert_eq!(second.id, b.id);
        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_step_requires_running_task() {
        let store = store();
        let task = store.create(CreateTaskInput::new("process", "x")).await.unwrap();
        assert!(!store.record_step(&task.id, "analyze", &StepOutcome::ok("a")).await.unwrap());

        store.claim_next().await.unwrap();
        assert!(store.record_step(&task.id, "analyze", &StepOutcome::ok("a")).await.unwrap());
        assert!(store.record_step(&task.id, "improve", &StepOutcome::ok("b")).await.unwrap());

        let task = store.get(&task.id).await.unwrap().unwrap();
        let names: Vec<_> = task.step_results.iter().map(|r| r.name.clone()).collect();
        assert_eq!(names, vec!["analyze", "improve"]);
        assert!(task.updated_at >= task.created_at);
    }

    #[tokio::test]
    async fn test_finalize_only_from_running() {
        let store = store();
        let task = store.create(CreateTaskInput::new("process", "x")).await.unwrap();
        let err = store
            .finalize(&task.id, TaskStatus::Completed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));

        store.claim_next().await.unwrap();
        let done = store
            .finalize(&task.id, TaskStatus::Failed, Some("boom".into()))
            .await
            .unwrap();
        assert_eq!(done.status, TaskStatus::Failed);
        assert_eq!(done.error.as_deref(), Some("boom"));
        assert!(done.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_requeue_keeps_good_steps_and_drops_failed() {
        let store = store();
        let task = store.create(CreateTaskInput::new("create", "x")).await.unwrap();
        store.claim_next().await.unwrap();
        store.record_step(&task.id, "outline", &StepOutcome::ok("o")).await.unwrap();
        store
            .record_step(&task.id, "draft", &StepOutcome::failed("timeout"))
            .await
            .unwrap();
        store
            .finalize(&task.id, TaskStatus::Failed, Some("timeout".into()))
            .await
            .unwrap();

        let requeued = store.requeue(&task.id, false).await.unwrap();
        assert_eq!(requeued.status, TaskStatus::Pending);
        assert!(requeued.error.is_none());
        assert_eq!(requeued.step_results.len(), 1);
        assert!(requeued.step_results.is_settled("outline"));

        store.claim_next().await.unwrap();
        store.finalize(&task.id, TaskStatus::Completed, None).await.unwrap();
        let reset = store.requeue(&task.id, true).await.unwrap();
        assert!(reset.step_results.is_empty());
    }

    #[tokio::test]
    async fn test_requeue_refuses_pending_and_missing() {
        let store = store();
        let task = store.create(CreateTaskInput::new("create", "x")).await.unwrap();
        assert!(matches!(
            store.requeue(&task.id, false).await.unwrap_err(),
            EngineError::Conflict(_)
        ));
        assert!(matches!(
            store.requeue("nope", false).await.unwrap_err(),
            EngineError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_update_refused_while_running() {
        let store = store();
        let task = store.create(CreateTaskInput::new("create", "x")).await.unwrap();
        let edited = store
            .update(
                &task.id,
                UpdateTaskInput {
                    content: Some("y".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.content, "y");

        store.claim_next().await.unwrap();
        let err = store
            .update(&task.id, UpdateTaskInput::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_update_drops_step_results_only_on_real_change() {
        let store = store();
        let task = store.create(CreateTaskInput::new("create", "x")).await.unwrap();
        store.claim_next().await.unwrap();
        store.record_step(&task.id, "outline", &StepOutcome::ok("o")).await.unwrap();
        store.finalize(&task.id, TaskStatus::Completed, None).await.unwrap();

        let same = store
            .update(
                &task.id,
                UpdateTaskInput {
                    content: Some("x".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(same.step_results.len(), 1);

        let mut metadata = Metadata::new();
        metadata.insert("tone".into(), serde_json::json!("dry"));
        store
            .update(
                &task.id,
                UpdateTaskInput {
                    metadata: Some(metadata),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let reloaded = store.get(&task.id).await.unwrap().unwrap();
        assert!(reloaded.step_results.is_empty());
        assert_eq!(reloaded.metadata["tone"], "dry");
    }

    #[tokio::test]
    async fn test_counts_clear_and_requeue_failed() {
        let store = store();
        for i in 0..3 {
            store
                .create(CreateTaskInput::new("process", format!("t{}", i)))
                .await
                .unwrap();
        }
        let claimed = store.claim_next().await.unwrap().unwrap();
        store
            .finalize(&claimed.id, TaskStatus::Failed, Some("x".into()))
            .await
            .unwrap();

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.total(), 3);

        assert_eq!(store.requeue_failed().await.unwrap(), 1);
        assert_eq!(store.clear(ClearScope::Pending).await.unwrap(), 3);
        assert_eq!(store.counts().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_delete_cascades_steps() {
        let store = store();
        let task = store.create(CreateTaskInput::new("process", "x")).await.unwrap();
        store.claim_next().await.unwrap();
        store.record_step(&task.id, "analyze", &StepOutcome::ok("a")).await.unwrap();
        assert!(store.delete(&task.id).await.unwrap());
        assert!(!store.delete(&task.id).await.unwrap());

        let orphans: i64 = store
            .db
            .with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM task_steps", [], |r| r.get(0)))
            .unwrap();
        assert_eq!(orphans, 0);
    }
}

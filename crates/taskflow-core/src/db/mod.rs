//! SQLite storage for the task queue.
//!
//! One connection behind a mutex; async callers go through
//! `with_conn_async`, which hops onto the blocking pool. On-disk databases
//! run in WAL mode so `taskflow status` can read while a run is writing.
//!
//! # Schema
//!
//! - **tasks**: one row per task, metadata as a JSON object
//! - **task_steps**: the latest outcome of each step, cascaded on task delete
//! - **schema_version**: the layout version written by this build
//!
//! A database stamped with a newer version than this build knows is
//! refused instead of being read with the wrong layout.

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::EngineError;

/// Layout version of the tables below.
pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS schema_version (
        version         INTEGER PRIMARY KEY,
        applied_at      INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS tasks (
        id              TEXT PRIMARY KEY,
        task_type       TEXT NOT NULL,
        content         TEXT NOT NULL,
        metadata        TEXT NOT NULL DEFAULT '{}',
        status          TEXT NOT NULL DEFAULT 'pending',
        error           TEXT,
        created_at      INTEGER NOT NULL,
        updated_at      INTEGER NOT NULL,
        started_at      INTEGER,
        finished_at     INTEGER
    );
    CREATE INDEX IF NOT EXISTS idx_tasks_status_created ON tasks(status, created_at);

    CREATE TABLE IF NOT EXISTS task_steps (
        seq             INTEGER PRIMARY KEY AUTOINCREMENT,
        task_id         TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
        step_name       TEXT NOT NULL,
        status          TEXT NOT NULL,
        value           TEXT NOT NULL DEFAULT 'null',
        degraded        INTEGER NOT NULL DEFAULT 0,
        error           TEXT,
        attempts        INTEGER NOT NULL DEFAULT 1,
        finished_at     INTEGER NOT NULL,
        UNIQUE (task_id, step_name)
    );
    CREATE INDEX IF NOT EXISTS idx_task_steps_task ON task_steps(task_id);
";

/// Shared handle to the queue database. Clones share one connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open the queue at `db_path`, creating the file and its parent
    /// directory on first use.
    pub fn open(db_path: &str) -> Result<Self, EngineError> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    EngineError::Database(format!(
                        "Cannot create directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        let conn = Connection::open(db_path)
            .map_err(|e| EngineError::Database(format!("Cannot open {}: {}", db_path, e)))?;
        let db = Self::prepare(
            conn,
            "PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;",
        )?;
        tracing::info!("[Database] Task queue opened at {}", db_path);
        Ok(db)
    }

    /// A private in-memory queue, gone when the last clone drops.
    pub fn open_in_memory() -> Result<Self, EngineError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| EngineError::Database(format!("Cannot open in-memory queue: {}", e)))?;
        Self::prepare(conn, "PRAGMA foreign_keys=ON;")
    }

    fn prepare(conn: Connection, pragmas: &str) -> Result<Self, EngineError> {
        conn.execute_batch(pragmas)
            .map_err(|e| EngineError::Database(format!("Failed to set pragmas: {}", e)))?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        let version = db.with_conn(|conn| {
            conn.execute_batch(SCHEMA)?;
            conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get::<_, Option<i64>>(0)
            })
        })?;

        match version {
            Some(v) if v > SCHEMA_VERSION => Err(EngineError::Database(format!(
                "queue schema version {} is newer than this build supports ({})",
                v, SCHEMA_VERSION
            ))),
            Some(_) => Ok(db),
            None => {
                db.with_conn(|conn| {
                    conn.execute(
                        "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                        rusqlite::params![SCHEMA_VERSION, chrono::Utc::now().timestamp_millis()],
                    )
                })?;
                tracing::debug!("[Database] Stamped schema version {}", SCHEMA_VERSION);
                Ok(db)
            }
        }
    }

    /// Run `f` on the connection while holding the lock.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|_| EngineError::Database("connection lock poisoned".into()))?;
        f(&conn).map_err(|e| EngineError::Database(e.to_string()))
    }

    /// `with_conn` on the blocking pool.
    pub async fn with_conn_async<F, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.with_conn(f))
            .await
            .map_err(|e| EngineError::Internal(format!("database worker failed: {}", e)))?
    }

    /// Version recorded in the `schema_version` table.
    pub fn schema_version(&self) -> Result<i64, EngineError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_on_disk_creates_tables_and_wal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("taskflow.db");
        let db = Database::open(path.to_str().unwrap()).unwrap();

        let tables: Vec<String> = db
            .with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type = 'table' AND name IN ('tasks', 'task_steps') ORDER BY name",
                )?;
                let rows = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .unwrap();
        assert_eq!(tables, vec!["task_steps".to_string(), "tasks".to_string()]);

        let mode: String = db
            .with_conn(|conn| conn.query_row("PRAGMA journal_mode", [], |row| row.get(0)))
            .unwrap();
        assert_eq!(mode.to_ascii_lowercase(), "wal");
        assert_eq!(db.schema_version().unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_reopen_keeps_a_single_version_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taskflow.db");
        Database::open(path.to_str().unwrap()).unwrap();
        let db = Database::open(path.to_str().unwrap()).unwrap();

        let rows: i64 = db
            .with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0)))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taskflow.db");
        let db = Database::open(path.to_str().unwrap()).unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO schema_version (version, applied_at) VALUES (?1, 0)",
                [SCHEMA_VERSION + 1],
            )
        })
        .unwrap();
        drop(db);

        let err = Database::open(path.to_str().unwrap()).err().unwrap();
        assert!(matches!(err, EngineError::Database(ref m) if m.contains("newer than this build")));
    }

    #[test]
    fn test_deleting_a_task_cascades_to_its_steps() {
        let db = Database::open_in_memory().unwrap();
        let steps: i64 = db
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO tasks (id, task_type, content, created_at, updated_at) VALUES ('t1', 'search', 'q', 0, 0)",
                    [],
                )?;
                conn.execute(
                    "INSERT INTO task_steps (task_id, step_name, status, finished_at) VALUES ('t1', 'look', 'ok', 0)",
                    [],
                )?;
                conn.execute("DELETE FROM tasks WHERE id = 't1'", [])?;
                conn.query_row("SELECT COUNT(*) FROM task_steps", [], |row| row.get(0))
            })
            .unwrap();
        assert_eq!(steps, 0);
    }
}

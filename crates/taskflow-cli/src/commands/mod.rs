//! CLI command implementations.
//!
//! Each submodule corresponds to a top-level CLI command and reuses
//! the taskflow-core domain logic through `AppState`.

pub mod init;
pub mod run;
pub mod task;
pub mod workflows;

use std::path::Path;
use std::sync::Arc;

use console::{style, StyledObject};
use taskflow_core::models::TaskStatus;
use taskflow_core::state::AppState;
use taskflow_core::{AppStateInner, Database, EngineConfig};

/// Load the configuration and open the database it names.
///
/// `db_override` wins over `db_path` from the config file.
pub fn init_state(config_path: &str, db_override: Option<&str>) -> Result<AppState, String> {
    let mut config = EngineConfig::load_or_create(Path::new(config_path))
        .map_err(|e| e.to_string())?
        .with_env_overrides();
    if let Some(db) = db_override {
        config.db_path = db.to_string();
    }

    tracing::debug!("[CLI] Using database {}", config.db_path);
    let db = Database::open(&config.db_path)
        .map_err(|e| format!("Failed to open database '{}': {}", config.db_path, e))?;
    let state = AppStateInner::new(config, db).map_err(|e| e.to_string())?;
    Ok(Arc::new(state))
}

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}

/// Status label padded to `width` and coloured by status.
pub fn styled_status(status: TaskStatus, width: usize) -> StyledObject<String> {
    let s = style(format!("{:<width$}", status.as_str(), width = width));
    match status {
        TaskStatus::Pending => s.yellow(),
        TaskStatus::Running => s.cyan(),
        TaskStatus::Completed => s.green(),
        TaskStatus::Failed => s.red(),
    }
}

/// First `max` characters of `s` on one line, with an ellipsis if cut.
pub fn truncate(s: &str, max: usize) -> String {
    let flat = s.replace('\n', " ");
    if flat.chars().count() <= max {
        flat
    } else {
        let cut: String = flat.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

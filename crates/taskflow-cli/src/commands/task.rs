//! Queue management commands: add, list, inspect, re-queue, delete, clear.

use console::style;
use dialoguer::Confirm;
use taskflow_core::ingest::{ingest_file, parse_metadata};
use taskflow_core::models::{CreateTaskInput, Metadata, TaskStatus};
use taskflow_core::state::AppState;
use taskflow_core::store::ClearScope;

use super::{print_json, styled_status, truncate};

pub async fn add_file(state: &AppState, path: &str) -> Result<(), String> {
    let report = ingest_file(std::path::Path::new(path), &state.task_store)
        .await
        .map_err(|e| e.to_string())?;

    println!(
        "Added {} task(s) from {}",
        style(report.created.len()).green(),
        path
    );
    for error in &report.errors {
        println!("  {} {}", style("skipped").red(), error);
    }
    Ok(())
}

pub async fn add(
    state: &AppState,
    task_type: &str,
    meta: &[String],
    content: &str,
) -> Result<(), String> {
    let mut metadata = Metadata::new();
    for item in meta {
        metadata.extend(parse_metadata(item)?);
    }
    if state.definitions.resolve(task_type).is_err() {
        println!(
            "{} no workflow is defined for type '{}'; the task will fail when run",
            style("warning:").yellow(),
            task_type
        );
    }

    let task = state
        .task_store
        .create(CreateTaskInput {
            task_type: task_type.to_ascii_lowercase(),
            content: content.to_string(),
            metadata,
        })
        .await
        .map_err(|e| e.to_string())?;
    println!("Added task {} ({})", style(&task.id).bold(), task.task_type);
    Ok(())
}

pub async fn status(state: &AppState) -> Result<(), String> {
    let counts = state.task_store.counts().await.map_err(|e| e.to_string())?;
    println!("{}", style("Queue status").bold());
    for (status, count) in [
        (TaskStatus::Pending, counts.pending),
        (TaskStatus::Running, counts.running),
        (TaskStatus::Completed, counts.completed),
        (TaskStatus::Failed, counts.failed),
    ] {
        println!("  {} {:>6}", styled_status(status, 10), count);
    }
    println!("  {:<10} {:>6}", "total", counts.total());
    Ok(())
}

pub async fn list(state: &AppState, status: Option<&str>) -> Result<(), String> {
    let filter = match status {
        Some(s) => Some(TaskStatus::from_str(s).ok_or_else(|| {
            format!(
                "Unknown status '{}'. Use pending, running, completed or failed",
                s
            )
        })?),
        None => None,
    };
    let tasks = state.task_store.list(filter).await.map_err(|e| e.to_string())?;
    if tasks.is_empty() {
        println!("No tasks.");
        return Ok(());
    }

    println!(
        "{}",
        style(format!(
            "{:<36}  {:<10}  {:<10}  {:>5}  {:<19}  {}",
            "ID", "TYPE", "STATUS", "STEPS", "CREATED", "CONTENT"
        ))
        .bold()
    );
    for task in &tasks {
        println!(
            "{:<36}  {:<10}  {}  {:>5}  {:<19}  {}",
            task.id,
            truncate(&task.task_type, 10),
            styled_status(task.status, 10),
            task.step_results.len(),
            task.created_at.format("%Y-%m-%d %H:%M:%S"),
            truncate(&task.content, 40)
        );
        if let Some(error) = &task.error {
            println!("{:<36}  {}", "", style(truncate(error, 80)).red());
        }
    }
    Ok(())
}

pub async fn get(state: &AppState, id: &str) -> Result<(), String> {
    let task = state
        .task_store
        .get(id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("Task not found: {}", id))?;
    print_json(&serde_json::to_value(&task).map_err(|e| e.to_string())?);
    Ok(())
}

pub async fn requeue(state: &AppState, id: &str, reset: bool) -> Result<(), String> {
    let task = state
        .task_store
        .requeue(id, reset)
        .await
        .map_err(|e| e.to_string())?;
    println!(
        "Re-queued task {} ({} step result(s) kept)",
        task.id,
        task.step_results.len()
    );
    Ok(())
}

pub async fn requeue_failed(state: &AppState) -> Result<(), String> {
    let count = state
        .task_store
        .requeue_failed()
        .await
        .map_err(|e| e.to_string())?;
    println!("Re-queued {} failed task(s)", count);
    Ok(())
}

pub async fn delete(state: &AppState, id: &str) -> Result<(), String> {
    if state.task_store.delete(id).await.map_err(|e| e.to_string())? {
        println!("Deleted task {}", id);
        Ok(())
    } else {
        Err(format!("Task not found: {}", id))
    }
}

pub async fn clear(state: &AppState, all: bool, completed: bool, yes: bool) -> Result<(), String> {
    let (scope, label) = if all {
        (ClearScope::All, "ALL tasks")
    } else if completed {
        (ClearScope::Completed, "all completed tasks")
    } else {
        (ClearScope::Pending, "all pending tasks")
    };

    if !yes {
        let confirmed = Confirm::new()
            .with_prompt(format!("Remove {}?", label))
            .default(false)
            .interact()
            .map_err(|e| format!("Failed to read confirmation: {}", e))?;
        if !confirmed {
            println!("Nothing removed.");
            return Ok(());
        }
    }

    let removed = state
        .task_store
        .clear(scope)
        .await
        .map_err(|e| e.to_string())?;
    println!("Removed {} task(s)", removed);
    Ok(())
}

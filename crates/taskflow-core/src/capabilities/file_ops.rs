//! `file_operations`: create, read, update, append, delete, list, check and
//! search files inside the workspace directory.
//!
//! Paths are always relative to the workspace. Absolute paths, `..`
//! components, names that resolve to the workspace itself and anything
//! under the `.deleted` trash are refused with a `failed` outcome, as are
//! reads, updates and deletes of files that do not exist.

use std::fs;
use std::io::Write as _;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::capabilities::{Capability, CapabilityContext, CapabilityError, Parameters};
use crate::models::StepOutcome;
use crate::workflow::template::render;

pub struct FileOperationsCapability {
    workspace: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateMode {
    Replace,
    Append,
    Prepend,
}

/// Everything one invocation needs, owned so it can move to a blocking thread.
#[derive(Debug, Clone)]
struct FileRequest {
    operation: String,
    workspace: PathBuf,
    filename: String,
    content: Option<String>,
    mode: UpdateMode,
    pattern: String,
    recursive: bool,
    search_text: Option<String>,
    backup: bool,
}

impl FileOperationsCapability {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    fn build_request(&self, ctx: &CapabilityContext<'_>, params: &Parameters) -> FileRequest {
        let operation = ctx
            .setting(params, "operation")
            .unwrap_or_else(|| "create".to_string())
            .to_ascii_lowercase();

        let filename = params
            .get("filename")
            .or_else(|| params.get("filename_template"))
            .or_else(|| ctx.metadata.get("filename"))
            .map(render)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("{}.txt", ctx.task_id));

        let content = params
            .get("content")
            .or_else(|| params.get("new_content"))
            .or_else(|| ctx.metadata.get("file_content"))
            .or_else(|| ctx.metadata.get("new_content"))
            .map(render)
            .or_else(|| ctx.step_results.last_text().map(str::to_string));

        let mode = match ctx.setting(params, "mode").as_deref() {
            Some("append") => UpdateMode::Append,
            Some("prepend") => UpdateMode::Prepend,
            _ => UpdateMode::Replace,
        };

        FileRequest {
            operation,
            workspace: self.workspace.clone(),
            filename,
            content,
            mode,
            pattern: ctx
                .setting(params, "pattern")
                .unwrap_or_else(|| "*".to_string()),
            recursive: ctx.flag(params, "recursive", false),
            search_text: ctx.setting(params, "search_text"),
            backup: ctx.flag(params, "create_backup", true),
        }
    }
}

#[async_trait]
impl Capability for FileOperationsCapability {
    fn name(&self) -> &str {
        "file_operations"
    }

    async fn invoke(
        &self,
        ctx: &CapabilityContext<'_>,
        params: &Parameters,
    ) -> Result<StepOutcome, CapabilityError> {
        let request = self.build_request(ctx, params);
        tracing::info!(
            "[FileOps] {} '{}' in {}",
            request.operation,
            request.filename,
            request.workspace.display()
        );
        tokio::task::spawn_blocking(move || execute(request))
            .await
            .map_err(|e| CapabilityError::Other(format!("file operation aborted: {}", e)))?
    }
}

const TRASH_DIR: &str = ".deleted";

fn escapes_workspace(relative: &Path) -> bool {
    relative.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

/// Join `name` onto the workspace as a path to a single entry inside it.
///
/// Refuses anything that could escape the workspace, names that resolve to
/// the workspace itself (`.`, `./`), and the trash directory.
fn confined_path(workspace: &Path, name: &str) -> Option<PathBuf> {
    let relative = Path::new(name.trim());
    if name.trim().is_empty() || escapes_workspace(relative) {
        return None;
    }
    let parts: Vec<&std::ffi::OsStr> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect();
    match parts.first() {
        None => None,
        Some(first) if *first == TRASH_DIR => None,
        Some(_) => Some(parts.iter().fold(workspace.to_path_buf(), |p, part| p.join(part))),
    }
}

fn execute(req: FileRequest) -> Result<StepOutcome, CapabilityError> {
    fs::create_dir_all(&req.workspace)?;

    match req.operation.as_str() {
        "list" => return list_files(&req),
        "search" => return search_files(&req),
        _ => {}
    }

    let Some(path) = confined_path(&req.workspace, &req.filename) else {
        return Ok(StepOutcome::failed(format!(
            "path '{}' does not name a file inside the workspace",
            req.filename
        )));
    };

    match req.operation.as_str() {
        "create" => {
            let content = req.content.clone().unwrap_or_default();
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, &content)?;
            Ok(success(&req, &path, json!({ "size": content.len() })))
        }
        "read" => {
            if !path.is_file() {
                return Ok(not_found(&req));
            }
            let text = fs::read_to_string(&path)?;
            let content = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text.clone()));
            Ok(success(&req, &path, json!({ "content": content, "size": text.len() })))
        }
        "update" => {
            if !path.is_file() {
                return Ok(not_found(&req));
            }
            let Some(new_content) = req.content.clone() else {
                return Ok(StepOutcome::failed("no content to update with"));
            };
            let existing = fs::read_to_string(&path)?;
            let mut backup_path = None;
            if req.backup {
                let backup = path.with_file_name(format!(
                    "{}.bak",
                    path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
                ));
                fs::copy(&path, &backup)?;
                backup_path = Some(backup);
            }
            let updated = match req.mode {
                UpdateMode::Replace => new_content,
                UpdateMode::Append => format!("{}\n{}", existing, new_content),
                UpdateMode::Prepend => format!("{}\n{}", new_content, existing),
            };
            fs::write(&path, &updated)?;
            Ok(success(
                &req,
                &path,
                json!({
                    "mode": format!("{:?}", req.mode).to_lowercase(),
                    "size": updated.len(),
                    "backup": backup_path.map(|p| p.display().to_string()),
                }),
            ))
        }
        "append" => {
            let content = req.content.clone().unwrap_or_default();
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = fs::OpenOptions::new().create(true).append(true).open(&path)?;
            writeln!(file, "{}", content)?;
            Ok(success(&req, &path, json!({ "appended": content.len() })))
        }
        "delete" => {
            if !path.exists() {
                return Ok(not_found(&req));
            }
            let mut backup_path = None;
            if req.backup && path.is_file() {
                let trash = req.workspace.join(TRASH_DIR);
                fs::create_dir_all(&trash)?;
                let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
                let backup = trash.join(format!("{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), name));
                fs::copy(&path, &backup)?;
                backup_path = Some(backup);
            }
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
            Ok(success(
                &req,
                &path,
                json!({ "backup": backup_path.map(|p| p.display().to_string()) }),
            ))
        }
        "exists" => Ok(success(
            &req,
            &path,
            json!({
                "exists": path.exists(),
                "isFile": path.is_file(),
                "isDir": path.is_dir(),
            }),
        )),
        other => Ok(StepOutcome::failed(format!("unknown file operation '{}'", other))),
    }
}

fn success(req: &FileRequest, path: &Path, extra: Value) -> StepOutcome {
    let mut value = json!({
        "status": "success",
        "operation": req.operation,
        "filepath": path.display().to_string(),
    });
    if let (Some(map), Value::Object(extra)) = (value.as_object_mut(), extra) {
        map.extend(extra);
    }
    StepOutcome::ok(value)
}

fn not_found(req: &FileRequest) -> StepOutcome {
    StepOutcome::failed(format!("file not found: {}", req.filename))
}

/// Workspace files matching `pattern`, skipping `.deleted/`.
fn matching_files(req: &FileRequest) -> Result<Vec<PathBuf>, CapabilityError> {
    if req.pattern.trim().is_empty() || escapes_workspace(Path::new(&req.pattern)) {
        return Err(CapabilityError::InvalidParameters(format!(
            "pattern '{}' escapes the workspace",
            req.pattern
        )));
    }
    let base = glob::Pattern::escape(&req.workspace.to_string_lossy());
    let full = if req.recursive {
        format!("{}/**/{}", base, req.pattern)
    } else {
        format!("{}/{}", base, req.pattern)
    };
    let paths = glob::glob(&full)
        .map_err(|e| CapabilityError::InvalidParameters(format!("bad pattern: {}", e)))?;
    let trash = req.workspace.join(TRASH_DIR);
    let mut files: Vec<PathBuf> = paths
        .filter_map(Result::ok)
        .filter(|p| p.is_file() && !p.starts_with(&trash))
        .collect();
    files.sort();
    Ok(files)
}

fn relative(req: &FileRequest, path: &Path) -> String {
    path.strip_prefix(&req.workspace)
        .unwrap_or(path)
        .display()
        .to_string()
}

fn list_files(req: &FileRequest) -> Result<StepOutcome, CapabilityError> {
    let files = match matching_files(req) {
        Ok(files) => files,
        Err(CapabilityError::InvalidParameters(msg)) => return Ok(StepOutcome::failed(msg)),
        Err(e) => return Err(e),
    };
    let entries: Vec<Value> = files
        .iter()
        .map(|p| {
            json!({
                "name": relative(req, p),
                "size": fs::metadata(p).map(|m| m.len()).unwrap_or(0),
            })
        })
        .collect();
    Ok(StepOutcome::ok(json!({
        "status": "success",
        "operation": "list",
        "count": entries.len(),
        "files": entries,
    })))
}

fn search_files(req: &FileRequest) -> Result<StepOutcome, CapabilityError> {
    let Some(needle) = req.search_text.as_deref().filter(|s| !s.is_empty()) else {
        return Ok(StepOutcome::failed("no search text specified"));
    };
    let needle = needle.to_lowercase();
    let files = match matching_files(&FileRequest {
        recursive: true,
        ..req.clone()
    }) {
        Ok(files) => files,
        Err(CapabilityError::InvalidParameters(msg)) => return Ok(StepOutcome::failed(msg)),
        Err(e) => return Err(e),
    };

    let mut matches = Vec::new();
    for path in files {
        // Binary or unreadable files are skipped.
        let Ok(text) = fs::read_to_string(&path) else {
            continue;
        };
        let lines: Vec<Value> = text
            .lines()
            .enumerate()
            .filter(|(_, line)| line.to_lowercase().contains(&needle))
            .map(|(i, line)| json!({ "line": i + 1, "text": line.trim() }))
            .collect();
        if !lines.is_empty() {
            matches.push(json!({ "file": relative(req, &path), "matches": lines }));
        }
    }
    Ok(StepOutcome::ok(json!({
        "status": "success",
        "operation": "search",
        "searchText": req.search_text,
        "filesMatched": matches.len(),
        "results": matches,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OutcomeStatus, StepRecord, Task};

    fn task() -> Task {
        serde_json::from_value(json!({
            "id": "t1",
            "type": "create",
            "content": "a poem",
            "metadata": {},
            "status": "running",
            "createdAt": "2026-01-01T00:00:00Z",
            "updatedAt": "2026-01-01T00:00:00Z"
        }))
        .unwrap()
    }

    fn params(value: Value) -> Parameters {
        value.as_object().cloned().unwrap_or_default()
    }

    async fn run(cap: &FileOperationsCapability, task: &Task, value: Value) -> StepOutcome {
        let ctx = CapabilityContext::new(task, "file_step");
        cap.invoke(&ctx, &params(value)).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_uses_latest_step_text() {
        let dir = tempfile::tempdir().unwrap();
        let cap = FileOperationsCapability::new(dir.path());
        let mut task = task();
        task.step_results.insert(StepRecord {
            name: "revise".into(),
            outcome: StepOutcome::ok("final text"),
            finished_at: Utc::now(),
        });

        let outcome = run(&cap, &task, json!({"operation": "create", "filename_template": "created_t1.md"})).await;
        assert_eq!(outcome.status, OutcomeStatus::Ok);
        assert_eq!(
            fs::read_to_string(dir.path().join("created_t1.md")).unwrap(),
            "final text"
        );
    }

    #[tokio::test]
    async fn test_traversal_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let cap = FileOperationsCapability::new(dir.path().join("ws"));
        let task = task();
        for name in ["../escape.txt", "/etc/passwd", "a/../../b"] {
            let outcome = run(&cap, &task, json!({"operation": "create", "filename": name, "content": "x"})).await;
            assert!(outcome.is_failed(), "{} should be refused", name);
        }
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn test_workspace_root_and_trash_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("keep.md"), "keep").unwrap();
        fs::create_dir_all(dir.path().join(".deleted")).unwrap();
        fs::write(dir.path().join(".deleted/old.md"), "old").unwrap();
        let cap = FileOperationsCapability::new(dir.path());
        let mut task = task();

        for name in [".", "./", " . ", "./.", ".deleted", ".deleted/old.md"] {
            let outcome = run(&cap, &task, json!({"operation": "delete", "filename": name})).await;
            assert!(outcome.is_failed(), "delete of '{}' should be refused", name);
        }

        // The name can also come from task metadata.
        task.metadata.insert("filename".into(), json!("."));
        let outcome = run(&cap, &task, json!({"operation": "delete"})).await;
        assert!(outcome.is_failed());

        assert_eq!(fs::read_to_string(dir.path().join("keep.md")).unwrap(), "keep");
        assert_eq!(fs::read_to_string(dir.path().join(".deleted/old.md")).unwrap(), "old");
        assert!(confined_path(dir.path(), "./notes/a.md").is_some());
    }

    #[tokio::test]
    async fn test_missing_file_is_a_failed_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let cap = FileOperationsCapability::new(dir.path());
        let task = task();
        for op in ["read", "update", "delete"] {
            let outcome = run(&cap, &task, json!({"operation": op, "filename": "nope.txt", "content": "x"})).await;
            assert!(outcome.is_failed(), "{} of a missing file should fail", op);
        }
    }

    #[tokio::test]
    async fn test_update_modes_and_backup() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "middle").unwrap();
        let cap = FileOperationsCapability::new(dir.path());
        let task = task();

        run(&cap, &task, json!({"operation": "update", "filename": "notes.txt", "mode": "append", "content": "end"})).await;
        run(&cap, &task, json!({"operation": "update", "filename": "notes.txt", "mode": "prepend", "content": "start"})).await;

        assert_eq!(
            fs::read_to_string(dir.path().join("notes.txt")).unwrap(),
            "start\nmiddle\nend"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("notes.txt.bak")).unwrap(),
            "middle\nend"
        );
    }

    #[tokio::test]
    async fn test_delete_keeps_backup_and_list_skips_it() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::write(dir.path().join("b.md"), "b").unwrap();
        let cap = FileOperationsCapability::new(dir.path());
        let task = task();

        let outcome = run(&cap, &task, json!({"operation": "delete", "filename": "a.txt"})).await;
        assert_eq!(outcome.status, OutcomeStatus::Ok);
        assert!(!dir.path().join("a.txt").exists());
        assert_eq!(fs::read_dir(dir.path().join(".deleted")).unwrap().count(), 1);

        let listing = run(&cap, &task, json!({"operation": "list", "recursive": true})).await;
        assert_eq!(listing.value["count"], 1);
        assert_eq!(listing.value["files"][0]["name"], "b.md");
    }

    #[tokio::test]
    async fn test_search_reports_line_numbers() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/log.txt"), "alpha\nTokio runtime\nbeta").unwrap();
        let cap = FileOperationsCapability::new(dir.path());
        let task = task();

        let outcome = run(&cap, &task, json!({"operation": "search", "search_text": "tokio"})).await;
        assert_eq!(outcome.value["filesMatched"], 1);
        assert_eq!(outcome.value["results"][0]["matches"][0]["line"], 2);

        let outcome = run(&cap, &task, json!({"operation": "search"})).await;
        assert!(outcome.is_failed());
    }

    #[tokio::test]
    async fn test_unknown_operation_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cap = FileOperationsCapability::new(dir.path());
        let outcome = run(&cap, &task(), json!({"operation": "shred"})).await;
        assert!(outcome.is_failed());
    }
}

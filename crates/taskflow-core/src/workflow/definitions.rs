//! Workflow definition store: task type → definition.
//!
//! Definitions come from `*.yaml`/`*.yml` files in the task-configs
//! directory, with the built-in definitions as defaults. A file that fails
//! to parse or validate is rejected whole and reported. Its task type is
//! then unusable: the built-in of the same type is withdrawn and `resolve`
//! answers with `MalformedWorkflow` until a valid definition is registered.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::EngineError;
use crate::workflow::schema::{WorkflowDefinition, BUILTIN_WORKFLOWS};

/// Outcome of loading a directory.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub rejected: Vec<(PathBuf, String)>,
}

#[derive(Debug, Default, Clone)]
pub struct DefinitionStore {
    definitions: BTreeMap<String, WorkflowDefinition>,
    /// Task type → reason its definition file was rejected.
    rejected: BTreeMap<String, String>,
}

impl DefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding only the built-in definitions.
    pub fn with_builtins() -> Self {
        let mut store = Self::new();
        for (file, yaml) in BUILTIN_WORKFLOWS {
            let stem = file.trim_end_matches(".yaml");
            match WorkflowDefinition::from_yaml(yaml, Some(stem)) {
                Ok(def) => store.insert(def),
                Err(e) => tracing::error!("[Definitions] Built-in '{}' is invalid: {}", file, e),
            }
        }
        store
    }

    /// Validate and register a definition, replacing any previous one for
    /// the same task type.
    pub fn register(&mut self, definition: WorkflowDefinition) -> Result<(), EngineError> {
        definition.validate()?;
        self.rejected.remove(&definition.task_type.to_ascii_lowercase());
        self.insert(definition);
        Ok(())
    }

    fn insert(&mut self, definition: WorkflowDefinition) {
        let key = definition.task_type.to_ascii_lowercase();
        if self.definitions.insert(key.clone(), definition).is_some() {
            tracing::debug!("[Definitions] Replaced definition for '{}'", key);
        }
    }

    /// Load every YAML file in `dir`. Missing directories load nothing.
    pub fn load_dir(&mut self, dir: &Path) -> Result<LoadReport, EngineError> {
        let mut report = LoadReport::default();
        if !dir.is_dir() {
            tracing::warn!(
                "[Definitions] Directory '{}' does not exist, using built-ins only",
                dir.display()
            );
            return Ok(report);
        }

        let entries = std::fs::read_dir(dir).map_err(|e| {
            EngineError::Config(format!("Failed to read '{}': {}", dir.display(), e))
        })?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
            })
            .collect();
        paths.sort();

        for path in paths {
            match WorkflowDefinition::from_file(&path) {
                Ok(def) => {
                    tracing::info!(
                        "[Definitions] Loaded '{}' ({} steps) from {}",
                        def.task_type,
                        def.steps.len(),
                        path.display()
                    );
                    report.loaded.push(def.task_type.clone());
                    self.insert(def);
                }
                Err(e) => {
                    tracing::warn!("[Definitions] Rejected {}: {}", path.display(), e);
                    if let EngineError::MalformedWorkflow { workflow, reason } = &e {
                        self.rejected
                            .insert(workflow.to_ascii_lowercase(), reason.clone());
                    }
                    report.rejected.push((path, e.to_string()));
                }
            }
        }

        // A rejected file wins over any definition of the same type, built-in
        // or loaded from another file.
        for task_type in self.rejected.keys() {
            if self.definitions.remove(task_type).is_some() {
                tracing::warn!(
                    "[Definitions] Withdrew '{}': its workflow file was rejected",
                    task_type
                );
            }
        }
        Ok(report)
    }

    pub fn resolve(&self, task_type: &str) -> Result<&WorkflowDefinition, EngineError> {
        let key = task_type.to_ascii_lowercase();
        if let Some(reason) = self.rejected.get(&key) {
            return Err(EngineError::malformed(key, reason.clone()));
        }
        self.definitions
            .get(&key)
            .ok_or_else(|| EngineError::UnknownTaskType(task_type.to_string()))
    }

    /// Task types whose definition file was rejected, with the reason.
    pub fn rejected(&self) -> impl Iterator<Item = (&str, &str)> {
        self.rejected.iter().map(|(t, r)| (t.as_str(), r.as_str()))
    }

    pub fn task_types(&self) -> Vec<&str> {
        self.definitions.keys().map(String::as_str).collect()
    }

    pub fn definitions(&self) -> impl Iterator<Item = &WorkflowDefinition> {
        self.definitions.values()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

/// Write the built-in definitions into `dir`, skipping files that exist.
/// Returns the names of the files written.
pub fn write_defaults(dir: &Path) -> Result<Vec<String>, EngineError> {
    std::fs::create_dir_all(dir)
        .map_err(|e| EngineError::Config(format!("Failed to create '{}': {}", dir.display(), e)))?;
    let mut written = Vec::new();
    for (file, yaml) in BUILTIN_WORKFLOWS {
        let path = dir.join(file);
        if path.exists() {
            continue;
        }
        std::fs::write(&path, yaml).map_err(|e| {
            EngineError::Config(format!("Failed to write '{}': {}", path.display(), e))
        })?;
        tracing::info!("[Definitions] Created default {}", path.display());
        written.push(file.to_string());
    }
    Ok(written)
}

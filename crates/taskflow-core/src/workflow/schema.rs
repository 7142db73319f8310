//! YAML schema types for workflow definitions.
//!
//! One YAML document describes the pipeline for one task type:
//!
//! ```yaml
//! type: search
//! description: "Search the web and write a report"
//!
//! steps:
//!   - name: web_search
//!     plugin: web_search          # capability step
//!     optional: true
//!
//!   - name: summarize             # generation step
//!     prompt: "Summarize these search results: {web_search}"
//!
//!   - name: save_report
//!     plugin: file_operations
//!     operation: create           # sibling keys become parameters
//!     filename_template: "search_{task_id}.md"
//! ```
//!
//! Unknown keys are ignored. A definition that violates an invariant is
//! rejected as a whole with `MalformedWorkflow`.

use std::collections::HashSet;

use serde::Deserialize;

use crate::error::EngineError;
use crate::workflow::template::{is_identifier, RESERVED_NAMES};

/// Capability parameters: literal values or template strings.
pub type Parameters = serde_json::Map<String, serde_json::Value>;

/// Ordered pipeline for exactly one task type.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowDefinition {
    pub task_type: String,
    pub description: Option<String>,
    pub steps: Vec<StepSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepSpec {
    /// Unique within the definition; later templates reference it.
    pub name: String,
    pub kind: StepKind,
    pub optional: bool,
    /// Overrides the global retry budget for this step.
    pub max_attempts: Option<u32>,
    /// Overrides the global per-call timeout for this step.
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    Capability {
        capability_name: String,
        parameters: Parameters,
    },
    Generation {
        template: String,
    },
}

impl StepSpec {
    pub fn is_generation(&self) -> bool {
        matches!(self.kind, StepKind::Generation { .. })
    }

    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            StepKind::Capability { .. } => "capability",
            StepKind::Generation { .. } => "generation",
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawWorkflow {
    #[serde(default, rename = "type")]
    task_type: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    steps: Option<Vec<RawStep>>,
}

#[derive(Debug, Deserialize)]
struct RawStep {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    plugin: Option<String>,
    #[serde(default)]
    capability: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    template: Option<String>,
    #[serde(default)]
    parameters: Option<Parameters>,
    #[serde(default)]
    optional: bool,
    #[serde(default)]
    max_attempts: Option<u32>,
    #[serde(default)]
    timeout_secs: Option<u64>,
    /// Everything else; scalar siblings of a capability step are parameters.
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl WorkflowDefinition {
    /// Parse and validate a definition from YAML.
    ///
    /// `fallback_type` is used when the document has no `type` key (the
    /// loader passes the file stem).
    pub fn from_yaml(yaml: &str, fallback_type: Option<&str>) -> Result<Self, EngineError> {
        let label = fallback_type
            .map(type_from_stem)
            .unwrap_or_else(|| "<inline>".to_string());
        let raw: RawWorkflow = serde_yaml::from_str(yaml)
            .map_err(|e| EngineError::malformed(&label, format!("invalid YAML: {}", e)))?;

        let task_type = raw
            .task_type
            .or_else(|| fallback_type.map(type_from_stem))
            .map(|t| t.trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| EngineError::malformed(&label, "missing task type"))?;

        let raw_steps = raw.steps.unwrap_or_default();
        let mut steps = Vec::with_capacity(raw_steps.len());
        for (i, raw_step) in raw_steps.into_iter().enumerate() {
            steps.push(build_step(&task_type, i, raw_step)?);
        }

        let definition = Self {
            task_type,
            description: raw.description,
            steps,
        };
        definition.validate()?;
        Ok(definition)
    }

    /// Load a definition from a file path.
    pub fn from_file(path: &std::path::Path) -> Result<Self, EngineError> {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::malformed(
                type_from_stem(&stem),
                format!("failed to read '{}': {}", path.display(), e),
            )
        })?;
        Self::from_yaml(&content, Some(&stem))
    }

    /// Check the structural invariants of the definition.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.steps.is_empty() {
            return Err(EngineError::malformed(&self.task_type, "workflow has no steps"));
        }
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !is_identifier(&step.name) {
                return Err(EngineError::malformed(
                    &self.task_type,
                    format!("step name '{}' is not a valid identifier", step.name),
                ));
            }
            if RESERVED_NAMES.contains(&step.name.as_str()) {
                return Err(EngineError::malformed(
                    &self.task_type,
                    format!("step name '{}' is reserved for the task itself", step.name),
                ));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(EngineError::malformed(
                    &self.task_type,
                    format!("duplicate step name '{}'", step.name),
                ));
            }
            if step.max_attempts == Some(0) {
                return Err(EngineError::malformed(
                    &self.task_type,
                    format!("step '{}' has max_attempts = 0", step.name),
                ));
            }
            match &step.kind {
                StepKind::Capability { capability_name, .. } if capability_name.trim().is_empty() => {
                    return Err(EngineError::malformed(
                        &self.task_type,
                        format!("step '{}' names an empty capability", step.name),
                    ));
                }
                StepKind::Generation { template } if template.trim().is_empty() => {
                    return Err(EngineError::malformed(
                        &self.task_type,
                        format!("step '{}' has an empty prompt", step.name),
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Capability names referenced by this definition, in step order.
    pub fn capability_names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().filter_map(|s| match &s.kind {
            StepKind::Capability { capability_name, .. } => Some(capability_name.as_str()),
            StepKind::Generation { .. } => None,
        })
    }
}

/// `search_tasks` → `search`.
fn type_from_stem(stem: &str) -> String {
    stem.strip_suffix("_tasks")
        .unwrap_or(stem)
        .trim()
        .to_ascii_lowercase()
}

fn build_step(task_type: &str, index: usize, raw: RawStep) -> Result<StepSpec, EngineError> {
    let name = raw
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| EngineError::malformed(task_type, format!("step #{} has no name", index + 1)))?;

    let capability = raw.plugin.or(raw.capability);
    let prompt = raw.prompt.or(raw.template);

    let kind = match (capability, prompt) {
        (Some(_), Some(_)) => {
            return Err(EngineError::malformed(
                task_type,
                format!("step '{}' has both a capability and a prompt", name),
            ))
        }
        (None, None) => {
            return Err(EngineError::malformed(
                task_type,
                format!("step '{}' has neither a capability nor a prompt", name),
            ))
        }
        (Some(capability_name), None) => {
            let mut parameters: Parameters = raw
                .extra
                .into_iter()
                .filter(|(_, v)| !v.is_object() && !v.is_array())
                .collect();
            for (k, v) in raw.parameters.unwrap_or_default() {
                parameters.insert(k, v);
            }
            StepKind::Capability {
                capability_name: capability_name.trim().to_string(),
                parameters,
            }
        }
        (None, Some(template)) => StepKind::Generation { template },
    };

    Ok(StepSpec {
        name,
        kind,
        optional: raw.optional,
        max_attempts: raw.max_attempts,
        timeout_secs: raw.timeout_secs,
    })
}

/// Definitions shipped with the engine, keyed by file name.
pub const BUILTIN_WORKFLOWS: &[(&str, &str)] = &[
    (
        "search_tasks.yaml",
        r#"type: search
description: "Search the web, summarize the findings and save a report"
steps:
  - name: web_search
    plugin: web_search
    optional: true
  - name: summarize
    prompt: "Summarize these search results in a clear, organized way: {web_search}"
  - name: create_report
    prompt: "Create a detailed report based on this summary: {summarize_result}"
  - name: save_report
    plugin: file_operations
    operation: create
    filename_template: "search_{task_id}.md"
"#,
    ),
    (
        "process_tasks.yaml",
        r#"type: process
description: "Analyze, improve and polish a piece of content"
steps:
  - name: analyze
    prompt: "Analyze this content and identify key points: {content}"
  - name: improve
    prompt: "Improve and enhance this content: {content}"
  - name: final_polish
    prompt: "Give this a final polish and make it perfect: {improve_result}"
"#,
    ),
    (
        "create_tasks.yaml",
        r#"type: create
description: "Outline, draft, revise and save a new document"
steps:
  - name: outline
    prompt: "Create a detailed outline for: {content}"
  - name: draft
    prompt: "Write a first draft based on this outline: {outline_result}"
  - name: revise
    prompt: "Revise and improve this draft: {draft_result}"
  - name: save_document
    plugin: file_operations
    operation: create
    filename_template: "created_{task_id}.md"
"#,
    ),
    (
        "code_tasks.yaml",
        r#"type: code
description: "Plan, write and test code, then save it"
steps:
  - name: analyze_requirements
    prompt: "Analyze these requirements and plan the implementation: {content}"
  - name: write_code
    prompt: "Write clean, working code based on this plan: {analyze_requirements_result}"
  - name: add_tests
    prompt: "Add comprehensive tests for this code: {write_code_result}"
  - name: save_code
    plugin: file_operations
    operation: create
    filename_template: "code_{task_id}.py"
"#,
    ),
];

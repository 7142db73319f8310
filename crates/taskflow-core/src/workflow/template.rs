//! Placeholder substitution for prompts and capability parameters.
//!
//! A placeholder is `{name}` where `name` is an identifier. Each
//! placeholder is matched as one whole token, so `{search}` never touches
//! `{search_result}`. Names resolve in this order:
//!
//! 1. `content`, `task_id`, `task_type`
//! 2. a step name with a recorded outcome
//! 3. `<step>_result` for a step with a recorded outcome
//! 4. a metadata key
//!
//! Anything else becomes empty text. Braces around non-identifiers (JSON
//! snippets, `{ }`) are left untouched.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::models::Task;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern"))
}

/// Variables bound to the task itself. They take precedence over step
/// results, so no step may use one of these names.
pub const RESERVED_NAMES: [&str; 3] = ["content", "task_id", "task_type"];

/// Whether `s` is usable as a placeholder name.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Rendered template plus the placeholder names that resolved to nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub text: String,
    pub unresolved: Vec<String>,
}

pub struct TemplateResolver;

impl TemplateResolver {
    /// Substitute every placeholder in `template` against `task`.
    pub fn resolve(template: &str, task: &Task) -> String {
        Self::resolve_detailed(template, task).text
    }

    pub fn resolve_detailed(template: &str, task: &Task) -> Resolution {
        let mut unresolved = Vec::new();
        let text = placeholder_re()
            .replace_all(template, |caps: &Captures| {
                let name = &caps[1];
                match lookup(name, task) {
                    Some(value) => value,
                    None => {
                        if !unresolved.iter().any(|u| u == name) {
                            unresolved.push(name.to_string());
                        }
                        String::new()
                    }
                }
            })
            .into_owned();
        Resolution { text, unresolved }
    }

    /// Resolve every string inside a parameter value, recursively.
    pub fn resolve_value(value: &Value, task: &Task, unresolved: &mut Vec<String>) -> Value {
        match value {
            Value::String(s) => {
                let resolution = Self::resolve_detailed(s, task);
                for name in resolution.unresolved {
                    if !unresolved.contains(&name) {
                        unresolved.push(name);
                    }
                }
                Value::String(resolution.text)
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| Self::resolve_value(v, task, unresolved))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::resolve_value(v, task, unresolved)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

fn lookup(name: &str, task: &Task) -> Option<String> {
    match name {
        "content" => return Some(task.content.clone()),
        "task_id" => return Some(task.id.clone()),
        "task_type" => return Some(task.task_type.clone()),
        _ => {}
    }
    if let Some(outcome) = task.step_results.get(name) {
        return Some(render(&outcome.value));
    }
    if let Some(outcome) = name
        .strip_suffix("_result")
        .and_then(|step| task.step_results.get(step))
    {
        return Some(render(&outcome.value));
    }
    task.metadata.get(name).map(render)
}

/// Text form of a value as seen by prompts.
pub fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) if items.iter().all(is_scalar) => items
            .iter()
            .map(render)
            .collect::<Vec<_>>()
            .join("\n"),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

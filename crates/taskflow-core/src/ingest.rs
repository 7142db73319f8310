//! Batch task ingestion.
//!
//! A batch is plain text. Every entry starts with a `{type}` marker at the
//! beginning of a line and runs until the next such marker:
//!
//! ```text
//! {search} lang=en,depth=2 :: rust async runtimes
//! {process} Tighten up this paragraph:
//! It spans several lines.
//! ```
//!
//! Metadata is optional: comma-separated `key=value` pairs before the
//! first `::`. The prefix only counts as metadata when it contains `=`,
//! so content like `std::fs::read` is left alone. Malformed entries are
//! reported individually; the rest of the batch still goes in.

use std::path::Path;

use serde::Serialize;
use serde_json::Value;

use crate::error::EngineError;
use crate::models::{CreateTaskInput, Metadata, Task};
use crate::store::TaskStore;
use crate::workflow::template::is_identifier;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestError {
    /// 1-based position of the entry in the batch.
    pub entry: usize,
    /// 1-based line the entry starts on.
    pub line: usize,
    pub reason: String,
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "entry {} (line {}): {}", self.entry, self.line, self.reason)
    }
}

#[derive(Debug, Default)]
pub struct ParsedBatch {
    pub entries: Vec<CreateTaskInput>,
    pub errors: Vec<IngestError>,
}

#[derive(Debug, Default, Serialize)]
pub struct IngestReport {
    pub created: Vec<String>,
    pub errors: Vec<IngestError>,
}

struct RawEntry {
    line: usize,
    marker: String,
    body: Vec<String>,
}

/// `{name}` at the start of a line: the name and the rest of the line.
///
/// Any brace pair that looks like a word, even a malformed one such as
/// `{bad type}`, counts as a marker so it gets reported on its own. Braces
/// holding quotes or punctuation (`{"k": 1}`) are content.
fn split_marker(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix('{')?;
    let end = rest.find('}')?;
    let name = &rest[..end];
    if name.trim().is_empty() || name.contains(['{', '"', '\'', ':', ',', '=']) {
        return None;
    }
    Some((name, &rest[end + 1..]))
}

fn valid_type_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Parse a batch without touching the store.
pub fn parse_batch(text: &str) -> ParsedBatch {
    let mut batch = ParsedBatch::default();
    let mut raw_entries: Vec<RawEntry> = Vec::new();
    let mut stray_line: Option<usize> = None;

    for (i, line) in text.lines().enumerate() {
        let line_no = i + 1;
        match split_marker(line) {
            Some((name, rest)) => raw_entries.push(RawEntry {
                line: line_no,
                marker: name.to_string(),
                body: vec![rest.to_string()],
            }),
            None => match raw_entries.last_mut() {
                Some(entry) => entry.body.push(line.to_string()),
                None if !line.trim().is_empty() && stray_line.is_none() => {
                    stray_line = Some(line_no);
                }
                None => {}
            },
        }
    }

    let offset = usize::from(stray_line.is_some());
    if let Some(line) = stray_line {
        batch.errors.push(IngestError {
            entry: 1,
            line,
            reason: "text before the first {type} marker".into(),
        });
    }

    for (i, raw) in raw_entries.into_iter().enumerate() {
        let entry = i + 1 + offset;
        match build_entry(&raw) {
            Ok(input) => batch.entries.push(input),
            Err(reason) => batch.errors.push(IngestError {
                entry,
                line: raw.line,
                reason,
            }),
        }
    }
    batch
}

fn build_entry(raw: &RawEntry) -> Result<CreateTaskInput, String> {
    if !valid_type_name(&raw.marker) {
        return Err(format!("malformed type marker '{{{}}}'", raw.marker));
    }
    let text = raw.body.join("\n");

    let (metadata, content) = match text.split_once("::") {
        Some((prefix, rest)) if prefix.contains('=') => (parse_metadata(prefix)?, rest),
        Some((prefix, rest)) if prefix.trim().is_empty() => (Metadata::new(), rest),
        _ => (Metadata::new(), text.as_str()),
    };

    let content = content.trim();
    if content.is_empty() {
        return Err("entry has no content".into());
    }

    Ok(CreateTaskInput {
        task_type: raw.marker.to_ascii_lowercase(),
        content: content.to_string(),
        metadata,
    })
}

/// Parse comma-separated `key=value` pairs into typed metadata.
pub fn parse_metadata(prefix: &str) -> Result<Metadata, String> {
    let mut metadata = Metadata::new();
    for item in prefix.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let Some((key, value)) = item.split_once('=') else {
            return Err(format!("metadata item '{}' is not key=value", item));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("metadata item '{}' has an empty key", item));
        }
        if !is_identifier(key) {
            return Err(format!("metadata key '{}' is not a valid identifier", key));
        }
        metadata.insert(key.to_string(), typed_value(value.trim()));
    }
    Ok(metadata)
}

/// `true`/`false`, integers and floats keep their type; everything else is text.
pub fn typed_value(raw: &str) -> Value {
    match raw.to_ascii_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if f.is_finite() {
            return Value::from(f);
        }
    }
    Value::String(raw.to_string())
}

/// Parse `text` and persist every well-formed entry.
pub async fn ingest_text(text: &str, store: &TaskStore) -> Result<IngestReport, EngineError> {
    let batch = parse_batch(text);
    let mut report = IngestReport {
        created: Vec::with_capacity(batch.entries.len()),
        errors: batch.errors,
    };
    for input in batch.entries {
        let task: Task = store.create(input).await?;
        report.created.push(task.id);
    }
    for error in &report.errors {
        tracing::warn!("[Ingest] Skipped {}", error);
    }
    tracing::info!(
        "[Ingest] Added {} task(s), rejected {}",
        report.created.len(),
        report.errors.len()
    );
    Ok(report)
}

pub async fn ingest_file(path: &Path, store: &TaskStore) -> Result<IngestReport, EngineError> {
    let text = tokio::fs::read_to_string(path).await.map_err(|e| {
        EngineError::BadRequest(format!("Failed to read '{}': {}", path.display(), e))
    })?;
    ingest_text(&text, store).await
}

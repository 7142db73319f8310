use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Caller-supplied metadata. Insertion order is preserved.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Terminal states an external collaborator may re-queue from.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Ok,
    Fallback,
    Failed,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Fallback => "fallback",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ok" => Some(Self::Ok),
            "fallback" => Some(Self::Fallback),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Normalized result of one step's execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub status: OutcomeStatus,
    #[serde(default)]
    pub value: serde_json::Value,
    /// Set when a capability ran in reduced-functionality mode.
    #[serde(default)]
    pub degraded: bool,
    /// The absorbed or fatal error, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default = "default_attempts")]
    pub attempts: u32,
}

fn default_attempts() -> u32 {
    1
}

impl StepOutcome {
    pub fn ok(value: impl Into<serde_json::Value>) -> Self {
        Self {
            status: OutcomeStatus::Ok,
            value: value.into(),
            degraded: false,
            error: None,
            attempts: 1,
        }
    }

    /// Documented reduced-functionality result, e.g. missing credentials.
    /// `explanation` becomes the value so later templates can see it.
    pub fn degraded(explanation: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Fallback,
            value: serde_json::Value::String(explanation.into()),
            degraded: true,
            error: None,
            attempts: 1,
        }
    }

    /// An optional step whose failure was absorbed into the task.
    pub fn absorbed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            status: OutcomeStatus::Fallback,
            value: serde_json::Value::String(error.clone()),
            degraded: true,
            error: Some(error),
            attempts: 1,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            status: OutcomeStatus::Failed,
            value: serde_json::Value::String(error.clone()),
            degraded: false,
            error: Some(error),
            attempts: 1,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn is_failed(&self) -> bool {
        self.status == OutcomeStatus::Failed
    }
}

/// One finished step of a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub name: String,
    pub outcome: StepOutcome,
    pub finished_at: DateTime<Utc>,
}

/// Step outcomes of a task in the order the steps finished.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct StepResults(Vec<StepRecord>);

impl StepResults {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn get(&self, name: &str) -> Option<&StepOutcome> {
        self.0.iter().find(|r| r.name == name).map(|r| &r.outcome)
    }

    /// Whether `name` already finished with a non-fatal outcome.
    pub fn is_settled(&self, name: &str) -> bool {
        self.get(name).is_some_and(|o| !o.is_failed())
    }

    /// Insert or replace the record for `record.name`, keeping finish order.
    pub fn insert(&mut self, record: StepRecord) {
        self.0.retain(|r| r.name != record.name);
        self.0.push(record);
    }

    pub fn iter(&self) -> impl Iterator<Item = &StepRecord> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Most recent non-empty textual value from a successful step.
    pub fn last_text(&self) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .filter(|r| r.outcome.status == OutcomeStatus::Ok)
            .filter_map(|r| r.outcome.value.as_str())
            .find(|s| !s.trim().is_empty())
    }
}

impl FromIterator<StepRecord> for StepResults {
    fn from_iter<I: IntoIterator<Item = StepRecord>>(iter: I) -> Self {
        let mut results = StepResults::new();
        for record in iter {
            results.insert(record);
        }
        results
    }
}

/// A queued unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub status: TaskStatus,
    #[serde(default)]
    pub step_results: StepResults,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Input for creating a new task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskInput {
    #[serde(rename = "type")]
    pub task_type: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl CreateTaskInput {
    pub fn new(task_type: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Partial update input used by editors.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskInput {
    #[serde(rename = "type")]
    pub task_type: Option<String>,
    pub content: Option<String>,
    pub metadata: Option<Metadata>,
}

/// Number of tasks per status.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.running + self.completed + self.failed
    }
}

//! Process-wide engine configuration.
//!
//! Loaded once from YAML at startup, overlaid with environment overrides
//! once, then treated as immutable and handed to the engine, the step
//! executor and the built-in capabilities.
//!
//! ```yaml
//! model: "gpt-oss:20b"
//! backend:
//!   adapter: ollama        # ollama | openai
//!   host: "http://localhost:11434"
//! temperature: 0.7
//! top_p: 0.9
//! max_tokens: -1
//! delay_between_items: 2
//! delay_between_steps: 1
//! retry:
//!   max_attempts: 3
//!   base_delay_ms: 1000
//!   backoff: fixed         # fixed | linear | exponential
//! task_configs_dir: task_configs
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::workflow::backend::GenerationSettings;
use crate::workflow::retry::{Backoff, RetryPolicy};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Model identifier passed to the generation backend.
    pub model: String,
    pub backend: BackendConfig,
    pub temperature: f64,
    pub top_p: f64,
    /// Maximum tokens to generate; `-1` means unbounded.
    pub max_tokens: i64,
    /// Pause between two tasks, in seconds.
    pub delay_between_items: f64,
    /// Pause between two steps of one task, in seconds.
    pub delay_between_steps: f64,
    pub retry: RetryConfig,
    /// Upper bound for one backend call or capability invocation.
    pub step_timeout_secs: u64,
    /// Poll interval when running in watch mode and the queue is empty.
    pub idle_poll_secs: u64,
    pub task_configs_dir: PathBuf,
    pub workspace_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results_dir: Option<PathBuf>,
    pub db_path: String,
    pub allowed_languages: Vec<String>,
    pub search: SearchConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: "gpt-oss:20b".to_string(),
            backend: BackendConfig::default(),
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: -1,
            delay_between_items: 2.0,
            delay_between_steps: 1.0,
            retry: RetryConfig::default(),
            step_timeout_secs: 600,
            idle_poll_secs: 5,
            task_configs_dir: PathBuf::from("task_configs"),
            workspace_dir: PathBuf::from("workspace"),
            results_dir: Some(PathBuf::from("results")),
            db_path: "taskflow.db".to_string(),
            allowed_languages: vec!["python".to_string(), "javascript".to_string()],
            search: SearchConfig::default(),
        }
    }
}

/// Which wire protocol the generation backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendAdapter {
    #[default]
    Ollama,
    /// Any OpenAI-compatible `/chat/completions` endpoint.
    #[serde(alias = "openai-compatible")]
    OpenAi,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub adapter: BackendAdapter,
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            adapter: BackendAdapter::Ollama,
            host: "http://localhost:11434".to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            backoff: Backoff::Fixed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchProvider {
    #[default]
    Serper,
    Tavily,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SearchConfig {
    pub provider: SearchProvider,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serper_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tavily_api_key: Option<String>,
}

impl EngineConfig {
    /// Parse a configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, EngineError> {
        serde_yaml::from_str(yaml)
            .map_err(|e| EngineError::Config(format!("Failed to parse config YAML: {}", e)))
    }

    /// Load the configuration file, writing the defaults first if it is missing.
    pub fn load_or_create(path: &Path) -> Result<Self, EngineError> {
        if !path.exists() {
            let config = Self::default();
            config.write(path)?;
            tracing::info!("[Config] Created default config at {}", path.display());
            return Ok(config);
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("Failed to read config '{}': {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    pub fn write(&self, path: &Path) -> Result<(), EngineError> {
        let yaml = serde_yaml::to_string(self)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| EngineError::Config(format!("Failed to create config dir: {}", e)))?;
            }
        }
        std::fs::write(path, yaml).map_err(|e| {
            EngineError::Config(format!("Failed to write config '{}': {}", path.display(), e))
        })
    }

    /// Apply environment overrides from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok().filter(|v| !v.trim().is_empty()))
    }

    /// Apply overrides from an arbitrary lookup.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(host) = lookup("OLLAMA_HOST") {
            self.backend.host = host;
        }
        if let Some(model) = lookup("TASKFLOW_MODEL") {
            self.model = model;
        }
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.backend.api_key = Some(key);
        }
        if let Some(key) = lookup("SERPER_API_KEY") {
            self.search.serper_api_key = Some(key);
        }
        if let Some(key) = lookup("TAVILY_API_KEY") {
            self.search.tavily_api_key = Some(key);
        }
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.model.trim().is_empty() {
            return Err(EngineError::Config("model must not be empty".into()));
        }
        if !self.delay_between_items.is_finite() || self.delay_between_items < 0.0 {
            return Err(EngineError::Config("delay_between_items must be >= 0".into()));
        }
        if !self.delay_between_steps.is_finite() || self.delay_between_steps < 0.0 {
            return Err(EngineError::Config("delay_between_steps must be >= 0".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(EngineError::Config("retry.max_attempts must be at least 1".into()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(EngineError::Config("temperature must be within [0, 2]".into()));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(EngineError::Config("top_p must be within (0, 1]".into()));
        }
        if self.step_timeout_secs == 0 {
            return Err(EngineError::Config("step_timeout_secs must be at least 1".into()));
        }
        Ok(())
    }

    pub fn generation_settings(&self) -> GenerationSettings {
        GenerationSettings {
            model: self.model.clone(),
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            self.retry.backoff,
            Duration::from_millis(self.retry.base_delay_ms),
        )
    }

    pub fn item_delay(&self) -> Duration {
        Duration::from_secs_f64(self.delay_between_items.max(0.0))
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_secs_f64(self.delay_between_steps.max(0.0))
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs.max(1))
    }
}

/// Load `.env` into the process environment if present.
/// Variables already set take priority.
pub fn load_dotenv() {
    if let Ok(path) = dotenv::dotenv() {
        tracing::info!("[Config] Loaded environment from '{}'", path.display());
    }
}

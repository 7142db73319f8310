//! Generation backends: send one prompt to a hosted model, get text back.
//!
//! Two wire protocols are supported:
//! - Ollama: `POST {host}/api/generate` with `stream: false`
//! - OpenAI-compatible: `POST {host}/chat/completions` with bearer auth
//!
//! The client carries no timeout of its own; the step executor bounds
//! every call.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::{BackendAdapter, BackendConfig};

/// Sampling parameters forwarded with every generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
    /// `-1` means unbounded.
    pub max_tokens: i64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: "gpt-oss:20b".to_string(),
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: -1,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Decode(String),

    #[error("Backend returned no text")]
    Empty,
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        prompt: &str,
        settings: &GenerationSettings,
    ) -> Result<String, GenerationError>;
}

/// Build the backend selected by the configuration.
pub fn backend_from_config(config: &BackendConfig) -> Arc<dyn GenerationBackend> {
    match config.adapter {
        BackendAdapter::Ollama => Arc::new(OllamaBackend::new(&config.host)),
        BackendAdapter::OpenAi => Arc::new(OpenAiCompatibleBackend::new(
            &config.host,
            config.api_key.clone(),
        )),
    }
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

fn number(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or_else(|| Value::from(0))
}

async fn post_json(
    request: reqwest::RequestBuilder,
    body: &Value,
) -> Result<Value, GenerationError> {
    let response = request
        .header("content-type", "application/json")
        .json(body)
        .send()
        .await
        .map_err(|e| GenerationError::Http(e.to_string()))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| GenerationError::Http(format!("failed to read response body: {}", e)))?;

    if !status.is_success() {
        return Err(GenerationError::Status {
            status: status.as_u16(),
            body: text,
        });
    }

    serde_json::from_str(&text).map_err(|e| GenerationError::Decode(e.to_string()))
}

// ── Ollama ──────────────────────────────────────────────────────────────

pub struct OllamaBackend {
    client: reqwest::Client,
    host: String,
}

impl OllamaBackend {
    pub fn new(host: &str) -> Self {
        Self {
            client: http_client(),
            host: host.trim_end_matches('/').to_string(),
        }
    }
}

pub(crate) fn ollama_request_body(prompt: &str, settings: &GenerationSettings) -> Value {
    json!({
        "model": settings.model,
        "prompt": prompt,
        "stream": false,
        "options": {
            "temperature": number(settings.temperature),
            "top_p": number(settings.top_p),
            "num_predict": settings.max_tokens,
        }
    })
}

pub(crate) fn extract_ollama_text(json: &Value) -> Result<String, GenerationError> {
    if let Some(err) = json.get("error").and_then(|e| e.as_str()) {
        return Err(GenerationError::Decode(err.to_string()));
    }
    json.get("response")
        .and_then(|r| r.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| GenerationError::Decode("missing 'response' field".into()))
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(
        &self,
        prompt: &str,
        settings: &GenerationSettings,
    ) -> Result<String, GenerationError> {
        let url = format!("{}/api/generate", self.host);
        tracing::debug!("[Backend] POST {} (model: {})", url, settings.model);

        let body = ollama_request_body(prompt, settings);
        let json = post_json(self.client.post(&url), &body).await?;
        let text = extract_ollama_text(&json)?;
        if text.trim().is_empty() {
            return Err(GenerationError::Empty);
        }
        Ok(text)
    }
}

// ── OpenAI-compatible ───────────────────────────────────────────────────

pub struct OpenAiCompatibleBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatibleBackend {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

pub(crate) fn chat_request_body(prompt: &str, settings: &GenerationSettings) -> Value {
    let mut body = json!({
        "model": settings.model,
        "messages": [{ "role": "user", "content": prompt }],
        "temperature": number(settings.temperature),
        "top_p": number(settings.top_p),
    });
    if settings.max_tokens > 0 {
        body["max_tokens"] = Value::from(settings.max_tokens);
    }
    body
}

pub(crate) fn extract_chat_text(json: &Value) -> Result<String, GenerationError> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| GenerationError::Decode("missing choices[0].message.content".into()))
}

#[async_trait]
impl GenerationBackend for OpenAiCompatibleBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(
        &self,
        prompt: &str,
        settings: &GenerationSettings,
    ) -> Result<String, GenerationError> {
        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!("[Backend] POST {} (model: {})", url, settings.model);

        let mut request = self.client.post(&url);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let body = chat_request_body(prompt, settings);
        let json = post_json(request, &body).await?;
        let text = extract_chat_text(&json)?;
        if text.trim().is_empty() {
            return Err(GenerationError::Empty);
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ollama_body_disables_streaming() {
        let body = ollama_request_body("hi", &GenerationSettings::default());
        assert_eq!(body["stream"], false);
        assert_eq!(body["model"], "gpt-oss:20b");
        assert_eq!(body["options"]["num_predict"], -1);
        assert_eq!(body["options"]["top_p"], 0.9);
    }

    #[test]
    fn test_extract_ollama_text() {
        let ok = json!({"model": "m", "response": "hello", "done": true});
        assert_eq!(extract_ollama_text(&ok).unwrap(), "hello");

        let err = json!({"error": "model 'x' not found"});
        assert!(extract_ollama_text(&err).unwrap_err().to_string().contains("not found"));
    }

    #[test]
    fn test_chat_body_omits_unbounded_max_tokens() {
        let body = chat_request_body("hi", &GenerationSettings::default());
        assert!(body.get("max_tokens").is_none());

        let settings = GenerationSettings {
            max_tokens: 256,
            ..Default::default()
        };
        assert_eq!(chat_request_body("hi", &settings)["max_tokens"], 256);
    }

    #[test]
    fn test_extract_chat_text() {
        let json = json!({
            "choices": [{ "message": { "role": "assistant", "content": "done" } }]
        });
        assert_eq!(extract_chat_text(&json).unwrap(), "done");
        assert!(extract_chat_text(&json!({"choices": []})).is_err());
    }

    #[test]
    fn test_backend_from_config() {
        let mut config = BackendConfig::default();
        assert_eq!(backend_from_config(&config).name(), "ollama");
        config.adapter = BackendAdapter::OpenAi;
        assert_eq!(backend_from_config(&config).name(), "openai");
    }
}

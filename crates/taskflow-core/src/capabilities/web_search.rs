//! `web_search`: query Serper or Tavily.
//!
//! Without usable credentials the capability answers with a degraded
//! `fallback` outcome instead of failing, so optional search steps
//! never stop a pipeline on a machine without API keys.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::capabilities::{Capability, CapabilityContext, CapabilityError, Parameters};
use crate::config::{SearchConfig, SearchProvider};
use crate::models::StepOutcome;

const SERPER_URL: &str = "https://google.serper.dev/search";
const TAVILY_URL: &str = "https://api.tavily.com/search";

pub struct WebSearchCapability {
    client: reqwest::Client,
    provider: SearchProvider,
    serper_key: Option<String>,
    tavily_key: Option<String>,
}

impl WebSearchCapability {
    pub fn new(config: &SearchConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            provider: config.provider,
            serper_key: usable_key(config.serper_api_key.as_deref()),
            tavily_key: usable_key(config.tavily_api_key.as_deref()),
        }
    }

    /// Preferred provider if it has a key, otherwise any provider that does.
    fn select(&self) -> Option<(SearchProvider, &str)> {
        let serper = self.serper_key.as_deref().map(|k| (SearchProvider::Serper, k));
        let tavily = self.tavily_key.as_deref().map(|k| (SearchProvider::Tavily, k));
        match self.provider {
            SearchProvider::Serper => serper.or(tavily),
            SearchProvider::Tavily => tavily.or(serper),
        }
    }

    async fn post(
        &self,
        url: &str,
        request: reqwest::RequestBuilder,
        body: &Value,
    ) -> Result<Value, CapabilityError> {
        let response = request
            .json(body)
            .send()
            .await
            .map_err(|e| CapabilityError::Http(format!("{}: {}", url, e)))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CapabilityError::Http(format!("{} returned {}: {}", url, status, text)));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| CapabilityError::Http(format!("invalid JSON from {}: {}", url, e)))
    }
}

/// Keys copied from a template `.env` (`your_serper_key`) count as missing.
fn usable_key(key: Option<&str>) -> Option<String> {
    key.map(str::trim)
        .filter(|k| !k.is_empty() && !k.starts_with("your_"))
        .map(str::to_string)
}

/// Reduce a provider response to `[{title, url, snippet}]`.
pub(crate) fn normalize_results(provider: SearchProvider, raw: &Value) -> Vec<Value> {
    let (list_key, url_key, snippet_key) = match provider {
        SearchProvider::Serper => ("organic", "link", "snippet"),
        SearchProvider::Tavily => ("results", "url", "content"),
    };
    raw.get(list_key)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .map(|item| {
                    json!({
                        "title": item.get("title").and_then(|v| v.as_str()).unwrap_or(""),
                        "url": item.get(url_key).and_then(|v| v.as_str()).unwrap_or(""),
                        "snippet": item.get(snippet_key).and_then(|v| v.as_str()).unwrap_or(""),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl Capability for WebSearchCapability {
    fn name(&self) -> &str {
        "web_search"
    }

    async fn invoke(
        &self,
        ctx: &CapabilityContext<'_>,
        params: &Parameters,
    ) -> Result<StepOutcome, CapabilityError> {
        let query = ctx
            .setting(params, "query")
            .or_else(|| ctx.setting(params, "search_query"))
            .unwrap_or_else(|| ctx.content.trim().to_string());
        if query.is_empty() {
            return Ok(StepOutcome::degraded("search unavailable: empty query"));
        }

        let Some((provider, key)) = self.select() else {
            tracing::warn!("[WebSearch] No SERPER_API_KEY or TAVILY_API_KEY configured");
            return Ok(StepOutcome::degraded(
                "search unavailable: no search API key configured",
            ));
        };

        tracing::info!("[WebSearch] {:?} query: {}", provider, query);
        let raw = match provider {
            SearchProvider::Serper => {
                let request = self.client.post(SERPER_URL).header("X-API-KEY", key);
                self.post(SERPER_URL, request, &json!({ "q": query })).await?
            }
            SearchProvider::Tavily => {
                let body = json!({
                    "api_key": key,
                    "query": query,
                    "search_depth": "advanced",
                    "include_answer": true,
                });
                self.post(TAVILY_URL, self.client.post(TAVILY_URL), &body).await?
            }
        };

        let results = normalize_results(provider, &raw);
        let mut value = json!({
            "provider": format!("{:?}", provider).to_lowercase(),
            "query": query,
            "results": results,
        });
        if let Some(answer) = raw.get("answer").and_then(|a| a.as_str()) {
            value["answer"] = Value::String(answer.to_string());
        }
        Ok(StepOutcome::ok(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OutcomeStatus, Task};

    fn task() -> Task {
        serde_json::from_value(json!({
            "id": "t1",
            "type": "search",
            "content": "rust async runtimes",
            "status": "running",
            "createdAt": "2026-01-01T00:00:00Z",
            "updatedAt": "2026-01-01T00:00:00Z"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_missing_credentials_degrade() {
        let capability = WebSearchCapability::new(&SearchConfig {
            serper_api_key: Some("your_serper_api_key_here".into()),
            ..Default::default()
        });
        let task = task();
        let ctx = CapabilityContext::new(&task, "web_search");
        let outcome = capability.invoke(&ctx, &Parameters::new()).await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Fallback);
        assert!(outcome.degraded);
        assert!(outcome.value.as_str().unwrap().starts_with("search unavailable"));
    }

    #[test]
    fn test_provider_selection_falls_back_to_available_key() {
        let capability = WebSearchCapability::new(&SearchConfig {
            provider: SearchProvider::Serper,
            serper_api_key: None,
            tavily_api_key: Some("tvly-123".into()),
        });
        assert_eq!(capability.select(), Some((SearchProvider::Tavily, "tvly-123")));
    }

    #[test]
    fn test_normalize_results() {
        let serper = json!({"organic": [{"title": "Tokio", "link": "https://tokio.rs", "snippet": "runtime"}]});
        let results = normalize_results(SearchProvider::Serper, &serper);
        assert_eq!(results[0]["url"], "https://tokio.rs");

        let tavily = json!({"results": [{"title": "smol", "url": "https://smol.rs", "content": "small"}]});
        let results = normalize_results(SearchProvider::Tavily, &tavily);
        assert_eq!(results[0]["snippet"], "small");

        assert!(normalize_results(SearchProvider::Serper, &json!({})).is_empty());
    }
}

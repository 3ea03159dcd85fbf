use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use super::retry::RetryingInvoker;

const DEFAULT_SEARCH_ENDPOINT: &str = "https://api.tavily.com/search";
const DEFAULT_MAX_RESULTS: usize = 5;
const DEFAULT_TIMEOUT_MS: u64 = 20_000;

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub max_results: usize,
    pub domain_filters: Vec<String>,
    pub timeout: Duration,
}

impl SearchConfig {
    pub fn from_env() -> Self {
        let domain_filters = env_string("SEARCH_DOMAINS")
            .map(|raw| {
                raw.split(',')
                    .map(|d| d.trim().to_string())
                    .filter(|d| !d.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            api_key: env_string("SEARCH_API_KEY"),
            endpoint: env_string("SEARCH_API_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_SEARCH_ENDPOINT.to_string()),
            max_results: env_string("SEARCH_MAX_RESULTS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_RESULTS),
            domain_filters,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search not configured: {0}")]
    NotConfigured(&'static str),
    #[error("search quota exhausted")]
    QuotaExhausted,
    #[error("search request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("search HTTP {status}: {body}")]
    HttpStatus { status: reqwest::StatusCode, body: String },
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(
        &self,
        query: &str,
        domain_filters: &[String],
        max_results: usize,
    ) -> Result<Vec<String>, SearchError>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    content: String,
}

impl SearchHit {
    fn into_snippet(self) -> String {
        match (self.title, self.url) {
            (Some(title), Some(url)) => format!("{title} ({url}): {}", self.content),
            (Some(title), None) => format!("{title}: {}", self.content),
            _ => self.content,
        }
    }
}

/// Web search over a Tavily-compatible JSON API.
#[derive(Clone)]
pub struct HttpSearchProvider {
    config: SearchConfig,
    client: reqwest::Client,
}

impl HttpSearchProvider {
    pub fn new(config: SearchConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, client }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    async fn search(
        &self,
        query: &str,
        domain_filters: &[String],
        max_results: usize,
    ) -> Result<Vec<String>, SearchError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(SearchError::NotConfigured("SEARCH_API_KEY"))?;

        let payload = serde_json::json!({
            "api_key": api_key,
            "query": query,
            "max_results": max_results,
            "include_domains": domain_filters,
        });

        let resp = self.client.post(&self.config.endpoint).json(&payload).send().await?;
        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SearchError::QuotaExhausted);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SearchError::HttpStatus { status, body });
        }

        let parsed: SearchResponse = resp.json().await?;
        Ok(parsed
            .results
            .into_iter()
            .take(max_results)
            .map(SearchHit::into_snippet)
            .filter(|s| !s.trim().is_empty())
            .collect())
    }
}

/// Search that never fails: provider errors become a single explanatory
/// snippet so the caller can continue with reduced context.
pub async fn search_or_placeholder(
    invoker: &RetryingInvoker,
    provider: &dyn SearchProvider,
    query: &str,
    domain_filters: &[String],
    max_results: usize,
) -> Vec<String> {
    let result = invoker
        .invoke("web_search", || provider.search(query, domain_filters, max_results))
        .await;
    match result {
        Ok(snippets) if !snippets.is_empty() => snippets,
        Ok(_) => vec![format!(
            "No web results were found for \"{query}\". Rely on established knowledge of the subject."
        )],
        Err(err) => {
            warn!(query, error = %err, "web search failed, continuing without search context");
            vec![format!(
                "Web search was unavailable for \"{query}\" ({err}). Rely on established knowledge of the subject."
            )]
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

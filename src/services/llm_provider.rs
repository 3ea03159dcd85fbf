use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_API_ENDPOINT: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT_MS: u64 = 60_000;
const PROMPT_HISTORY_LIMIT: usize = 64;
const DEFAULT_SYSTEM_PROMPT: &str =
    "You are an expert curriculum designer and tutor. Follow the requested output format exactly.";

#[derive(Debug, Clone)]
pub struct LLMConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub api_endpoint: String,
    pub timeout: Duration,
    pub mock: bool,
}

impl LLMConfig {
    pub fn from_env() -> Self {
        let api_key = env_string("LLM_API_KEY");
        let model = env_string("LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let api_endpoint = normalize_endpoint(
            env_string("LLM_API_ENDPOINT")
                .or_else(|| env_string("LLM_BASE_URL"))
                .unwrap_or_else(|| DEFAULT_API_ENDPOINT.to_string()),
        );
        let timeout = Duration::from_millis(env_u64("LLM_TIMEOUT").unwrap_or(DEFAULT_TIMEOUT_MS));
        let mock = env_string("LLM_MOCK").is_some_and(|v| v == "true" || v == "1");

        Self { api_key, model, api_endpoint, timeout, mock }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub model: Option<String>,
    pub choices: Vec<ChatChoice>,
    pub usage: Option<ChatUsage>,
}

impl ChatResponse {
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatUsage {
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
}

#[derive(Debug, Error)]
pub enum LLMError {
    #[error("LLM not configured: {0}")]
    NotConfigured(&'static str),
    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: reqwest::StatusCode, body: String },
    #[error("JSON decode failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("empty response")]
    EmptyChoices,
}

impl LLMError {
    pub fn is_quota_exhausted(&self) -> bool {
        matches!(self, LLMError::QuotaExhausted(_))
    }
}

/// Text-in, text-out access to a generative model.
#[async_trait]
pub trait GenerativeProvider: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, LLMError>;
}

/// OpenAI-compatible chat completions client.
#[derive(Clone)]
pub struct LLMProvider {
    config: LLMConfig,
    client: reqwest::Client,
}

impl LLMProvider {
    pub fn new(config: LLMConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, client }
    }

    pub fn from_env() -> Self {
        Self::new(LLMConfig::from_env())
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn is_available(&self) -> bool {
        self.config.api_key.as_deref().is_some_and(|v| !v.trim().is_empty())
            && !self.config.model.trim().is_empty()
            && !self.config.api_endpoint.trim().is_empty()
    }

    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse, LLMError> {
        let api_key = self.config.api_key.as_deref()
            .filter(|v| !v.trim().is_empty())
            .ok_or(LLMError::NotConfigured("LLM_API_KEY"))?;

        let url = format!("{}/chat/completions", self.config.api_endpoint.trim_end_matches('/'));
        let payload = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "stream": false
        });

        let resp = self.client.post(&url).bearer_auth(api_key).json(&payload).send().await?;
        let status = resp.status();
        if status.is_success() {
            let bytes = resp.bytes().await?;
            return serde_json::from_slice(&bytes).map_err(|e| {
                tracing::error!(error = %e, body = %String::from_utf8_lossy(&bytes), "Failed to parse LLM response JSON");
                LLMError::Json(e)
            });
        }

        let body = resp.text().await.unwrap_or_default();
        if is_quota_exhausted(status, &body) {
            return Err(LLMError::QuotaExhausted(format!("HTTP {status}")));
        }
        Err(LLMError::HttpStatus { status, body })
    }

    pub async fn complete_with_system(&self, system: &str, user: &str) -> Result<String, LLMError> {
        let messages = [
            ChatMessage { role: "system".into(), content: system.into() },
            ChatMessage { role: "user".into(), content: user.into() },
        ];
        let response = self.chat(&messages).await?;
        response.first_content().map(|s| s.to_string()).ok_or(LLMError::EmptyChoices)
    }
}

#[async_trait]
impl GenerativeProvider for LLMProvider {
    async fn generate(&self, prompt: &str) -> Result<String, LLMError> {
        self.complete_with_system(DEFAULT_SYSTEM_PROMPT, prompt).await
    }
}

/// Replays queued responses in order and records every prompt it receives.
///
/// Once the queue is drained it answers with an empty string, which drives
/// callers onto their placeholder path. Backs `LLM_MOCK` mode and tests.
/// Only the most recent prompts are kept.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<String, LLMError>>>,
    prompts: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let provider = Self::new();
        for response in responses {
            provider.push_ok(response);
        }
        provider
    }

    pub fn push_ok(&self, response: impl Into<String>) {
        self.responses.lock().push_back(Ok(response.into()));
    }

    pub fn push_err(&self, error: LLMError) {
        self.responses.lock().push_back(Err(error));
    }

    /// Recent prompts, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().iter().cloned().collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl GenerativeProvider for ScriptedProvider {
    async fn generate(&self, prompt: &str) -> Result<String, LLMError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        {
            let mut prompts = self.prompts.lock();
            if prompts.len() == PROMPT_HISTORY_LIMIT {
                prompts.pop_front();
            }
            prompts.push_back(prompt.to_string());
        }
        self.responses.lock().pop_front().unwrap_or_else(|| Ok(String::new()))
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_u64(key: &str) -> Option<u64> {
    env_string(key)?.parse().ok()
}

fn normalize_endpoint(endpoint: String) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    if trimmed.ends_with("/v1") || trimmed.contains("/v1/") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/v1")
    }
}

fn is_quota_exhausted(status: reqwest::StatusCode, body: &str) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || body.contains("RESOURCE_EXHAUSTED")
        || body.contains("insufficient_quota")
}

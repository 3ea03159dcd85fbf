#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use serde_json::Value;

use learnpath_backend_rust::config::Config;
use learnpath_backend_rust::db::config::DbConfig;
use learnpath_backend_rust::db::{DocumentStore, MemoryStore};
use learnpath_backend_rust::services::assessment::AssessmentPolicy;
use learnpath_backend_rust::services::llm_provider::{LLMConfig, ScriptedProvider};
use learnpath_backend_rust::services::retry::RetryConfig;
use learnpath_backend_rust::services::search_provider::{SearchConfig, SearchError, SearchProvider};
use learnpath_backend_rust::services::sessions::SessionConfig;
use learnpath_backend_rust::state::AppState;

pub struct FixedSearch(pub Vec<String>);

#[async_trait]
impl SearchProvider for FixedSearch {
    async fn search(&self, _query: &str, _domains: &[String], _max: usize) -> Result<Vec<String>, SearchError> {
        Ok(self.0.clone())
    }
}

pub fn test_config() -> Config {
    Config {
        host: [127, 0, 0, 1].into(),
        port: 0,
        log_level: "warn".to_string(),
        llm: LLMConfig {
            api_key: None,
            model: "test".to_string(),
            api_endpoint: "http://localhost/v1".to_string(),
            timeout: Duration::from_secs(1),
            mock: true,
        },
        retry: RetryConfig::immediate(5),
        search: SearchConfig {
            api_key: None,
            endpoint: "http://localhost/search".to_string(),
            max_results: 3,
            domain_filters: Vec::new(),
            timeout: Duration::from_secs(1),
        },
        assessment: AssessmentPolicy::default(),
        db: DbConfig::in_memory(),
        sessions: SessionConfig::default(),
    }
}

pub struct TestApp {
    pub state: AppState,
    pub llm: Arc<ScriptedProvider>,
    pub store: Arc<dyn DocumentStore>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    pub fn with_store(store: Arc<dyn DocumentStore>) -> Self {
        let llm = Arc::new(ScriptedProvider::new());
        let search = Arc::new(FixedSearch(vec!["Rust is a systems language.".to_string()]));
        let state = AppState::new(&test_config(), Arc::clone(&store), llm.clone(), search);
        Self { state, llm, store }
    }

    pub fn router(&self) -> Router {
        learnpath_backend_rust::create_app(self.state.clone())
    }
}

pub fn syllabus_json(topic: &str, lessons_per_module: &[&[&str]]) -> String {
    let modules: Vec<Value> = lessons_per_module
        .iter()
        .enumerate()
        .map(|(i, lessons)| {
            serde_json::json!({
                "week": i + 1,
                "title": format!("Module {}", i + 1),
                "lessons": lessons.iter().map(|t| serde_json::json!({ "title": t })).collect::<Vec<_>>(),
            })
        })
        .collect();
    serde_json::json!({
        "topic": topic,
        "level": "beginner",
        "duration": "2 weeks",
        "learning_objectives": ["Understand the basics"],
        "modules": modules,
    })
    .to_string()
}

pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

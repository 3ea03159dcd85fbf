pub mod cache;
pub mod config;
pub mod db;
pub mod logging;
pub mod response;
pub mod routes;
pub mod services;
pub mod state;
pub mod types;
pub mod workers;

use std::sync::Arc;

use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::Config;
use crate::services::llm_provider::{GenerativeProvider, LLMProvider, ScriptedProvider};
use crate::services::search_provider::{HttpSearchProvider, SearchProvider};
use crate::state::AppState;

pub fn create_app(state: AppState) -> axum::Router {
    routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Wires the document store and the configured providers into an [`AppState`].
pub async fn build_state(config: &Config) -> Result<AppState, db::StoreError> {
    let store = db::connect(&config.db).await?;

    let llm: Arc<dyn GenerativeProvider> = if config.llm.mock {
        tracing::warn!("LLM_MOCK enabled, generated content will be placeholders");
        Arc::new(ScriptedProvider::new())
    } else {
        let provider = LLMProvider::new(config.llm.clone());
        if !provider.is_available() {
            tracing::warn!("LLM_API_KEY not set, generation requests will fail");
        }
        tracing::info!(model = provider.model(), "generative provider configured");
        Arc::new(provider)
    };
    let search: Arc<dyn SearchProvider> = Arc::new(HttpSearchProvider::new(config.search.clone()));

    Ok(AppState::new(config, store, llm, search))
}

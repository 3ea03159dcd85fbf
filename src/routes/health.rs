use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::Collection;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(root)).route("/live", get(live))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    database: &'static str,
    timestamp: String,
    started_at: String,
    uptime: u64,
    active_assessments: usize,
    active_syllabus_sessions: usize,
}

async fn root(State(state): State<AppState>) -> Response {
    let db_ok = match state.store().count(Collection::Syllabi).await {
        Ok(_) => true,
        Err(err) => {
            tracing::warn!(error = %err, "health check: document store unavailable");
            false
        }
    };

    let response = HealthResponse {
        status: if db_ok { "ok" } else { "degraded" },
        database: if db_ok { "connected" } else { "disconnected" },
        timestamp: Utc::now().to_rfc3339(),
        started_at: DateTime::<Utc>::from(state.started_at_system()).to_rfc3339(),
        uptime: state.uptime_seconds(),
        active_assessments: state.assessment_sessions().len(),
        active_syllabus_sessions: state.syllabus_sessions().len(),
    };
    let status = if db_ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(response)).into_response()
}

async fn live(State(state): State<AppState>) -> Response {
    Json(serde_json::json!({ "status": "healthy", "uptime": state.uptime_seconds() })).into_response()
}

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::response::{ok, AppError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PurgeQuery {
    topic: String,
    level: String,
}

#[derive(Debug, Serialize)]
struct PurgeResponse {
    removed: u64,
}

/// Administrative purge of the master and every user copy for a pair.
pub async fn purge_syllabi(State(state): State<AppState>, Query(query): Query<PurgeQuery>) -> Result<Response, AppError> {
    if query.topic.trim().is_empty() {
        return Err(AppError::validation("topic must not be empty"));
    }
    let removed = state
        .syllabus()
        .versions()
        .delete(query.topic.trim(), &query.level)
        .await?;
    Ok(ok(PurgeResponse { removed }).into_response())
}

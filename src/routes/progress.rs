use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::response::{ok, AppError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPayload {
    user_id: String,
    topic: String,
    lesson_title: String,
    score: f64,
}

#[derive(Debug, Deserialize)]
pub struct ProgressQuery {
    topic: Option<String>,
}

pub async fn record(State(state): State<AppState>, Json(payload): Json<RecordPayload>) -> Result<Response, AppError> {
    let entry = state
        .progress()
        .record_progress(&payload.user_id, &payload.topic, &payload.lesson_title, payload.score)
        .await?;
    Ok(ok(entry).into_response())
}

pub async fn show(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<ProgressQuery>,
) -> Result<Response, AppError> {
    let progress = state
        .progress()
        .get_progress(&user_id, query.topic.as_deref())
        .await?;
    Ok(ok(progress).into_response())
}

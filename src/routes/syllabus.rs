use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::parse_session_id;
use crate::response::{ok, AppError};
use crate::services::syllabus::SaveStatus;
use crate::state::AppState;
use crate::types::Syllabus;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyllabusQuery {
    topic: String,
    level: String,
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackPayload {
    feedback: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClonePayload {
    user_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    session_id: Uuid,
    iteration: u32,
    syllabus: Syllabus,
}

#[derive(Debug, Serialize)]
struct SaveResponse {
    status: SaveStatus,
    syllabus: Syllabus,
}

/// Looks up a stored syllabus without generating one.
pub async fn find(State(state): State<AppState>, Query(query): Query<SyllabusQuery>) -> Result<Response, AppError> {
    let found = state
        .syllabus()
        .versions()
        .find(query.topic.trim(), &query.level, query.user_id.as_deref())
        .await?
        .ok_or_else(|| AppError::not_found("syllabus not found"))?;
    Ok(ok(found).into_response())
}

pub async fn by_uid(State(state): State<AppState>, Path(uid): Path<String>) -> Result<Response, AppError> {
    let found = state
        .syllabus()
        .versions()
        .find_by_uid(&uid)
        .await?
        .ok_or_else(|| AppError::not_found("syllabus not found"))?;
    Ok(ok(found).into_response())
}

/// Get-or-create, opening a feedback session on the result.
pub async fn start(State(state): State<AppState>, Json(payload): Json<SyllabusQuery>) -> Result<Response, AppError> {
    let cancel = state.request_token();
    let session = state
        .syllabus()
        .start_session(&payload.topic, &payload.level, payload.user_id.as_deref(), &cancel)
        .await?;
    let syllabus = session.syllabus.clone();
    let iteration = session.iteration;
    let session_id = state.syllabus_sessions().insert(session);
    Ok((StatusCode::CREATED, ok(SessionResponse { session_id, iteration, syllabus })).into_response())
}

pub async fn feedback(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<FeedbackPayload>,
) -> Result<Response, AppError> {
    let id = parse_session_id(&id)?;
    let session = state
        .syllabus_sessions()
        .get(&id)
        .ok_or_else(|| AppError::not_found("syllabus session not found"))?;
    let mut session = session.lock().await;
    let cancel = state.request_token();
    let syllabus = state
        .syllabus()
        .update_syllabus(&mut session, &payload.feedback, &cancel)
        .await?;
    Ok(ok(SessionResponse { session_id: id, iteration: session.iteration, syllabus }).into_response())
}

pub async fn save(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, AppError> {
    let id = parse_session_id(&id)?;
    let session = state
        .syllabus_sessions()
        .get(&id)
        .ok_or_else(|| AppError::not_found("syllabus session not found"))?;
    let mut session = session.lock().await;
    let status = state.syllabus().save_syllabus(&mut session).await?;
    Ok(ok(SaveResponse { status, syllabus: session.syllabus.clone() }).into_response())
}

pub async fn clone_for_user(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Json(payload): Json<ClonePayload>,
) -> Result<Response, AppError> {
    let source = state
        .syllabus()
        .versions()
        .find_by_uid(&uid)
        .await?
        .ok_or_else(|| AppError::not_found("syllabus not found"))?;
    let cloned = state
        .syllabus()
        .clone_syllabus_for_user(&source, payload.user_id.trim())
        .await?;
    Ok((StatusCode::CREATED, ok(cloned)).into_response())
}

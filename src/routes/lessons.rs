use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::response::{ok, AppError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonPayload {
    syllabus_uid: String,
    module_title: String,
    lesson_title: String,
    user_id: Option<String>,
}

pub async fn get_or_generate(
    State(state): State<AppState>,
    Json(payload): Json<LessonPayload>,
) -> Result<Response, AppError> {
    let syllabus = state
        .syllabus()
        .versions()
        .find_by_uid(&payload.syllabus_uid)
        .await?
        .ok_or_else(|| AppError::not_found("syllabus not found"))?;

    let cancel = state.request_token();
    let content = state
        .lessons()
        .get_or_generate_lesson(
            &syllabus,
            &payload.module_title,
            &payload.lesson_title,
            payload.user_id.as_deref(),
            &cancel,
        )
        .await?;
    Ok(ok(content).into_response())
}

mod admin;
mod assessment;
mod health;
mod lessons;
mod progress;
mod syllabus;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::Router;

use crate::response::json_error;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .route("/api/assessments", post(assessment::start).fallback(fallback_handler))
        .route("/api/assessments/:id", get(assessment::show).fallback(fallback_handler))
        .route(
            "/api/assessments/:id/answers",
            post(assessment::answer).fallback(fallback_handler),
        )
        .route(
            "/api/assessments/:id/resume",
            post(assessment::resume).fallback(fallback_handler),
        )
        .route(
            "/api/syllabi",
            get(syllabus::find).post(syllabus::start).fallback(fallback_handler),
        )
        .route("/api/syllabi/:uid", get(syllabus::by_uid).fallback(fallback_handler))
        .route("/api/syllabi/:uid/clone", post(syllabus::clone_for_user).fallback(fallback_handler))
        .route(
            "/api/syllabus-sessions/:id/feedback",
            post(syllabus::feedback).fallback(fallback_handler),
        )
        .route(
            "/api/syllabus-sessions/:id/save",
            post(syllabus::save).fallback(fallback_handler),
        )
        .route("/api/lessons", post(lessons::get_or_generate).fallback(fallback_handler))
        .route("/api/progress", post(progress::record).fallback(fallback_handler))
        .route("/api/progress/:user_id", get(progress::show).fallback(fallback_handler))
        .route("/api/admin/syllabi", delete(admin::purge_syllabi).fallback(fallback_handler))
        .fallback(fallback_handler)
        .with_state(state)
}

async fn fallback_handler() -> Response {
    json_error(StatusCode::NOT_FOUND, "NOT_FOUND", "Endpoint not found").into_response()
}

fn parse_session_id(raw: &str) -> Result<uuid::Uuid, crate::response::AppError> {
    uuid::Uuid::parse_str(raw).map_err(|_| crate::response::AppError::bad_request("invalid session id"))
}

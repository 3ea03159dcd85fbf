use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::parse_session_id;
use crate::response::{ok, AppError};
use crate::services::assessment::{AssessmentSession, AssessmentState, Outcome, QuestionTurn};
use crate::state::AppState;
use crate::types::{Difficulty, KnowledgeLevel};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPayload {
    topic: String,
    knowledge_level: Option<String>,
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AnswerPayload {
    answer: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartedResponse {
    session_id: Uuid,
    #[serde(flatten)]
    turn: QuestionTurn,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionView {
    session_id: Uuid,
    topic: String,
    knowledge_level: KnowledgeLevel,
    state: AssessmentState,
    questions_asked: usize,
    current_question: Option<String>,
    current_difficulty: Difficulty,
    consecutive_wrong: u32,
    consecutive_hard_streak: u32,
    outcome: Option<Outcome>,
    score: Option<f64>,
    assessed_level: Option<KnowledgeLevel>,
}

impl SessionView {
    fn new(session_id: Uuid, session: &AssessmentSession) -> Self {
        let done = session.is_complete();
        Self {
            session_id,
            topic: session.topic.clone(),
            knowledge_level: session.knowledge_level,
            state: session.state(),
            questions_asked: session.questions.len(),
            current_question: session.current_question().map(|(q, _)| q.to_string()),
            current_difficulty: session.current_target_difficulty,
            consecutive_wrong: session.consecutive_wrong,
            consecutive_hard_streak: session.consecutive_hard_streak,
            outcome: session.outcome(),
            score: done.then(|| session.weighted_percentage()),
            assessed_level: done.then(|| session.assessed_level()),
        }
    }
}

pub async fn start(
    State(state): State<AppState>,
    Json(payload): Json<StartPayload>,
) -> Result<Response, AppError> {
    let cancel = state.request_token();
    let (session, turn) = state
        .assessment()
        .start_assessment(
            &payload.topic,
            payload.knowledge_level.as_deref(),
            payload.user_id.as_deref(),
            &cancel,
        )
        .await?;
    let session_id = state.assessment_sessions().insert(session);
    Ok((StatusCode::CREATED, ok(StartedResponse { session_id, turn })).into_response())
}

pub async fn show(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, AppError> {
    let id = parse_session_id(&id)?;
    let session = state
        .assessment_sessions()
        .get(&id)
        .ok_or_else(|| AppError::not_found("assessment session not found"))?;
    let session = session.lock().await;
    Ok(ok(SessionView::new(id, &session)).into_response())
}

pub async fn answer(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<AnswerPayload>,
) -> Result<Response, AppError> {
    let id = parse_session_id(&id)?;
    let session = state
        .assessment_sessions()
        .get(&id)
        .ok_or_else(|| AppError::not_found("assessment session not found"))?;
    let mut session = session.lock().await;
    let cancel = state.request_token();
    let outcome = state
        .assessment()
        .submit_answer(&mut session, &payload.answer, &cancel)
        .await?;
    Ok(ok(outcome).into_response())
}

pub async fn resume(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, AppError> {
    let id = parse_session_id(&id)?;
    let session = state
        .assessment_sessions()
        .get(&id)
        .ok_or_else(|| AppError::not_found("assessment session not found"))?;
    let mut session = session.lock().await;
    let cancel = state.request_token();
    let turn = state.assessment().resume(&mut session, &cancel).await?;
    Ok(ok(StartedResponse { session_id: id, turn }).into_response())
}

//! Adaptive knowledge assessment.
//!
//! The loop is an explicit state machine: `INIT -> GENERATING_QUESTION ->
//! AWAITING_ANSWER -> EVALUATING -> (GENERATING_QUESTION | TERMINATED)`.
//! Difficulty ramps up one level on any credited answer and holds on a wrong
//! one; two wrong answers in a row end the session, as do (optionally) three
//! credited answers in a row at the hardest level.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::generation::StructuredGenerator;
use super::prompts::{self, EVALUATION_KEYS, QUESTION_KEYS};
use super::ServiceError;
use crate::types::{Difficulty, KnowledgeLevel};

const MAX_QUESTION_ATTEMPTS: usize = 3;
const PLACEHOLDER_EVALUATION: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct AssessmentPolicy {
    /// Enables the mastery-demonstrated stop rule.
    pub track_hard_streak: bool,
    pub wrong_limit: u32,
    pub hard_streak_limit: u32,
    pub max_questions: Option<usize>,
}

impl Default for AssessmentPolicy {
    fn default() -> Self {
        Self {
            track_hard_streak: true,
            wrong_limit: 2,
            hard_streak_limit: 3,
            max_questions: Some(15),
        }
    }
}

impl AssessmentPolicy {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let max_questions = match std::env::var("ASSESSMENT_MAX_QUESTIONS").ok().and_then(|v| v.parse::<usize>().ok()) {
            Some(0) => None,
            Some(n) => Some(n),
            None => defaults.max_questions,
        };
        Self {
            track_hard_streak: std::env::var("ASSESSMENT_HARD_STREAK_ENABLED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(defaults.track_hard_streak),
            wrong_limit: env_u32("ASSESSMENT_WRONG_LIMIT").unwrap_or(defaults.wrong_limit).max(1),
            hard_streak_limit: env_u32("ASSESSMENT_HARD_STREAK_LIMIT")
                .unwrap_or(defaults.hard_streak_limit)
                .max(1),
            max_questions,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssessmentState {
    Init,
    GeneratingQuestion,
    AwaitingAnswer,
    Evaluating,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssessmentEvent {
    Start,
    QuestionReady,
    AnswerSubmitted,
    Continue,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    GenerateQuestion,
    PresentQuestion,
    EvaluateAnswer,
    Score,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Invalid transition from {from:?} on {event:?}")]
    InvalidTransition {
        from: AssessmentState,
        event: AssessmentEvent,
    },
}

impl AssessmentState {
    pub fn next(self, event: AssessmentEvent) -> Result<(AssessmentState, Action), TransitionError> {
        use AssessmentEvent as E;
        use AssessmentState as S;
        match (self, event) {
            (S::Init, E::Start) => Ok((S::GeneratingQuestion, Action::GenerateQuestion)),
            (S::GeneratingQuestion, E::QuestionReady) => Ok((S::AwaitingAnswer, Action::PresentQuestion)),
            (S::AwaitingAnswer, E::AnswerSubmitted) => Ok((S::Evaluating, Action::EvaluateAnswer)),
            (S::Evaluating, E::Continue) => Ok((S::GeneratingQuestion, Action::GenerateQuestion)),
            (S::Evaluating, E::Stop) => Ok((S::Terminated, Action::Score)),
            (from, event) => Err(TransitionError::InvalidTransition { from, event }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    InsufficientMastery,
    MasteryDemonstrated,
    QuestionLimit,
}

impl Outcome {
    pub fn describe(&self) -> &'static str {
        match self {
            Outcome::InsufficientMastery => "two consecutive answers were incorrect",
            Outcome::MasteryDemonstrated => "consistently correct answers at the hardest level",
            Outcome::QuestionLimit => "the question limit was reached",
        }
    }
}

/// `d` on a wrong answer, otherwise one level harder (capped at HARD).
pub fn next_difficulty(current: Difficulty, evaluation: f64) -> Difficulty {
    if evaluation > 0.0 {
        current.harder()
    } else {
        current
    }
}

/// Snaps a model grade onto {0, 0.5, 1}.
pub fn snap_evaluation(raw: f64) -> f64 {
    if !raw.is_finite() || raw < 0.25 {
        0.0
    } else if raw < 0.75 {
        0.5
    } else {
        1.0
    }
}

fn parse_evaluation(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().map(snap_evaluation),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => {
            let s = s.trim().to_lowercase();
            if let Ok(n) = s.parse::<f64>() {
                return Some(snap_evaluation(n));
            }
            if s.starts_with("partial") || s.contains("partially") {
                Some(0.5)
            } else if s.starts_with("incorrect") || s.starts_with("wrong") {
                Some(0.0)
            } else if s.starts_with("correct") {
                Some(1.0)
            } else {
                None
            }
        }
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentSession {
    pub topic: String,
    pub user_id: Option<String>,
    pub knowledge_level: KnowledgeLevel,
    pub questions: Vec<String>,
    pub difficulties: Vec<Difficulty>,
    pub answers: Vec<String>,
    pub evaluations: Vec<f64>,
    pub feedback: Vec<String>,
    pub current_target_difficulty: Difficulty,
    pub consecutive_wrong: u32,
    pub consecutive_hard_streak: u32,
    state: AssessmentState,
    outcome: Option<Outcome>,
    pub started_at: DateTime<Utc>,
}

impl AssessmentSession {
    pub fn new(
        topic: &str,
        knowledge_level: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Self, ServiceError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(ServiceError::validation("topic must not be empty"));
        }
        Ok(Self {
            topic: topic.to_string(),
            user_id: user_id.map(str::to_string),
            knowledge_level: KnowledgeLevel::coerce(knowledge_level),
            questions: Vec::new(),
            difficulties: Vec::new(),
            answers: Vec::new(),
            evaluations: Vec::new(),
            feedback: Vec::new(),
            current_target_difficulty: Difficulty::Easy,
            consecutive_wrong: 0,
            consecutive_hard_streak: 0,
            state: AssessmentState::Init,
            outcome: None,
            started_at: Utc::now(),
        })
    }

    pub fn state(&self) -> AssessmentState {
        self.state
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    pub fn is_complete(&self) -> bool {
        self.state == AssessmentState::Terminated
    }

    pub fn current_question(&self) -> Option<(&str, Difficulty)> {
        if self.state != AssessmentState::AwaitingAnswer {
            return None;
        }
        let question = self.questions.last()?;
        let difficulty = *self.difficulties.last()?;
        Some((question.as_str(), difficulty))
    }

    fn transition(&mut self, event: AssessmentEvent) -> Result<Action, ServiceError> {
        let (next, action) = self
            .state
            .next(event)
            .map_err(|e| ServiceError::validation(e.to_string()))?;
        debug!(from = ?self.state, to = ?next, ?event, "assessment transition");
        self.state = next;
        Ok(action)
    }

    /// Applies the counter and difficulty rules for one graded answer and
    /// returns the stop outcome when a termination predicate fires.
    pub fn apply_evaluation(&mut self, evaluation: f64, policy: &AssessmentPolicy) -> Option<Outcome> {
        if evaluation > 0.0 {
            self.consecutive_wrong = 0;
            if policy.track_hard_streak && self.current_target_difficulty == Difficulty::Hard {
                self.consecutive_hard_streak += 1;
            } else {
                self.consecutive_hard_streak = 0;
            }
        } else {
            self.consecutive_wrong += 1;
            self.consecutive_hard_streak = 0;
        }
        self.current_target_difficulty = next_difficulty(self.current_target_difficulty, evaluation);

        if self.consecutive_wrong >= policy.wrong_limit {
            Some(Outcome::InsufficientMastery)
        } else if policy.track_hard_streak && self.consecutive_hard_streak >= policy.hard_streak_limit {
            Some(Outcome::MasteryDemonstrated)
        } else if policy.max_questions.is_some_and(|max| self.evaluations.len() >= max) {
            Some(Outcome::QuestionLimit)
        } else {
            None
        }
    }

    /// `100 * Σ(e_i * d_i) / Σ(d_i)` over graded questions.
    pub fn weighted_percentage(&self) -> f64 {
        let (earned, possible) = self
            .evaluations
            .iter()
            .zip(&self.difficulties)
            .fold((0.0, 0.0), |(earned, possible), (e, d)| {
                (earned + e * d.weight(), possible + d.weight())
            });
        if possible == 0.0 {
            0.0
        } else {
            100.0 * earned / possible
        }
    }

    pub fn assessed_level(&self) -> KnowledgeLevel {
        KnowledgeLevel::from_percentage(self.weighted_percentage())
    }

    fn is_duplicate(&self, candidate: &str) -> bool {
        let normalized = normalize_question(candidate);
        self.questions.iter().any(|q| normalize_question(q) == normalized)
    }
}

fn normalize_question(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionTurn {
    pub question: String,
    pub difficulty: Difficulty,
    pub question_number: usize,
    pub is_placeholder: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    pub is_complete: bool,
    pub evaluation: f64,
    pub feedback: Option<String>,
    pub question: Option<String>,
    pub difficulty: Option<Difficulty>,
    pub knowledge_level: Option<KnowledgeLevel>,
    pub score: Option<f64>,
    pub outcome: Option<Outcome>,
    pub summary: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuestionReply {
    question: String,
}

#[derive(Debug, Deserialize)]
struct EvaluationReply {
    evaluation: Value,
    #[serde(default)]
    feedback: String,
}

#[derive(Clone)]
pub struct AssessmentService {
    generator: StructuredGenerator,
    policy: AssessmentPolicy,
}

impl AssessmentService {
    pub fn new(generator: StructuredGenerator, policy: AssessmentPolicy) -> Self {
        Self { generator, policy }
    }

    pub fn policy(&self) -> &AssessmentPolicy {
        &self.policy
    }

    pub async fn start_assessment(
        &self,
        topic: &str,
        knowledge_level: Option<&str>,
        user_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(AssessmentSession, QuestionTurn), ServiceError> {
        let mut session = AssessmentSession::new(topic, knowledge_level, user_id)?;
        session.transition(AssessmentEvent::Start)?;
        info!(topic = %session.topic, level = %session.knowledge_level, "assessment started");
        let turn = self.present_next_question(&mut session, cancel).await?;
        Ok((session, turn))
    }

    /// Re-runs question generation for a session whose previous attempt
    /// failed before a question could be presented.
    pub async fn resume(
        &self,
        session: &mut AssessmentSession,
        cancel: &CancellationToken,
    ) -> Result<QuestionTurn, ServiceError> {
        if let Some((question, difficulty)) = session.current_question() {
            return Ok(QuestionTurn {
                question: question.to_string(),
                difficulty,
                question_number: session.questions.len(),
                is_placeholder: false,
            });
        }
        if session.state() != AssessmentState::GeneratingQuestion {
            return Err(ServiceError::validation("assessment has no pending question"));
        }
        self.present_next_question(session, cancel).await
    }

    pub async fn submit_answer(
        &self,
        session: &mut AssessmentSession,
        answer: &str,
        cancel: &CancellationToken,
    ) -> Result<SubmitOutcome, ServiceError> {
        let Some((question, _)) = session.current_question() else {
            return Err(match session.state() {
                AssessmentState::Terminated => ServiceError::validation("assessment is already complete"),
                _ => ServiceError::validation("assessment has no question awaiting an answer"),
            });
        };
        let question = question.to_string();

        // Grade before mutating so a failed call leaves the session answerable.
        let (evaluation, feedback) = self.evaluate(session, &question, answer, cancel).await?;

        session.transition(AssessmentEvent::AnswerSubmitted)?;
        session.answers.push(answer.to_string());
        session.evaluations.push(evaluation);
        session.feedback.push(feedback.clone());

        match session.apply_evaluation(evaluation, &self.policy) {
            Some(outcome) => {
                session.transition(AssessmentEvent::Stop)?;
                session.outcome = Some(outcome);
                let score = session.weighted_percentage();
                let level = session.assessed_level();
                info!(
                    topic = %session.topic,
                    ?outcome,
                    score,
                    level = %level,
                    questions = session.questions.len(),
                    "assessment terminated"
                );
                Ok(SubmitOutcome {
                    is_complete: true,
                    evaluation,
                    feedback: Some(feedback),
                    question: None,
                    difficulty: None,
                    knowledge_level: Some(level),
                    score: Some(score),
                    outcome: Some(outcome),
                    summary: Some(format!(
                        "Assessment complete because {}. Weighted score {:.1}%, assessed level: {}.",
                        outcome.describe(),
                        score,
                        level
                    )),
                })
            }
            None => {
                session.transition(AssessmentEvent::Continue)?;
                let turn = self.present_next_question(session, cancel).await?;
                Ok(SubmitOutcome {
                    is_complete: false,
                    evaluation,
                    feedback: Some(feedback),
                    question: Some(turn.question),
                    difficulty: Some(turn.difficulty),
                    knowledge_level: None,
                    score: None,
                    outcome: None,
                    summary: None,
                })
            }
        }
    }

    async fn present_next_question(
        &self,
        session: &mut AssessmentSession,
        cancel: &CancellationToken,
    ) -> Result<QuestionTurn, ServiceError> {
        let difficulty = session.current_target_difficulty;
        let number = session.questions.len() + 1;
        let prompt = prompts::question_prompt(
            &session.topic,
            session.knowledge_level,
            difficulty,
            &session.questions,
        );

        let mut chosen = None;
        for attempt in 1..=MAX_QUESTION_ATTEMPTS {
            let reply = self
                .generator
                .generate(
                    "assessment_question",
                    &prompt,
                    QUESTION_KEYS,
                    || QuestionReply { question: placeholder_question(&session.topic, difficulty, number) },
                    cancel,
                )
                .await?;
            let question = reply.value.question.trim().to_string();
            if !question.is_empty() && !session.is_duplicate(&question) {
                chosen = Some((question, reply.is_placeholder));
                break;
            }
            debug!(attempt, "generated question repeats an earlier one, regenerating");
        }
        let (question, is_placeholder) =
            chosen.unwrap_or_else(|| (placeholder_question(&session.topic, difficulty, number), true));

        session.questions.push(question.clone());
        session.difficulties.push(difficulty);
        session.transition(AssessmentEvent::QuestionReady)?;

        Ok(QuestionTurn { question, difficulty, question_number: number, is_placeholder })
    }

    async fn evaluate(
        &self,
        session: &AssessmentSession,
        question: &str,
        answer: &str,
        cancel: &CancellationToken,
    ) -> Result<(f64, String), ServiceError> {
        if answer.trim().is_empty() {
            return Ok((0.0, "No answer was given.".to_string()));
        }
        let prompt = prompts::evaluation_prompt(&session.topic, question, answer);
        let reply = self
            .generator
            .generate(
                "assessment_evaluation",
                &prompt,
                EVALUATION_KEYS,
                || EvaluationReply { evaluation: Value::Null, feedback: String::new() },
                cancel,
            )
            .await?;

        match parse_evaluation(&reply.value.evaluation) {
            Some(score) if !reply.is_placeholder => Ok((score, reply.value.feedback)),
            _ => Ok((
                PLACEHOLDER_EVALUATION,
                "The answer could not be graded automatically; partial credit was given.".to_string(),
            )),
        }
    }
}

fn placeholder_question(topic: &str, difficulty: Difficulty, number: usize) -> String {
    format!(
        "Question {number}: Explain a {} concept in {topic} in your own words and give an example of where it applies.",
        difficulty.as_str()
    )
}

fn env_u32(key: &str) -> Option<u32> {
    std::env::var(key).ok()?.trim().parse().ok()
}

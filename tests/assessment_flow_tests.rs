use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use learnpath_backend_rust::services::assessment::{
    AssessmentPolicy, AssessmentService, AssessmentState, Outcome,
};
use learnpath_backend_rust::services::generation::StructuredGenerator;
use learnpath_backend_rust::services::llm_provider::{LLMError, ScriptedProvider};
use learnpath_backend_rust::services::retry::{RetryConfig, RetryingInvoker};
use learnpath_backend_rust::services::ServiceError;
use learnpath_backend_rust::types::{Difficulty, KnowledgeLevel};

fn service(provider: &Arc<ScriptedProvider>, policy: AssessmentPolicy) -> AssessmentService {
    let generator = StructuredGenerator::new(
        provider.clone(),
        RetryingInvoker::new(RetryConfig::immediate(5)),
    );
    AssessmentService::new(generator, policy)
}

fn question(text: &str) -> String {
    format!("```json\n{{\"question\": \"{text}\"}}\n```")
}

fn grade(score: f64) -> String {
    format!("Here is my grading: {{\"evaluation\": {score}, \"feedback\": \"noted\"}}")
}

#[tokio::test]
async fn two_wrong_answers_end_with_insufficient_mastery() {
    let llm = Arc::new(ScriptedProvider::new());
    let assessment = service(&llm, AssessmentPolicy::default());
    let cancel = CancellationToken::new();

    llm.push_ok(question("What is ownership?"));
    let (mut session, turn) = assessment
        .start_assessment("Rust", Some("unknown level"), None, &cancel)
        .await
        .unwrap();
    assert_eq!(session.knowledge_level, KnowledgeLevel::Beginner);
    assert_eq!(turn.difficulty, Difficulty::Easy);
    assert_eq!(turn.question_number, 1);

    llm.push_ok(grade(1.0));
    llm.push_ok(question("What does the borrow checker enforce?"));
    let step = assessment.submit_answer(&mut session, "Each value has one owner", &cancel).await.unwrap();
    assert!(!step.is_complete);
    assert_eq!(step.difficulty, Some(Difficulty::Medium));

    llm.push_ok(grade(1.0));
    llm.push_ok(question("Explain variance in lifetimes."));
    let step = assessment.submit_answer(&mut session, "Aliasing XOR mutability", &cancel).await.unwrap();
    assert_eq!(step.difficulty, Some(Difficulty::Hard));

    llm.push_ok(grade(0.0));
    llm.push_ok(question("How does Pin interact with self-referential futures?"));
    let step = assessment.submit_answer(&mut session, "no idea", &cancel).await.unwrap();
    assert!(!step.is_complete);
    assert_eq!(step.difficulty, Some(Difficulty::Hard));

    llm.push_ok(grade(0.0));
    let done = assessment.submit_answer(&mut session, "still no idea", &cancel).await.unwrap();
    assert!(done.is_complete);
    assert_eq!(done.outcome, Some(Outcome::InsufficientMastery));
    // (1*1 + 1*2 + 0*3 + 0*3) / (1 + 2 + 3 + 3)
    let score = done.score.unwrap();
    assert!((score - 100.0 / 3.0).abs() < 1e-9);
    assert_eq!(done.knowledge_level, Some(KnowledgeLevel::Beginner));
    assert_eq!(session.state(), AssessmentState::Terminated);

    let err = assessment.submit_answer(&mut session, "late", &cancel).await.unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));
}

#[tokio::test]
async fn hard_streak_ends_with_mastery() {
    let llm = Arc::new(ScriptedProvider::new());
    let assessment = service(&llm, AssessmentPolicy::default());
    let cancel = CancellationToken::new();

    llm.push_ok(question("Q1"));
    let (mut session, _) = assessment.start_assessment("Rust", None, None, &cancel).await.unwrap();

    for n in 2..=5 {
        llm.push_ok(grade(1.0));
        llm.push_ok(question(&format!("Q{n}")));
        let step = assessment.submit_answer(&mut session, "right", &cancel).await.unwrap();
        assert!(!step.is_complete, "ended early at question {n}");
    }
    llm.push_ok(grade(1.0));
    let done = assessment.submit_answer(&mut session, "right", &cancel).await.unwrap();
    assert_eq!(done.outcome, Some(Outcome::MasteryDemonstrated));
    assert_eq!(done.knowledge_level, Some(KnowledgeLevel::Advanced));
    assert_eq!(
        session.difficulties,
        vec![Difficulty::Easy, Difficulty::Medium, Difficulty::Hard, Difficulty::Hard, Difficulty::Hard]
    );
}

#[tokio::test]
async fn question_cap_bounds_the_untracked_variant() {
    let llm = Arc::new(ScriptedProvider::new());
    let policy = AssessmentPolicy { track_hard_streak: false, max_questions: Some(3), ..Default::default() };
    let assessment = service(&llm, policy);
    let cancel = CancellationToken::new();

    llm.push_ok(question("Q1"));
    let (mut session, _) = assessment.start_assessment("Rust", None, None, &cancel).await.unwrap();
    for n in 2..=3 {
        llm.push_ok(grade(1.0));
        llm.push_ok(question(&format!("Q{n}")));
        assessment.submit_answer(&mut session, "right", &cancel).await.unwrap();
    }
    llm.push_ok(grade(1.0));
    let done = assessment.submit_answer(&mut session, "right", &cancel).await.unwrap();
    assert_eq!(done.outcome, Some(Outcome::QuestionLimit));
}

#[tokio::test]
async fn repeated_questions_are_replaced() {
    let llm = Arc::new(ScriptedProvider::new());
    let assessment = service(&llm, AssessmentPolicy::default());
    let cancel = CancellationToken::new();

    llm.push_ok(question("What is a trait?"));
    let (mut session, _) = assessment.start_assessment("Rust", None, None, &cancel).await.unwrap();

    llm.push_ok(grade(0.5));
    for _ in 0..3 {
        llm.push_ok(question("what is a  TRAIT?"));
    }
    let step = assessment.submit_answer(&mut session, "an interface", &cancel).await.unwrap();
    let next = step.question.unwrap();
    assert!(next.starts_with("Question 2:"), "{next}");
    assert_eq!(session.questions.len(), 2);
}

#[tokio::test]
async fn ungradable_answer_gets_partial_credit() {
    let llm = Arc::new(ScriptedProvider::new());
    let assessment = service(&llm, AssessmentPolicy::default());
    let cancel = CancellationToken::new();

    llm.push_ok(question("Q1"));
    let (mut session, _) = assessment.start_assessment("Rust", None, None, &cancel).await.unwrap();
    llm.push_ok("I cannot grade this.");
    llm.push_ok(question("Q2"));
    let step = assessment.submit_answer(&mut session, "something", &cancel).await.unwrap();
    assert_eq!(step.evaluation, 0.5);
    assert_eq!(session.consecutive_wrong, 0);
}

#[tokio::test]
async fn empty_topic_is_rejected_before_generation() {
    let llm = Arc::new(ScriptedProvider::new());
    let assessment = service(&llm, AssessmentPolicy::default());
    let err = assessment
        .start_assessment("  ", None, None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));
    assert_eq!(llm.call_count(), 0);
}

#[tokio::test]
async fn exhausted_quota_is_surfaced() {
    let llm = Arc::new(ScriptedProvider::new());
    for _ in 0..5 {
        llm.push_err(LLMError::QuotaExhausted("RESOURCE_EXHAUSTED".into()));
    }
    let assessment = service(&llm, AssessmentPolicy::default());
    let err = assessment
        .start_assessment("Rust", None, None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::QuotaExhausted { attempts: 5 }));
    assert_eq!(llm.call_count(), 5);
}

#[tokio::test]
async fn failed_question_generation_can_be_resumed() {
    let llm = Arc::new(ScriptedProvider::new());
    let assessment = service(&llm, AssessmentPolicy::default());
    let cancel = CancellationToken::new();

    llm.push_ok(question("Q1"));
    let (mut session, _) = assessment.start_assessment("Rust", None, None, &cancel).await.unwrap();

    llm.push_ok(grade(1.0));
    llm.push_err(LLMError::EmptyChoices);
    let err = assessment.submit_answer(&mut session, "answer", &cancel).await.unwrap_err();
    assert!(matches!(err, ServiceError::Generation(_)));
    assert_eq!(session.state(), AssessmentState::GeneratingQuestion);
    assert_eq!(session.evaluations, vec![1.0]);

    llm.push_ok(question("Q2"));
    let turn = assessment.resume(&mut session, &cancel).await.unwrap();
    assert_eq!(turn.question, "Q2");
    assert_eq!(turn.difficulty, Difficulty::Medium);
    assert_eq!(session.state(), AssessmentState::AwaitingAnswer);
}

#[tokio::test]
async fn cancelled_token_stops_generation() {
    let llm = Arc::new(ScriptedProvider::with_responses([question("Q1")]));
    let assessment = service(&llm, AssessmentPolicy::default());
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = assessment.start_assessment("Rust", None, None, &cancel).await.unwrap_err();
    assert!(matches!(err, ServiceError::Cancelled));
}

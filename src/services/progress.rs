use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use super::syllabus::SyllabusVersionStore;
use super::ServiceError;
use crate::cache::keys::progress_lock_key;
use crate::cache::KeyedLocks;
use crate::db::operations::progress as ops;
use crate::db::DocumentStore;
use crate::types::{PerformanceEntry, Syllabus, TopicProgress, UserProgress};

/// Folds lesson results into per-user, per-topic progress documents.
#[derive(Clone)]
pub struct ProgressAggregator {
    store: Arc<dyn DocumentStore>,
    locks: Arc<KeyedLocks>,
    syllabi: SyllabusVersionStore,
}

impl ProgressAggregator {
    pub fn new(store: Arc<dyn DocumentStore>, locks: Arc<KeyedLocks>, syllabi: SyllabusVersionStore) -> Self {
        Self { store, locks, syllabi }
    }

    pub async fn record_lesson_completion(
        &self,
        user_id: &str,
        topic: &str,
        syllabus: &Syllabus,
        lesson_title: &str,
        score: f64,
    ) -> Result<PerformanceEntry, ServiceError> {
        validate_score(score)?;
        if !syllabus.contains_lesson(lesson_title) {
            return Err(ServiceError::validation(format!(
                "lesson {lesson_title:?} is not part of syllabus {}",
                syllabus.uid
            )));
        }

        let _guard = self.locks.lock(&progress_lock_key(user_id)).await;
        let store = self.store.as_ref();
        let mut progress = ops::get_user_progress(store, user_id)
            .await?
            .unwrap_or_else(|| UserProgress::new(user_id));

        let entry = PerformanceEntry { score, completed_at: Utc::now() };
        let record = progress.topics.entry(topic.to_string()).or_default();
        if !record.completed_lessons.iter().any(|l| l == lesson_title) {
            record.completed_lessons.push(lesson_title.to_string());
        }
        record.performance.insert(lesson_title.to_string(), entry.clone());
        record.current_lesson = next_lesson(syllabus, record);
        recompute(record, syllabus.total_lessons());

        info!(
            user_id,
            topic,
            lesson = lesson_title,
            score,
            overall_progress = record.overall_progress,
            overall_performance = record.overall_performance,
            "lesson completion recorded"
        );

        progress.updated_at = entry.completed_at;
        ops::put_user_progress(store, &progress).await?;
        Ok(entry)
    }

    /// Resolves the user's syllabus for `topic` (own copy first, then the
    /// master at any level) and records the completion against it.
    pub async fn record_progress(
        &self,
        user_id: &str,
        topic: &str,
        lesson_title: &str,
        score: f64,
    ) -> Result<PerformanceEntry, ServiceError> {
        let topic = topic.trim();
        if user_id.trim().is_empty() {
            return Err(ServiceError::validation("user_id must not be empty"));
        }
        if topic.is_empty() {
            return Err(ServiceError::validation("topic must not be empty"));
        }
        validate_score(score)?;

        let syllabus = self
            .syllabi
            .find_for_user_topic(topic, user_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("no syllabus found for topic {topic:?}")))?;
        self.record_lesson_completion(user_id, topic, &syllabus, lesson_title, score)
            .await
    }

    /// Read-only view; unknown users get an empty record.
    pub async fn get_progress(&self, user_id: &str, topic: Option<&str>) -> Result<UserProgress, ServiceError> {
        let mut progress = ops::get_user_progress(self.store.as_ref(), user_id)
            .await?
            .unwrap_or_else(|| UserProgress::new(user_id));
        if let Some(topic) = topic {
            progress.topics.retain(|name, _| name == topic);
        }
        Ok(progress)
    }
}

fn validate_score(score: f64) -> Result<(), ServiceError> {
    if score.is_finite() && (0.0..=1.0).contains(&score) {
        Ok(())
    } else {
        Err(ServiceError::validation(format!("score must be within [0, 1], got {score}")))
    }
}

fn recompute(record: &mut TopicProgress, total_lessons: usize) {
    record.overall_progress = if total_lessons == 0 {
        0.0
    } else {
        (record.completed_lessons.len() as f64 / total_lessons as f64).min(1.0)
    };
    record.overall_performance = if record.performance.is_empty() {
        0.0
    } else {
        record.performance.values().map(|p| p.score).sum::<f64>() / record.performance.len() as f64
    };
}

/// First lesson in syllabus order the learner has not completed yet.
fn next_lesson(syllabus: &Syllabus, record: &TopicProgress) -> Option<String> {
    syllabus
        .modules
        .iter()
        .flat_map(|m| &m.lessons)
        .find(|l| !record.completed_lessons.contains(&l.title))
        .map(|l| l.title.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::types::{LessonRef, SyllabusModule};

    fn four_lesson_syllabus() -> Syllabus {
        let now = Utc::now();
        let module = |title: &str, lessons: [&str; 2]| SyllabusModule {
            week: 1,
            title: title.into(),
            lessons: lessons.iter().map(|t| LessonRef { title: t.to_string() }).collect(),
        };
        Syllabus {
            uid: "s1".into(),
            topic: "Rust".into(),
            user_entered_topic: "rust".into(),
            level: "beginner".into(),
            duration: "2 weeks".into(),
            learning_objectives: vec![],
            modules: vec![module("M1", ["L1", "L2"]), module("M2", ["L3", "L4"])],
            is_master: true,
            user_id: None,
            parent_uid: None,
            is_placeholder: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn aggregator() -> ProgressAggregator {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let locks = Arc::new(KeyedLocks::new());
        let syllabi = SyllabusVersionStore::new(Arc::clone(&store), Arc::clone(&locks));
        ProgressAggregator::new(store, locks, syllabi)
    }

    #[tokio::test]
    async fn aggregates_progress_and_performance() {
        let progress = aggregator();
        let syllabus = four_lesson_syllabus();
        progress.record_lesson_completion("u1", "rust", &syllabus, "L1", 0.8).await.unwrap();
        progress.record_lesson_completion("u1", "rust", &syllabus, "L2", 1.0).await.unwrap();

        let view = progress.get_progress("u1", Some("rust")).await.unwrap();
        let topic = &view.topics["rust"];
        assert!((topic.overall_progress - 0.5).abs() < 1e-9);
        assert!((topic.overall_performance - 0.9).abs() < 1e-9);
        assert_eq!(topic.completed_lessons, vec!["L1", "L2"]);
        assert_eq!(topic.current_lesson.as_deref(), Some("L3"));
    }

    #[tokio::test]
    async fn repeating_a_lesson_overwrites_its_score() {
        let progress = aggregator();
        let syllabus = four_lesson_syllabus();
        progress.record_lesson_completion("u1", "rust", &syllabus, "L1", 0.2).await.unwrap();
        progress.record_lesson_completion("u1", "rust", &syllabus, "L1", 0.6).await.unwrap();

        let view = progress.get_progress("u1", None).await.unwrap();
        let topic = &view.topics["rust"];
        assert_eq!(topic.completed_lessons.len(), 1);
        assert!((topic.overall_performance - 0.6).abs() < 1e-9);
        assert!((topic.overall_progress - 0.25).abs() < 1e-9);
    }

    #[tokio::test]
    async fn invalid_scores_and_lessons_are_rejected() {
        let progress = aggregator();
        let syllabus = four_lesson_syllabus();
        for score in [-0.1, 1.5, f64::NAN] {
            let err = progress.record_lesson_completion("u1", "rust", &syllabus, "L1", score).await.unwrap_err();
            assert!(matches!(err, ServiceError::Validation(_)));
        }
        let err = progress.record_lesson_completion("u1", "rust", &syllabus, "L9", 0.5).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn record_progress_without_syllabus_is_not_found() {
        let err = aggregator().record_progress("u1", "rust", "L1", 0.5).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn unknown_user_reads_empty() {
        let view = aggregator().get_progress("ghost", None).await.unwrap();
        assert!(view.topics.is_empty());
    }

    #[test]
    fn empty_syllabus_has_zero_progress() {
        let mut record = TopicProgress::default();
        record.completed_lessons.push("L1".into());
        recompute(&mut record, 0);
        assert_eq!(record.overall_progress, 0.0);
    }
}

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::generation::StructuredGenerator;
use super::prompts::{self, LESSON_KEYS};
use super::ServiceError;
use crate::cache::keys::{lesson_lock_key, lesson_uid};
use crate::cache::KeyedLocks;
use crate::db::operations::{lesson_content as ops, progress as progress_ops};
use crate::db::DocumentStore;
use crate::types::{LessonBody, LessonContent, LessonMetadata, Syllabus, TopicProgress};

/// Generate-once store of lesson bodies keyed by lesson uid.
#[derive(Clone)]
pub struct LessonContentCache {
    store: Arc<dyn DocumentStore>,
    locks: Arc<KeyedLocks>,
}

impl LessonContentCache {
    pub fn new(store: Arc<dyn DocumentStore>, locks: Arc<KeyedLocks>) -> Self {
        Self { store, locks }
    }

    pub async fn get(&self, lesson_uid: &str) -> Result<Option<LessonContent>, ServiceError> {
        Ok(ops::get_lesson_content(self.store.as_ref(), lesson_uid).await?)
    }

    /// Returns the stored content for `lesson_uid`, or runs `generate` and
    /// stores its result. Misses on the same key are serialized, so the
    /// generator runs at most once per key within this process.
    pub async fn get_or_generate<F, Fut>(&self, lesson_uid: &str, generate: F) -> Result<LessonContent, ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<LessonBody, ServiceError>>,
    {
        let _guard = self.locks.lock(&lesson_lock_key(lesson_uid)).await;
        let store = self.store.as_ref();

        if let Some(hit) = ops::get_lesson_content(store, lesson_uid).await? {
            debug!(lesson_uid, "lesson cache hit");
            return Ok(hit);
        }

        info!(lesson_uid, "lesson cache miss, generating");
        let body = generate().await?;

        // Another process may have written while we generated; keep its creation time.
        let now = Utc::now();
        let created_at = ops::get_lesson_content(store, lesson_uid)
            .await?
            .map(|existing| existing.created_at)
            .unwrap_or(now);
        let content = LessonContent {
            lesson_uid: lesson_uid.to_string(),
            content: body,
            created_at,
            updated_at: now,
        };
        ops::put_lesson_content(store, &content).await?;
        Ok(content)
    }
}

#[derive(Debug, Deserialize)]
struct GeneratedLesson {
    exposition: String,
    #[serde(default)]
    thought_questions: Vec<String>,
    #[serde(default)]
    active_exercises: Vec<String>,
    #[serde(default)]
    knowledge_assessment: Vec<Value>,
}

impl GeneratedLesson {
    fn placeholder(lesson_title: &str) -> Self {
        Self {
            exposition: format!(
                "Content for \"{lesson_title}\" could not be generated right now. Review the module outline and try again later."
            ),
            thought_questions: vec![format!("What do you already know about {lesson_title}?")],
            active_exercises: vec![format!("Write a short summary of {lesson_title} in your own words.")],
            knowledge_assessment: vec![json!({
                "question": format!("Which statement best describes {lesson_title}?"),
                "options": [],
                "answer": "",
                "explanation": "",
            })],
        }
    }
}

#[derive(Clone)]
pub struct LessonService {
    cache: LessonContentCache,
    generator: StructuredGenerator,
    store: Arc<dyn DocumentStore>,
}

impl LessonService {
    pub fn new(cache: LessonContentCache, generator: StructuredGenerator, store: Arc<dyn DocumentStore>) -> Self {
        Self { cache, generator, store }
    }

    pub fn cache(&self) -> &LessonContentCache {
        &self.cache
    }

    pub async fn get_or_generate_lesson(
        &self,
        syllabus: &Syllabus,
        module_title: &str,
        lesson_title: &str,
        user_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<LessonContent, ServiceError> {
        let module = syllabus.find_module(module_title).ok_or_else(|| {
            ServiceError::validation(format!("module {module_title:?} not found in syllabus {}", syllabus.uid))
        })?;
        if module.find_lesson(lesson_title).is_none() {
            return Err(ServiceError::validation(format!(
                "lesson {lesson_title:?} not found in module {module_title:?}"
            )));
        }

        let uid = lesson_uid(&syllabus.uid, module_title, lesson_title);
        self.cache
            .get_or_generate(&uid, || async {
                let prior = match user_id {
                    Some(user_id) => self.prior_performance(user_id, syllabus).await?,
                    None => None,
                };
                let prompt = prompts::lesson_prompt(syllabus, module_title, lesson_title, prior.as_ref());
                let reply = self
                    .generator
                    .generate("lesson", &prompt, LESSON_KEYS, || GeneratedLesson::placeholder(lesson_title), cancel)
                    .await?;
                let lesson = reply.value;
                Ok(LessonBody {
                    exposition: lesson.exposition,
                    thought_questions: lesson.thought_questions,
                    active_exercises: lesson.active_exercises,
                    knowledge_assessment: lesson.knowledge_assessment,
                    metadata: LessonMetadata {
                        syllabus_uid: syllabus.uid.clone(),
                        topic: syllabus.topic.clone(),
                        level: syllabus.level.clone(),
                        module_title: module_title.to_string(),
                        lesson_title: lesson_title.to_string(),
                        personalized_for: prior.as_ref().and(user_id.map(str::to_string)),
                        is_placeholder: reply.is_placeholder,
                        generated_at: Utc::now(),
                    },
                })
            })
            .await
    }

    async fn prior_performance(&self, user_id: &str, syllabus: &Syllabus) -> Result<Option<TopicProgress>, ServiceError> {
        let Some(mut progress) = progress_ops::get_user_progress(self.store.as_ref(), user_id).await? else {
            return Ok(None);
        };
        let prior = progress
            .topics
            .remove(&syllabus.user_entered_topic)
            .or_else(|| progress.topics.remove(&syllabus.topic));
        Ok(prior.filter(|p| !p.performance.is_empty()))
    }
}

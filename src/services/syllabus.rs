//! Master and per-user syllabus documents.
//!
//! A master document is the canonical syllabus for a (topic, level) pair.
//! User documents derive from it and point back through `parent_uid`, which
//! always names a master and never another user document.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::generation::StructuredGenerator;
use super::prompts::{self, SYLLABUS_KEYS};
use super::search_provider::{search_or_placeholder, SearchConfig, SearchProvider};
use super::ServiceError;
use crate::cache::keys::syllabus_lock_key;
use crate::cache::KeyedLocks;
use crate::db::operations::syllabus as ops;
use crate::db::{DocumentStore, Filter};
use crate::types::{KnowledgeLevel, LessonRef, Syllabus, SyllabusModule};

const PLACEHOLDER_WEEKS: u32 = 4;

#[derive(Clone)]
pub struct SyllabusVersionStore {
    store: Arc<dyn DocumentStore>,
    locks: Arc<KeyedLocks>,
}

impl SyllabusVersionStore {
    pub fn new(store: Arc<dyn DocumentStore>, locks: Arc<KeyedLocks>) -> Self {
        Self { store, locks }
    }

    /// The user's own document when there is one, else the master.
    pub async fn find(
        &self,
        topic: &str,
        level: &str,
        user_id: Option<&str>,
    ) -> Result<Option<Syllabus>, ServiceError> {
        if let Some(user_id) = user_id {
            if let Some(found) = ops::find_user_syllabus(self.store.as_ref(), topic, level, user_id).await? {
                return Ok(Some(found));
            }
        }
        Ok(ops::find_master(self.store.as_ref(), topic, level).await?)
    }

    pub async fn find_by_uid(&self, uid: &str) -> Result<Option<Syllabus>, ServiceError> {
        Ok(ops::get_syllabus(self.store.as_ref(), uid).await?)
    }

    /// Any level: the user's document if they have one, otherwise a master.
    pub async fn find_for_user_topic(
        &self,
        topic: &str,
        user_id: &str,
    ) -> Result<Option<Syllabus>, ServiceError> {
        let store = self.store.as_ref();
        let own = Filter::And(vec![ops::topic_filter(topic), ops::user_filter(user_id)]);
        if let Some(found) = ops::find_first(store, &own).await? {
            return Ok(Some(found));
        }
        let master = Filter::And(vec![ops::topic_filter(topic), ops::master_filter()]);
        Ok(ops::find_first(store, &master).await?)
    }

    /// Upsert keyed by `(topic, level, user_id)`; the master key when
    /// `user_id` is `None`. An existing document keeps its uid, creation time
    /// and lineage. A first user document for a pair without a master
    /// provisions the master before it.
    pub async fn create_or_update(
        &self,
        candidate: Syllabus,
        user_id: Option<&str>,
    ) -> Result<Syllabus, ServiceError> {
        let level = canonical_level(&candidate.level)?;
        let _guards = self.locks.lock_all(lock_keys(&candidate, &level, user_id)).await;

        let store = self.store.as_ref();
        let owner = match user_id {
            Some(user_id) => ops::user_filter(user_id),
            None => ops::master_filter(),
        };
        let key = Filter::And(vec![candidate_key(&candidate, &level), owner]);
        let now = Utc::now();

        if let Some(existing) = ops::find_first(store, &key).await? {
            // The stored typed topic stays: it is part of the lookup key.
            let user_entered_topic = if existing.user_entered_topic.is_empty() {
                candidate.user_entered_topic.clone()
            } else {
                existing.user_entered_topic
            };
            let updated = Syllabus {
                uid: existing.uid,
                user_entered_topic,
                level,
                is_master: existing.is_master,
                user_id: existing.user_id,
                parent_uid: existing.parent_uid,
                created_at: existing.created_at,
                updated_at: now,
                ..candidate
            };
            ops::put_syllabus(store, &updated).await?;
            debug!(uid = %updated.uid, "syllabus updated in place");
            return Ok(updated);
        }

        let Some(user_id) = user_id else {
            let master = Syllabus {
                uid: new_uid(),
                level,
                is_master: true,
                user_id: None,
                parent_uid: None,
                created_at: now,
                updated_at: now,
                ..candidate
            };
            ops::put_syllabus(store, &master).await?;
            info!(uid = %master.uid, topic = %master.topic, level = %master.level, "master syllabus created");
            return Ok(master);
        };

        let master = {
            let _master_guards = self.locks.lock_all(lock_keys(&candidate, &level, None)).await;
            let master_key = Filter::And(vec![candidate_key(&candidate, &level), ops::master_filter()]);
            match ops::find_first(store, &master_key).await? {
                Some(master) => master,
                None => {
                    let master = Syllabus {
                        uid: new_uid(),
                        level: level.clone(),
                        is_master: true,
                        user_id: None,
                        parent_uid: None,
                        created_at: now,
                        updated_at: now,
                        ..candidate.clone()
                    };
                    ops::put_syllabus(store, &master).await?;
                    info!(
                        uid = %master.uid,
                        topic = %master.topic,
                        level = %master.level,
                        "master syllabus provisioned for first user copy"
                    );
                    master
                }
            }
        };

        let user_doc = Syllabus {
            uid: new_uid(),
            level,
            is_master: false,
            user_id: Some(user_id.to_string()),
            parent_uid: Some(master.uid),
            created_at: now,
            updated_at: now,
            ..candidate
        };
        ops::put_syllabus(store, &user_doc).await?;
        info!(uid = %user_doc.uid, user_id, "user syllabus created");
        Ok(user_doc)
    }

    /// Deep copy owned by `user_id`. When the user already owns a document
    /// for the same (topic, level) it is overwritten and keeps its own uid.
    pub async fn clone_for_user(&self, source: &Syllabus, user_id: &str) -> Result<Syllabus, ServiceError> {
        if user_id.trim().is_empty() {
            return Err(ServiceError::validation("user_id must not be empty"));
        }
        if source.user_id.as_deref() == Some(user_id) {
            return Ok(source.clone());
        }
        let parent_uid = if source.is_master {
            source.uid.clone()
        } else {
            source
                .parent_uid
                .clone()
                .ok_or_else(|| ServiceError::validation(format!("syllabus {} has no parent", source.uid)))?
        };

        let level = canonical_level(&source.level)?;
        let _guards = self.locks.lock_all(lock_keys(source, &level, Some(user_id))).await;

        let store = self.store.as_ref();
        let key = Filter::And(vec![candidate_key(source, &level), ops::user_filter(user_id)]);
        let existing = ops::find_first(store, &key).await?;
        let now = Utc::now();

        let cloned = Syllabus {
            uid: existing.as_ref().map(|e| e.uid.clone()).unwrap_or_else(new_uid),
            level,
            is_master: false,
            user_id: Some(user_id.to_string()),
            parent_uid: Some(parent_uid),
            created_at: existing.as_ref().map(|e| e.created_at).unwrap_or(now),
            updated_at: now,
            ..source.clone()
        };
        ops::put_syllabus(store, &cloned).await?;
        info!(source = %source.uid, uid = %cloned.uid, user_id, "syllabus cloned for user");
        Ok(cloned)
    }

    /// Removes the master and every user document for the pair.
    pub async fn delete(&self, topic: &str, level: &str) -> Result<u64, ServiceError> {
        let removed = ops::delete_syllabi(self.store.as_ref(), topic, level).await?;
        info!(topic, level, removed, "syllabi purged");
        Ok(removed)
    }
}

fn new_uid() -> String {
    Uuid::new_v4().to_string()
}

fn canonical_level(level: &str) -> Result<String, ServiceError> {
    KnowledgeLevel::parse(level)
        .map(|l| l.as_str().to_string())
        .ok_or_else(|| ServiceError::validation(format!("unknown knowledge level: {level:?}")))
}

/// Every topic string the candidate can be matched by.
fn key_topics(syllabus: &Syllabus) -> Vec<&str> {
    let mut topics = vec![syllabus.topic.as_str()];
    if !syllabus.user_entered_topic.is_empty() {
        topics.push(&syllabus.user_entered_topic);
    }
    topics
}

/// One lock per matchable topic. Two candidates that could resolve to the
/// same stored document share at least one key.
fn lock_keys(syllabus: &Syllabus, level: &str, user_id: Option<&str>) -> Vec<String> {
    key_topics(syllabus)
        .into_iter()
        .map(|topic| syllabus_lock_key(topic, level, user_id))
        .collect()
}

fn candidate_key(candidate: &Syllabus, level: &str) -> Filter {
    let mut topic = vec![Filter::eq_ignore_case("topic", candidate.topic.trim())];
    if !candidate.user_entered_topic.is_empty() {
        topic.push(Filter::eq_ignore_case(
            "user_entered_topic",
            candidate.user_entered_topic.trim(),
        ));
    }
    Filter::And(vec![Filter::Or(topic), Filter::eq_ignore_case("level", level)])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveStatus {
    Saved,
    Skipped,
}

/// Per-user working copy of a syllabus while feedback iterations happen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyllabusSession {
    pub topic: String,
    pub level: KnowledgeLevel,
    pub user_id: Option<String>,
    pub syllabus: Syllabus,
    pub iteration: u32,
    pub feedback_history: Vec<String>,
    dirty: bool,
}

impl SyllabusSession {
    pub fn new(topic: &str, level: KnowledgeLevel, user_id: Option<&str>, syllabus: Syllabus) -> Self {
        Self {
            topic: topic.to_string(),
            level,
            user_id: user_id.map(str::to_string),
            syllabus,
            iteration: 0,
            feedback_history: Vec::new(),
            dirty: false,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

#[derive(Debug, Deserialize)]
struct GeneratedSyllabus {
    topic: String,
    #[serde(default)]
    duration: String,
    #[serde(default)]
    learning_objectives: Vec<String>,
    modules: Vec<SyllabusModule>,
}

impl GeneratedSyllabus {
    fn placeholder(topic: &str) -> Self {
        let modules = (1..=PLACEHOLDER_WEEKS)
            .map(|week| SyllabusModule {
                week,
                title: format!("Week {week}: {topic} fundamentals, part {week}"),
                lessons: vec![
                    LessonRef { title: format!("Core ideas of {topic} ({week}.1)") },
                    LessonRef { title: format!("Practising {topic} ({week}.2)") },
                ],
            })
            .collect();
        Self {
            topic: topic.to_string(),
            duration: format!("{PLACEHOLDER_WEEKS} weeks"),
            learning_objectives: vec![
                format!("Understand the fundamental concepts of {topic}"),
                format!("Apply {topic} to simple practical problems"),
            ],
            modules,
        }
    }

    fn into_syllabus(self, user_topic: &str, level: KnowledgeLevel, is_placeholder: bool) -> Syllabus {
        let now = Utc::now();
        let topic = if self.topic.trim().is_empty() { user_topic.to_string() } else { self.topic };
        Syllabus {
            uid: String::new(),
            topic,
            user_entered_topic: user_topic.to_string(),
            level: level.as_str().to_string(),
            duration: self.duration,
            learning_objectives: self.learning_objectives,
            modules: self.modules,
            is_master: false,
            user_id: None,
            parent_uid: None,
            is_placeholder,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Clone)]
pub struct SyllabusService {
    versions: SyllabusVersionStore,
    generator: StructuredGenerator,
    search: Arc<dyn SearchProvider>,
    search_config: SearchConfig,
}

impl SyllabusService {
    pub fn new(
        versions: SyllabusVersionStore,
        generator: StructuredGenerator,
        search: Arc<dyn SearchProvider>,
        search_config: SearchConfig,
    ) -> Self {
        Self { versions, generator, search, search_config }
    }

    pub fn versions(&self) -> &SyllabusVersionStore {
        &self.versions
    }

    pub async fn get_or_create_syllabus(
        &self,
        topic: &str,
        level: &str,
        user_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Syllabus, ServiceError> {
        let (topic, level) = validate_request(topic, level)?;
        if let Some(found) = self.versions.find(topic, level.as_str(), user_id).await? {
            debug!(uid = %found.uid, topic, "syllabus found");
            return Ok(found);
        }

        info!(topic, level = %level, "no stored syllabus, generating");
        let generated = self.generate(topic, level, None, None, cancel).await?;
        // A fresh generation becomes the master; users get their own copy on save or clone.
        self.versions.create_or_update(generated, None).await
    }

    pub async fn start_session(
        &self,
        topic: &str,
        level: &str,
        user_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<SyllabusSession, ServiceError> {
        let syllabus = self.get_or_create_syllabus(topic, level, user_id, cancel).await?;
        let (topic, level) = validate_request(topic, level)?;
        Ok(SyllabusSession::new(topic, level, user_id, syllabus))
    }

    /// Regenerates the session's syllabus with the learner's feedback. The
    /// result is held in the session until [`Self::save_syllabus`].
    pub async fn update_syllabus(
        &self,
        session: &mut SyllabusSession,
        feedback: &str,
        cancel: &CancellationToken,
    ) -> Result<Syllabus, ServiceError> {
        let feedback = feedback.trim();
        if feedback.is_empty() {
            return Err(ServiceError::validation("feedback must not be empty"));
        }

        let revised = self
            .generate(&session.topic, session.level, Some(&session.syllabus), Some(feedback), cancel)
            .await?;
        let previous = &session.syllabus;
        session.syllabus = Syllabus {
            uid: previous.uid.clone(),
            is_master: previous.is_master,
            user_id: previous.user_id.clone(),
            parent_uid: previous.parent_uid.clone(),
            created_at: previous.created_at,
            updated_at: Utc::now(),
            ..revised
        };
        session.iteration += 1;
        session.feedback_history.push(feedback.to_string());
        session.dirty = true;
        info!(uid = %session.syllabus.uid, iteration = session.iteration, "syllabus revised from feedback");
        Ok(session.syllabus.clone())
    }

    pub async fn save_syllabus(&self, session: &mut SyllabusSession) -> Result<SaveStatus, ServiceError> {
        if !session.dirty {
            return Ok(SaveStatus::Skipped);
        }
        let saved = self
            .versions
            .create_or_update(session.syllabus.clone(), session.user_id.as_deref())
            .await?;
        session.syllabus = saved;
        session.dirty = false;
        Ok(SaveStatus::Saved)
    }

    pub async fn clone_syllabus_for_user(&self, syllabus: &Syllabus, user_id: &str) -> Result<Syllabus, ServiceError> {
        self.versions.clone_for_user(syllabus, user_id).await
    }

    async fn generate(
        &self,
        topic: &str,
        level: KnowledgeLevel,
        previous: Option<&Syllabus>,
        feedback: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Syllabus, ServiceError> {
        let query = format!("{topic} {} course syllabus curriculum", level.as_str());
        let context = search_or_placeholder(
            self.generator.invoker(),
            self.search.as_ref(),
            &query,
            &self.search_config.domain_filters,
            self.search_config.max_results,
        )
        .await;

        let prompt = prompts::syllabus_prompt(topic, level.as_str(), &context, previous, feedback);
        let reply = self
            .generator
            .generate("syllabus", &prompt, SYLLABUS_KEYS, || GeneratedSyllabus::placeholder(topic), cancel)
            .await?;
        Ok(reply.value.into_syllabus(topic, level, reply.is_placeholder))
    }
}

fn validate_request<'a>(topic: &'a str, level: &str) -> Result<(&'a str, KnowledgeLevel), ServiceError> {
    let topic = topic.trim();
    if topic.is_empty() {
        return Err(ServiceError::validation("topic must not be empty"));
    }
    let level = KnowledgeLevel::parse(level)
        .ok_or_else(|| ServiceError::validation(format!("unknown knowledge level: {level:?}")))?;
    Ok((topic, level))
}

use std::sync::Arc;
use std::time::{Instant, SystemTime};

use tokio_util::sync::CancellationToken;

use crate::cache::KeyedLocks;
use crate::config::Config;
use crate::db::DocumentStore;
use crate::services::assessment::{AssessmentService, AssessmentSession};
use crate::services::generation::StructuredGenerator;
use crate::services::lesson_content::{LessonContentCache, LessonService};
use crate::services::llm_provider::GenerativeProvider;
use crate::services::progress::ProgressAggregator;
use crate::services::retry::RetryingInvoker;
use crate::services::search_provider::SearchProvider;
use crate::services::sessions::SessionRegistry;
use crate::services::syllabus::{SyllabusService, SyllabusSession, SyllabusVersionStore};

pub type AssessmentSessions = SessionRegistry<AssessmentSession>;
pub type SyllabusSessions = SessionRegistry<SyllabusSession>;

/// Composition root shared by every request handler and worker.
#[derive(Clone)]
pub struct AppState {
    started_at: Instant,
    started_at_system: SystemTime,
    store: Arc<dyn DocumentStore>,
    assessment: AssessmentService,
    syllabus: SyllabusService,
    lessons: LessonService,
    progress: ProgressAggregator,
    assessment_sessions: Arc<AssessmentSessions>,
    syllabus_sessions: Arc<SyllabusSessions>,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        config: &Config,
        store: Arc<dyn DocumentStore>,
        llm: Arc<dyn GenerativeProvider>,
        search: Arc<dyn SearchProvider>,
    ) -> Self {
        let locks = Arc::new(KeyedLocks::new());
        let generator = StructuredGenerator::new(llm, RetryingInvoker::new(config.retry.clone()));
        let versions = SyllabusVersionStore::new(Arc::clone(&store), Arc::clone(&locks));

        Self {
            started_at: Instant::now(),
            started_at_system: SystemTime::now(),
            assessment: AssessmentService::new(generator.clone(), config.assessment.clone()),
            syllabus: SyllabusService::new(versions.clone(), generator.clone(), search, config.search.clone()),
            lessons: LessonService::new(
                LessonContentCache::new(Arc::clone(&store), Arc::clone(&locks)),
                generator,
                Arc::clone(&store),
            ),
            progress: ProgressAggregator::new(Arc::clone(&store), locks, versions),
            store,
            assessment_sessions: Arc::new(SessionRegistry::new()),
            syllabus_sessions: Arc::new(SessionRegistry::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn started_at_system(&self) -> SystemTime {
        self.started_at_system
    }

    pub fn store(&self) -> Arc<dyn DocumentStore> {
        Arc::clone(&self.store)
    }

    pub fn assessment(&self) -> &AssessmentService {
        &self.assessment
    }

    pub fn syllabus(&self) -> &SyllabusService {
        &self.syllabus
    }

    pub fn lessons(&self) -> &LessonService {
        &self.lessons
    }

    pub fn progress(&self) -> &ProgressAggregator {
        &self.progress
    }

    pub fn assessment_sessions(&self) -> Arc<AssessmentSessions> {
        Arc::clone(&self.assessment_sessions)
    }

    pub fn syllabus_sessions(&self) -> Arc<SyllabusSessions> {
        Arc::clone(&self.syllabus_sessions)
    }

    /// Cancelled when the process begins shutting down.
    pub fn request_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use learnpath_backend_rust::cache::KeyedLocks;
use learnpath_backend_rust::db::config::DbConfig;
use learnpath_backend_rust::db::{Collection, DocumentStore, Filter, MemoryStore, SqliteStore, StoreError};
use learnpath_backend_rust::services::syllabus::{SaveStatus, SyllabusVersionStore};
use learnpath_backend_rust::types::{LessonRef, Syllabus, SyllabusModule};

mod common;

fn candidate(topic: &str, level: &str) -> Syllabus {
    let now = Utc::now();
    Syllabus {
        uid: String::new(),
        topic: topic.to_string(),
        user_entered_topic: topic.to_lowercase(),
        level: level.to_string(),
        duration: "3 weeks".to_string(),
        learning_objectives: vec!["Learn".to_string()],
        modules: vec![SyllabusModule {
            week: 1,
            title: "Basics".to_string(),
            lessons: vec![LessonRef { title: "Intro".to_string() }],
        }],
        is_master: false,
        user_id: None,
        parent_uid: None,
        is_placeholder: false,
        created_at: now,
        updated_at: now,
    }
}

/// Widens the window between a lookup and the write that follows it.
struct SlowFindStore {
    inner: MemoryStore,
    delay: Duration,
}

#[async_trait]
impl DocumentStore for SlowFindStore {
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, StoreError> {
        self.inner.get(collection, id).await
    }

    async fn find(&self, collection: Collection, filter: &Filter) -> Result<Vec<Value>, StoreError> {
        let found = self.inner.find(collection, filter).await?;
        tokio::time::sleep(self.delay).await;
        Ok(found)
    }

    async fn upsert(&self, collection: Collection, id: &str, doc: &Value) -> Result<(), StoreError> {
        self.inner.upsert(collection, id, doc).await
    }

    async fn delete_where(&self, collection: Collection, filter: &Filter) -> Result<u64, StoreError> {
        self.inner.delete_where(collection, filter).await
    }

    async fn count(&self, collection: Collection) -> Result<u64, StoreError> {
        self.inner.count(collection).await
    }
}

async fn sqlite_store() -> (Arc<dyn DocumentStore>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("learnpath.db").display());
    let store = SqliteStore::connect(&url, &DbConfig::in_memory()).await.unwrap();
    (Arc::new(store), dir)
}

async fn assert_master_provisioning(store: Arc<dyn DocumentStore>) {
    let versions = SyllabusVersionStore::new(Arc::clone(&store), Arc::new(KeyedLocks::new()));

    let user = versions.create_or_update(candidate("X", "beginner"), Some("u1")).await.unwrap();
    assert_eq!(store.count(Collection::Syllabi).await.unwrap(), 2);

    let master = versions.find("X", "Beginner", None).await.unwrap().unwrap();
    assert!(master.is_master);
    assert!(master.user_id.is_none() && master.parent_uid.is_none());
    assert_eq!(user.parent_uid.as_deref(), Some(master.uid.as_str()));

    let again = versions.create_or_update(candidate("X", "BEGINNER"), Some("u1")).await.unwrap();
    assert_eq!(again.uid, user.uid);
    assert_eq!(store.count(Collection::Syllabi).await.unwrap(), 2);

    // The user's own copy wins over the master.
    let found = versions.find("x", "beginner", Some("u1")).await.unwrap().unwrap();
    assert_eq!(found.uid, user.uid);
    let fallback = versions.find("X", "beginner", Some("u2")).await.unwrap().unwrap();
    assert_eq!(fallback.uid, master.uid);

    let cloned = versions.clone_for_user(&user, "u2").await.unwrap();
    assert_ne!(cloned.uid, user.uid);
    assert_eq!(cloned.parent_uid.as_deref(), Some(master.uid.as_str()));
    assert_eq!(store.count(Collection::Syllabi).await.unwrap(), 3);

    assert_eq!(versions.delete("X", "beginner").await.unwrap(), 3);
    assert!(versions.find("X", "beginner", None).await.unwrap().is_none());
}

#[tokio::test]
async fn memory_store_versioning() {
    assert_master_provisioning(Arc::new(MemoryStore::new())).await;
}

#[tokio::test]
async fn sqlite_store_versioning() {
    let (store, _dir) = sqlite_store().await;
    assert_master_provisioning(store).await;
}

#[tokio::test]
async fn concurrent_first_inserts_create_one_master() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let versions = SyllabusVersionStore::new(Arc::clone(&store), Arc::new(KeyedLocks::new()));

    let mut handles = Vec::new();
    for user in ["a", "b", "c", "d"] {
        let versions = versions.clone();
        handles.push(tokio::spawn(async move {
            versions.create_or_update(candidate("Go", "advanced"), Some(user)).await.unwrap()
        }));
    }
    let mut parents = Vec::new();
    for handle in handles {
        parents.push(handle.await.unwrap().parent_uid.unwrap());
    }
    parents.dedup();
    assert_eq!(parents.len(), 1);
    assert_eq!(store.count(Collection::Syllabi).await.unwrap(), 5);
}

#[tokio::test]
async fn differently_typed_topics_share_one_master() {
    let store: Arc<dyn DocumentStore> = Arc::new(SlowFindStore {
        inner: MemoryStore::new(),
        delay: Duration::from_millis(20),
    });
    let versions = SyllabusVersionStore::new(Arc::clone(&store), Arc::new(KeyedLocks::new()));

    let mut a = candidate("Rust", "beginner");
    a.user_entered_topic = "rust".to_string();
    let mut b = candidate("Rust", "beginner");
    b.user_entered_topic = "rust lang".to_string();
    let mut c = candidate("Rust", "beginner");
    c.user_entered_topic = "Rust".to_string();

    let (a, b, c) = tokio::join!(
        versions.create_or_update(a, None),
        versions.create_or_update(b, Some("u1")),
        versions.create_or_update(c, Some("u2")),
    );
    let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());

    let masters: Vec<_> = store
        .find(Collection::Syllabi, &Filter::eq("is_master", true))
        .await
        .unwrap();
    assert_eq!(masters.len(), 1);
    let master_uid = masters[0]["uid"].as_str().unwrap();
    assert_eq!(a.uid, master_uid);
    assert_eq!(b.parent_uid.as_deref(), Some(master_uid));
    assert_eq!(c.parent_uid.as_deref(), Some(master_uid));
}

#[tokio::test]
async fn alternating_topic_case_reuses_the_master() {
    let app = common::TestApp::new();
    let cancel = CancellationToken::new();
    app.llm.push_ok(common::syllabus_json("Rust Programming", &[&["Ownership", "Borrowing"]]));

    let syllabi = app.state.syllabus();
    let first = syllabi.get_or_create_syllabus("rust", "beginner", None, &cancel).await.unwrap();
    for topic in ["Rust", "RUST", "rust", "Rust Programming"] {
        let found = syllabi.get_or_create_syllabus(topic, "beginner", None, &cancel).await.unwrap();
        assert_eq!(found.uid, first.uid, "{topic}");
        assert_eq!(found.modules, first.modules);
        assert_eq!(found.user_entered_topic, "rust");
    }
    assert_eq!(app.llm.call_count(), 1);
    assert_eq!(app.store.count(Collection::Syllabi).await.unwrap(), 1);
}

#[tokio::test]
async fn feedback_iteration_keeps_identity_until_saved() {
    let app = common::TestApp::new();
    let cancel = CancellationToken::new();
    app.llm.push_ok(common::syllabus_json("Rust", &[&["Ownership", "Borrowing"]]));

    let syllabi = app.state.syllabus();
    let mut session = syllabi.start_session("rust", "beginner", Some("u1"), &cancel).await.unwrap();
    let master = session.syllabus.clone();
    assert!(master.is_master);
    assert_eq!(master.user_entered_topic, "rust");
    assert_eq!(master.total_lessons(), 2);

    assert_eq!(syllabi.save_syllabus(&mut session).await.unwrap(), SaveStatus::Skipped);

    app.llm.push_ok(common::syllabus_json("Rust", &[&["Ownership", "Borrowing", "Lifetimes"]]));
    let revised = syllabi.update_syllabus(&mut session, "add lifetimes", &cancel).await.unwrap();
    assert_eq!(revised.uid, master.uid);
    assert_eq!(revised.created_at, master.created_at);
    assert_eq!(revised.total_lessons(), 3);
    assert_eq!(session.iteration, 1);
    assert!(session.is_dirty());

    assert_eq!(syllabi.save_syllabus(&mut session).await.unwrap(), SaveStatus::Saved);
    let saved = session.syllabus.clone();
    assert_eq!(saved.user_id.as_deref(), Some("u1"));
    assert_eq!(saved.parent_uid.as_deref(), Some(master.uid.as_str()));

    // The master is untouched by the user's feedback.
    let stored_master = syllabi.versions().find_by_uid(&master.uid).await.unwrap().unwrap();
    assert_eq!(stored_master.total_lessons(), 2);

    let reopened = syllabi.get_or_create_syllabus("rust", "beginner", Some("u1"), &cancel).await.unwrap();
    assert_eq!(reopened.uid, saved.uid);
    assert_eq!(app.llm.call_count(), 2);
}

#[tokio::test]
async fn failed_generation_is_persisted_as_placeholder() {
    let app = common::TestApp::new();
    app.llm.push_ok("the model rambled without any structure");
    let syllabus = app
        .state
        .syllabus()
        .get_or_create_syllabus("Haskell", "advanced", None, &CancellationToken::new())
        .await
        .unwrap();
    assert!(syllabus.is_placeholder);
    assert!(syllabus.is_master);
    assert!(syllabus.total_lessons() > 0);
}

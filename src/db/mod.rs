pub mod config;
pub mod filter;
pub mod memory;
pub mod operations;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::db::config::DbConfig;

pub use filter::Filter;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Syllabi,
    LessonContents,
    UserProgress,
}

impl Collection {
    pub const fn as_str(self) -> &'static str {
        match self {
            Collection::Syllabi => "syllabi",
            Collection::LessonContents => "lesson_contents",
            Collection::UserProgress => "user_progress",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("document serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store initialization failed: {0}")]
    Init(String),
}

/// Key-addressable JSON document collections with predicate search.
///
/// Documents are returned in insertion order. There is no transactional
/// isolation: callers that read, mutate and write back must serialize on a
/// key themselves (see [`crate::cache::KeyedLocks`]).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, StoreError>;

    async fn find(&self, collection: Collection, filter: &Filter) -> Result<Vec<Value>, StoreError>;

    /// Inserts the document, or replaces the document already stored under `id`.
    async fn upsert(&self, collection: Collection, id: &str, doc: &Value) -> Result<(), StoreError>;

    async fn delete_where(&self, collection: Collection, filter: &Filter) -> Result<u64, StoreError>;

    async fn count(&self, collection: Collection) -> Result<u64, StoreError>;
}

pub async fn connect(config: &DbConfig) -> Result<Arc<dyn DocumentStore>, StoreError> {
    match config.database_url.as_deref() {
        Some(url) => {
            let store = SqliteStore::connect(url, config).await?;
            tracing::info!(url = %url, "sqlite document store ready");
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory document store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_store_is_object_safe() {
        fn _takes_boxed(_: Box<dyn DocumentStore>) {}
    }

    #[test]
    fn collection_names_are_distinct() {
        let names = [
            Collection::Syllabi.as_str(),
            Collection::LessonContents.as_str(),
            Collection::UserProgress.as_str(),
        ];
        assert_eq!(names.len(), names.iter().collect::<std::collections::HashSet<_>>().len());
    }
}

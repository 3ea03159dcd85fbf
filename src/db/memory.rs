use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use super::{Collection, DocumentStore, Filter, StoreError};

/// Process-local store used for tests and for running without a database.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<Collection, Vec<(String, Value)>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, StoreError> {
        let guard = self.collections.read();
        Ok(guard
            .get(&collection)
            .and_then(|docs| docs.iter().find(|(doc_id, _)| doc_id == id))
            .map(|(_, doc)| doc.clone()))
    }

    async fn find(&self, collection: Collection, filter: &Filter) -> Result<Vec<Value>, StoreError> {
        let guard = self.collections.read();
        Ok(guard
            .get(&collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, doc)| filter.matches(doc))
                    .map(|(_, doc)| doc.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn upsert(&self, collection: Collection, id: &str, doc: &Value) -> Result<(), StoreError> {
        let mut guard = self.collections.write();
        let docs = guard.entry(collection).or_default();
        match docs.iter_mut().find(|(doc_id, _)| doc_id == id) {
            Some((_, existing)) => *existing = doc.clone(),
            None => docs.push((id.to_string(), doc.clone())),
        }
        Ok(())
    }

    async fn delete_where(&self, collection: Collection, filter: &Filter) -> Result<u64, StoreError> {
        let mut guard = self.collections.write();
        let Some(docs) = guard.get_mut(&collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|(_, doc)| !filter.matches(doc));
        Ok((before - docs.len()) as u64)
    }

    async fn count(&self, collection: Collection) -> Result<u64, StoreError> {
        let guard = self.collections.read();
        Ok(guard.get(&collection).map_or(0, |docs| docs.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn upsert_replaces_in_place() {
        let store = MemoryStore::new();
        store.upsert(Collection::Syllabi, "a", &json!({"uid": "a", "v": 1})).await.unwrap();
        store.upsert(Collection::Syllabi, "b", &json!({"uid": "b", "v": 1})).await.unwrap();
        store.upsert(Collection::Syllabi, "a", &json!({"uid": "a", "v": 2})).await.unwrap();

        assert_eq!(store.count(Collection::Syllabi).await.unwrap(), 2);
        let all = store.find(Collection::Syllabi, &Filter::All).await.unwrap();
        assert_eq!(all[0]["v"], 2);
        assert_eq!(all[1]["uid"], "b");
    }

    #[tokio::test]
    async fn delete_where_counts_removed() {
        let store = MemoryStore::new();
        for (id, topic) in [("1", "rust"), ("2", "rust"), ("3", "go")] {
            store
                .upsert(Collection::Syllabi, id, &json!({"topic": topic}))
                .await
                .unwrap();
        }
        let removed = store
            .delete_where(Collection::Syllabi, &Filter::eq("topic", "rust"))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.count(Collection::Syllabi).await.unwrap(), 1);
        assert_eq!(store.count(Collection::UserProgress).await.unwrap(), 0);
    }
}

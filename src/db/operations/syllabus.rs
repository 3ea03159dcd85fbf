use crate::db::{Collection, DocumentStore, Filter, StoreError};
use crate::types::Syllabus;

use super::{decode, decode_all, encode};

/// `(topic ~ t OR user_entered_topic ~ t) AND level ~ l`, where `~` compares
/// case-insensitively.
///
/// Documents without a `level` field never match.
pub fn topic_level_filter(topic: &str, level: &str) -> Filter {
    Filter::And(vec![topic_filter(topic), Filter::eq_ignore_case("level", level)])
}

pub fn topic_filter(topic: &str) -> Filter {
    let topic = topic.trim();
    Filter::Or(vec![
        Filter::eq_ignore_case("topic", topic),
        Filter::eq_ignore_case("user_entered_topic", topic),
    ])
}

pub fn master_filter() -> Filter {
    Filter::And(vec![Filter::eq("is_master", true), Filter::is_null("user_id")])
}

pub fn user_filter(user_id: &str) -> Filter {
    Filter::eq("user_id", user_id)
}

pub async fn get_syllabus(
    store: &dyn DocumentStore,
    uid: &str,
) -> Result<Option<Syllabus>, StoreError> {
    store
        .get(Collection::Syllabi, uid)
        .await?
        .map(decode)
        .transpose()
}

pub async fn find_syllabi(
    store: &dyn DocumentStore,
    filter: &Filter,
) -> Result<Vec<Syllabus>, StoreError> {
    decode_all(store.find(Collection::Syllabi, filter).await?)
}

pub async fn find_first(
    store: &dyn DocumentStore,
    filter: &Filter,
) -> Result<Option<Syllabus>, StoreError> {
    Ok(find_syllabi(store, filter).await?.into_iter().next())
}

pub async fn find_master(
    store: &dyn DocumentStore,
    topic: &str,
    level: &str,
) -> Result<Option<Syllabus>, StoreError> {
    find_first(
        store,
        &Filter::And(vec![topic_level_filter(topic, level), master_filter()]),
    )
    .await
}

pub async fn find_user_syllabus(
    store: &dyn DocumentStore,
    topic: &str,
    level: &str,
    user_id: &str,
) -> Result<Option<Syllabus>, StoreError> {
    find_first(
        store,
        &Filter::And(vec![topic_level_filter(topic, level), user_filter(user_id)]),
    )
    .await
}

pub async fn put_syllabus(store: &dyn DocumentStore, syllabus: &Syllabus) -> Result<(), StoreError> {
    store
        .upsert(Collection::Syllabi, &syllabus.uid, &encode(syllabus)?)
        .await
}

pub async fn delete_syllabi(
    store: &dyn DocumentStore,
    topic: &str,
    level: &str,
) -> Result<u64, StoreError> {
    store
        .delete_where(Collection::Syllabi, &topic_level_filter(topic, level))
        .await
}

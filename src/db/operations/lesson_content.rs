use crate::db::{Collection, DocumentStore, StoreError};
use crate::types::LessonContent;

use super::{decode, encode};

pub async fn get_lesson_content(
    store: &dyn DocumentStore,
    lesson_uid: &str,
) -> Result<Option<LessonContent>, StoreError> {
    store
        .get(Collection::LessonContents, lesson_uid)
        .await?
        .map(decode)
        .transpose()
}

pub async fn put_lesson_content(
    store: &dyn DocumentStore,
    content: &LessonContent,
) -> Result<(), StoreError> {
    store
        .upsert(Collection::LessonContents, &content.lesson_uid, &encode(content)?)
        .await
}

use crate::db::{Collection, DocumentStore, StoreError};
use crate::types::UserProgress;

use super::{decode, encode};

pub async fn get_user_progress(
    store: &dyn DocumentStore,
    user_id: &str,
) -> Result<Option<UserProgress>, StoreError> {
    store
        .get(Collection::UserProgress, user_id)
        .await?
        .map(decode)
        .transpose()
}

pub async fn put_user_progress(
    store: &dyn DocumentStore,
    progress: &UserProgress,
) -> Result<(), StoreError> {
    store
        .upsert(Collection::UserProgress, &progress.user_id, &encode(progress)?)
        .await
}

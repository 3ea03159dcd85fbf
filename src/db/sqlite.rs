use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use super::config::DbConfig;
use super::{Collection, DocumentStore, Filter, StoreError};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS "documents" (
    "collection" TEXT NOT NULL,
    "id" TEXT NOT NULL,
    "body" TEXT NOT NULL,
    "createdAt" TEXT NOT NULL,
    "updatedAt" TEXT NOT NULL,
    PRIMARY KEY ("collection", "id")
)
"#;

/// JSON documents in a single SQLite table keyed by (collection, id).
///
/// Predicates are evaluated on the decoded body so that the same [`Filter`]
/// semantics hold for every backend.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(url: &str, config: &DbConfig) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Init(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(SCHEMA_SQL).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn load(&self, collection: Collection) -> Result<Vec<(String, Value)>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT "id", "body" FROM "documents" WHERE "collection" = ? ORDER BY rowid"#,
        )
        .bind(collection.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let id: String = row.try_get("id")?;
                let body: String = row.try_get("body")?;
                Ok((id, serde_json::from_str(&body)?))
            })
            .collect()
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, StoreError> {
        let body: Option<String> = sqlx::query_scalar(
            r#"SELECT "body" FROM "documents" WHERE "collection" = ? AND "id" = ?"#,
        )
        .bind(collection.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        body.map(|b| serde_json::from_str(&b).map_err(StoreError::from))
            .transpose()
    }

    async fn find(&self, collection: Collection, filter: &Filter) -> Result<Vec<Value>, StoreError> {
        Ok(self
            .load(collection)
            .await?
            .into_iter()
            .filter(|(_, doc)| filter.matches(doc))
            .map(|(_, doc)| doc)
            .collect())
    }

    async fn upsert(&self, collection: Collection, id: &str, doc: &Value) -> Result<(), StoreError> {
        let body = serde_json::to_string(doc)?;
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO "documents" ("collection", "id", "body", "createdAt", "updatedAt")
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT ("collection", "id") DO UPDATE SET
                "body" = excluded."body",
                "updatedAt" = excluded."updatedAt"
            "#,
        )
        .bind(collection.as_str())
        .bind(id)
        .bind(body)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_where(&self, collection: Collection, filter: &Filter) -> Result<u64, StoreError> {
        let ids: Vec<String> = self
            .load(collection)
            .await?
            .into_iter()
            .filter(|(_, doc)| filter.matches(doc))
            .map(|(id, _)| id)
            .collect();

        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for id in &ids {
            let result = sqlx::query(r#"DELETE FROM "documents" WHERE "collection" = ? AND "id" = ?"#)
                .bind(collection.as_str())
                .bind(id)
                .execute(&mut *tx)
                .await?;
            removed += result.rows_affected();
        }
        tx.commit().await?;
        Ok(removed)
    }

    async fn count(&self, collection: Collection) -> Result<u64, StoreError> {
        let count: i64 =
            sqlx::query_scalar(r#"SELECT COUNT(*) FROM "documents" WHERE "collection" = ?"#)
                .bind(collection.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }
}

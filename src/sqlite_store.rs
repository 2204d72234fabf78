//! SQLite-backed [`ArtifactStore`].
//!
//! The `uq_artifact_hash_model` unique constraint is the arbiter for
//! concurrent submissions of identical content: the losing `INSERT` fails
//! with a unique violation, which is reported as [`Error::Conflict`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use refinery_core::embedding::{blob_to_vec, vec_to_blob};
use refinery_core::models::{ArtifactRecord, CacheKey, ContentDigest, ModelDigest};
use refinery_core::store::ArtifactStore;
use refinery_core::{Error, Result};

const SELECT_COLUMNS: &str = "SELECT id, content_hash, model_hash, filename, display_name, \
     created_at, parsed_json, vector FROM artifacts";

/// SQLite implementation of [`ArtifactStore`] over the `artifacts` table.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn store_err(err: sqlx::Error) -> Error {
    Error::Store(err.to_string())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn encode_parsed(record: &ArtifactRecord) -> Option<String> {
    record.parsed.as_ref().map(|v| v.to_string())
}

fn row_to_record(row: &SqliteRow) -> Result<ArtifactRecord> {
    let created_at: i64 = row.get("created_at");
    let created_at = DateTime::<Utc>::from_timestamp(created_at, 0)
        .ok_or_else(|| Error::Store(format!("invalid created_at: {}", created_at)))?;
    let parsed_json: Option<String> = row.get("parsed_json");
    let parsed = parsed_json
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| Error::Store(format!("corrupt parsed_json: {}", e)))?;
    let vector: Option<Vec<u8>> = row.get("vector");

    Ok(ArtifactRecord {
        id: row.get("id"),
        content_hash: ContentDigest::from_hex(row.get::<String, _>("content_hash")),
        model_hash: ModelDigest::from_hex(row.get::<String, _>("model_hash")),
        filename: row.get("filename"),
        display_name: row.get("display_name"),
        created_at,
        parsed,
        vector: vector.map(|b| blob_to_vec(&b)),
    })
}

#[async_trait]
impl ArtifactStore for SqliteStore {
    async fn find_by_key(&self, key: &CacheKey) -> Result<Option<ArtifactRecord>> {
        let row = sqlx::query(&format!(
            "{} WHERE content_hash = ? AND model_hash = ?",
            SELECT_COLUMNS
        ))
        .bind(key.content.as_str())
        .bind(key.model.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn insert(&self, record: &ArtifactRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO artifacts (id, content_hash, model_hash, filename, display_name,
                                   created_at, parsed_json, vector)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(record.content_hash.as_str())
        .bind(record.model_hash.as_str())
        .bind(&record.filename)
        .bind(&record.display_name)
        .bind(record.created_at.timestamp())
        .bind(encode_parsed(record))
        .bind(record.vector.as_deref().map(vec_to_blob))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(Error::Conflict(record.key().to_string())),
            Err(e) => Err(store_err(e)),
        }
    }

    async fn supersede(&self, stale: &ArtifactRecord, fresh: &ArtifactRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE artifacts SET
                filename = ?,
                display_name = ?,
                created_at = ?,
                parsed_json = ?,
                vector = ?
            WHERE id = ? AND created_at = ?
            "#,
        )
        .bind(&fresh.filename)
        .bind(&fresh.display_name)
        .bind(fresh.created_at.timestamp())
        .bind(encode_parsed(fresh))
        .bind(fresh.vector.as_deref().map(vec_to_blob))
        .bind(&stale.id)
        .bind(stale.created_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::Conflict(stale.key().to_string()));
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<ArtifactRecord>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn list(&self) -> Result<Vec<ArtifactRecord>> {
        let rows = sqlx::query(&format!(
            "{} ORDER BY created_at DESC, id ASC",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter().map(row_to_record).collect()
    }

    async fn rename(
        &self,
        id: &str,
        display_name: Option<&str>,
    ) -> Result<Option<ArtifactRecord>> {
        let result = sqlx::query("UPDATE artifacts SET display_name = ? WHERE id = ?")
            .bind(display_name)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get(id).await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM artifacts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM artifacts")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(n as usize)
    }
}

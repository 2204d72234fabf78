use anyhow::Result;
use sqlx::SqlitePool;

/// Create the schema. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS artifacts (
            id TEXT PRIMARY KEY,
            content_hash TEXT NOT NULL,
            model_hash TEXT NOT NULL,
            filename TEXT NOT NULL,
            display_name TEXT,
            created_at INTEGER NOT NULL,
            parsed_json TEXT,
            vector BLOB,
            CONSTRAINT uq_artifact_hash_model UNIQUE(content_hash, model_hash)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_artifacts_created_at ON artifacts(created_at DESC)")
        .execute(pool)
        .await?;

    tracing::debug!("schema migrations applied");
    Ok(())
}

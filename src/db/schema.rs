//! Database schema

use sqlx::SqlitePool;

use crate::error::Result;

/// Create tables that do not exist yet
pub async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS import_status (
            key TEXT PRIMARY KEY,
            stage INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_import_status_updated ON import_status(updated_at);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

//! Import Status Store
//!
//! Persists the current [`Stage`] of every upload key so that progress can
//! be queried across independent requests:
//! - In-memory storage with timestamped entries and periodic cleanup
//! - SQLite storage for deployments that need statuses to survive restarts

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio::sync::RwLock;

use super::types::Stage;
use crate::course::CourseLikeKey;

// ============================================================================
// Status Key
// ============================================================================

/// Identifies one upload: the caller's session plus target and file name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatusKey {
    pub session: String,
    pub target: String,
    pub filename: String,
}

impl StatusKey {
    pub fn new(session: &str, target: &CourseLikeKey, filename: &str) -> Self {
        Self {
            session: session.to_string(),
            target: target.to_string(),
            filename: filename.to_string(),
        }
    }
}

impl fmt::Display for StatusKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}{}", self.session, self.target, self.filename)
    }
}

/// Status store errors
#[derive(Debug, thiserror::Error)]
pub enum StatusStoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

// ============================================================================
// Status Store Trait
// ============================================================================

/// Storage for import stages
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Current stage; unknown keys report [`Stage::NONE`]
    async fn get(&self, key: &StatusKey) -> Result<Stage, StatusStoreError>;

    /// Record a stage
    async fn set(&self, key: &StatusKey, stage: Stage) -> Result<(), StatusStoreError>;
}

// ============================================================================
// Memory Status Store
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct StatusEntry {
    stage: Stage,
    updated_at: DateTime<Utc>,
}

/// Status store kept in process memory
#[derive(Clone, Default)]
pub struct MemoryStatusStore {
    entries: Arc<RwLock<HashMap<String, StatusEntry>>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked keys
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drop entries not updated for `hours`
    ///
    /// Returns the number of entries removed
    pub async fn cleanup_older_than(&self, hours: i64) -> usize {
        let cutoff = Utc::now() - chrono::Duration::hours(hours);
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.updated_at >= cutoff);
        let removed = before - entries.len();

        if removed > 0 {
            tracing::info!(count = removed, "Cleaned up stale import statuses");
        }
        removed
    }

    /// Start background cleanup task dropping entries older than `max_age_hours`
    pub fn start_cleanup_task(self, max_age_hours: i64) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(300)); // 5 minutes

            loop {
                interval.tick().await;
                self.cleanup_older_than(max_age_hours).await;
            }
        })
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn get(&self, key: &StatusKey) -> Result<Stage, StatusStoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(&key.to_string())
            .map(|entry| entry.stage)
            .unwrap_or_default())
    }

    async fn set(&self, key: &StatusKey, stage: Stage) -> Result<(), StatusStoreError> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            StatusEntry {
                stage,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }
}

// ============================================================================
// SQLite Status Store
// ============================================================================

/// Status store persisted in the `import_status` table
#[derive(Clone)]
pub struct SqliteStatusStore {
    pool: SqlitePool,
}

impl SqliteStatusStore {
    /// Wrap a pool whose schema has been initialized
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Drop entries not updated for `hours`
    pub async fn cleanup_older_than(&self, hours: i64) -> Result<u64, StatusStoreError> {
        let cutoff = (Utc::now() - chrono::Duration::hours(hours)).to_rfc3339();
        let result = sqlx::query("DELETE FROM import_status WHERE updated_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Start background cleanup task dropping entries older than `max_age_hours`
    pub fn start_cleanup_task(self, max_age_hours: i64) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(300)); // 5 minutes

            loop {
                interval.tick().await;
                match self.cleanup_older_than(max_age_hours).await {
                    Ok(0) => {}
                    Ok(count) => tracing::info!(count = count, "Cleaned up stale import statuses"),
                    Err(e) => tracing::warn!(error = %e, "Import status cleanup failed"),
                }
            }
        })
    }
}

#[async_trait]
impl StatusStore for SqliteStatusStore {
    async fn get(&self, key: &StatusKey) -> Result<Stage, StatusStoreError> {
        let stage: Option<i64> = sqlx::query_scalar("SELECT stage FROM import_status WHERE key = ?")
            .bind(key.to_string())
            .fetch_optional(&self.pool)
            .await?;

        Ok(stage
            .map(|code| Stage::from_code(code.clamp(i8::MIN as i64, i8::MAX as i64) as i8))
            .unwrap_or_default())
    }

    async fn set(&self, key: &StatusKey, stage: Stage) -> Result<(), StatusStoreError> {
        sqlx::query(
            r#"
            INSERT INTO import_status (key, stage, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                stage = excluded.stage,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key.to_string())
        .bind(stage.code() as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// ============================================================================
// Stage Tracker
// ============================================================================

/// Records stage transitions of a single upload key
///
/// The stage is always re-read from the store; uploads can be retried across
/// independent requests.
#[derive(Clone)]
pub struct StageTracker {
    store: Arc<dyn StatusStore>,
    key: StatusKey,
}

impl StageTracker {
    pub fn new(store: Arc<dyn StatusStore>, key: StatusKey) -> Self {
        Self { store, key }
    }

    pub async fn current(&self) -> Result<Stage, StatusStoreError> {
        self.store.get(&self.key).await
    }

    pub async fn set(&self, stage: Stage) -> Result<(), StatusStoreError> {
        tracing::debug!(key = %self.key, stage = stage.code(), "Import stage changed");
        self.store.set(&self.key, stage).await
    }

    /// Mark the import as failed at whatever stage it last reached
    pub async fn fail(&self) -> Result<Stage, StatusStoreError> {
        let failed = self.current().await?.failed();
        self.set(failed).await?;
        Ok(failed)
    }
}

// ============================================================================
// Tests
// ============================================================================

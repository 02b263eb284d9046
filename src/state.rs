//! Application state management

use std::sync::Arc;

use crate::access::{AccessPolicy, StaffRoster};
use crate::config::Config;
use crate::db;
use crate::export::ExportPipeline;
use crate::import::ImportPipeline;
use crate::store::{CourseStore, MemoryCourseStore};
use crate::upload::{MemoryStatusStore, SqliteStatusStore, StagingSweeper, StatusStore, UploadLocks};

/// Error type for state initialization
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Failed to initialize database: {0}")]
    Database(#[from] crate::error::AppError),
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    locks: UploadLocks,
    imports: ImportPipeline,
    exports: ExportPipeline,
}

impl AppState {
    /// Wire the pipelines around the given collaborators
    pub fn new(
        config: Config,
        store: Arc<dyn CourseStore>,
        statuses: Arc<dyn StatusStore>,
        access: Arc<dyn AccessPolicy>,
    ) -> Self {
        let locks = UploadLocks::new();
        let imports = ImportPipeline::new(
            config.storage.data_root.clone(),
            store.clone(),
            statuses,
            locks.clone(),
            access.clone(),
        );
        let exports = ExportPipeline::new(store, access);

        Self {
            inner: Arc::new(AppStateInner {
                config,
                locks,
                imports,
                exports,
            }),
        }
    }

    /// Build state from configuration
    ///
    /// Statuses go to SQLite when a database URL is configured. Status
    /// cleanup tasks are started here, so call this inside a runtime.
    pub async fn from_config(config: Config) -> Result<Self, StateError> {
        let max_age_hours = config.storage.staging_max_age_hours;
        let statuses: Arc<dyn StatusStore> = match &config.database.url {
            Some(url) => {
                let pool = db::create_pool(url).await?;
                tracing::info!("Import statuses stored in {}", url);
                let store = SqliteStatusStore::new(pool);
                store.clone().start_cleanup_task(max_age_hours);
                Arc::new(store)
            }
            None => {
                let store = MemoryStatusStore::new();
                store.clone().start_cleanup_task(max_age_hours);
                Arc::new(store)
            }
        };

        let access = StaffRoster::new(config.access.staff_users.clone())
            .with_allow_all(config.access.allow_all_authors);

        Ok(Self::new(
            config,
            Arc::new(MemoryCourseStore::new()),
            statuses,
            Arc::new(access),
        ))
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn imports(&self) -> &ImportPipeline {
        &self.inner.imports
    }

    pub fn exports(&self) -> &ExportPipeline {
        &self.inner.exports
    }

    /// Sweeper for staging directories abandoned by unfinished uploads
    pub fn staging_sweeper(&self) -> StagingSweeper {
        StagingSweeper::new(
            self.inner.config.storage.data_root.clone(),
            self.inner.locks.clone(),
            self.inner.config.storage.staging_max_age_hours,
        )
    }
}

//! Staging directories
//!
//! - [`StagingDir`] removes a staging directory once the upload ends; the
//!   async [`StagingDir::cleanup`] on normal exits, `Drop` on anything else
//! - [`UploadLocks`] allows one active request per staging directory
//! - [`StagingSweeper`] removes directories left behind by abandoned uploads

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

// ============================================================================
// Staging Directory Guard
// ============================================================================

/// Scratch directory removed on drop
#[derive(Debug)]
pub struct StagingDir {
    path: PathBuf,
    label: String,
    keep: bool,
}

impl StagingDir {
    /// Create the directory (if needed) and arm the guard
    pub async fn create(path: impl Into<PathBuf>, label: impl Into<String>) -> std::io::Result<Self> {
        let path = path.into();
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self {
            path,
            label: label.into(),
            keep: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Leave the directory in place; more chunks will follow
    pub fn keep(mut self) {
        self.keep = true;
    }

    /// Remove the directory without blocking the runtime and disarm the guard
    pub async fn cleanup(mut self) {
        self.keep = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => tracing::info!("Course import {}: Temp data cleared", self.label),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => self.log_failure(&e),
        }
    }

    fn log_failure(&self, e: &std::io::Error) {
        tracing::warn!(
            path = %self.path.display(),
            error = %e,
            "Failed to remove staging directory"
        );
    }
}

/// Fallback for exits that never reach `cleanup` (panics, dropped futures)
impl Drop for StagingDir {
    fn drop(&mut self) {
        if self.keep || !self.path.exists() {
            return;
        }

        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => tracing::info!("Course import {}: Temp data cleared", self.label),
            Err(e) => self.log_failure(&e),
        }
    }
}

// ============================================================================
// Upload Locks
// ============================================================================

/// Advisory locks keyed by staging directory name
#[derive(Clone, Default)]
pub struct UploadLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl UploadLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `key`, or `None` if another request holds it
    pub fn try_acquire(&self, key: &str) -> Option<UploadLock> {
        let mut held = self.held.lock();
        if !held.insert(key.to_string()) {
            return None;
        }
        Some(UploadLock {
            key: key.to_string(),
            held: self.held.clone(),
        })
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.held.lock().contains(key)
    }
}

/// Held lock; released on drop
#[derive(Debug)]
pub struct UploadLock {
    key: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl Drop for UploadLock {
    fn drop(&mut self) {
        self.held.lock().remove(&self.key);
    }
}

// ============================================================================
// Staging Sweeper
// ============================================================================

/// Removes staging directories with no activity for a while
#[derive(Clone)]
pub struct StagingSweeper {
    data_root: PathBuf,
    locks: UploadLocks,
    max_age_hours: i64,
}

impl StagingSweeper {
    pub fn new(data_root: PathBuf, locks: UploadLocks, max_age_hours: i64) -> Self {
        Self {
            data_root,
            locks,
            max_age_hours,
        }
    }

    /// Remove stale, unlocked staging directories
    ///
    /// Returns the number of directories removed
    pub async fn sweep(&self) -> usize {
        let cutoff = Utc::now() - chrono::Duration::hours(self.max_age_hours);
        let mut entries = match tokio::fs::read_dir(&self.data_root).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(error = %e, "Data root not readable, nothing to sweep");
                return 0;
            }
        };

        let mut removed = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };

            // Hold the lock while deleting so an upload cannot start underneath
            let Some(_lock) = self.locks.try_acquire(&name) else {
                continue;
            };

            match last_activity(&path).await {
                Some(last) if last < cutoff => {}
                _ => continue,
            }

            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {
                    removed += 1;
                    tracing::debug!(path = %path.display(), "Removed abandoned staging directory");
                }
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to remove abandoned staging directory"
                ),
            }
        }

        if removed > 0 {
            tracing::info!(count = removed, "Cleaned up abandoned staging directories");
        }
        removed
    }

    /// Start background sweep task
    pub fn start_cleanup_task(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(300)); // 5 minutes

            loop {
                interval.tick().await;
                self.sweep().await;
            }
        })
    }
}

/// Newest modification time of a directory and its direct children
async fn last_activity(dir: &Path) -> Option<DateTime<Utc>> {
    let mut newest: DateTime<Utc> = tokio::fs::metadata(dir).await.ok()?.modified().ok()?.into();

    if let Ok(mut entries) = tokio::fs::read_dir(dir).await {
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Some(modified) = entry
                .metadata()
                .await
                .ok()
                .and_then(|metadata| metadata.modified().ok())
            {
                newest = newest.max(modified.into());
            }
        }
    }

    Some(newest)
}

// ============================================================================
// Tests
// ============================================================================

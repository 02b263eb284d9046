//! Course import pipeline
//!
//! Drives one upload request through receive → extract → locate → load.
//! Every request for a given (session, target, file name) shares a stage
//! record in the status store; the staging directory is removed whenever
//! the upload reaches a terminal stage.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Bytes;

use super::error::{ImportError, ImportFailure};
use crate::access::{AccessPolicy, Requester};
use crate::archive::{find_descriptor_dir, ArchiveExtractor};
use crate::course::{CourseLikeKey, Location, COURSE_DESCRIPTOR};
use crate::store::{CourseStore, StoreError};
use crate::upload::{
    ByteRange, ChunkProgress, ChunkReceiver, Stage, StageTracker, StagingDir, StatusKey,
    StatusStore, UploadError, UploadLocks, UploadSession, ARCHIVE_SUFFIX,
};

/// One chunk of an archive upload
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub target: CourseLikeKey,
    pub file_name: String,

    /// Raw `Content-Range` header, if the client sent one
    pub content_range: Option<String>,

    pub payload: Bytes,
    pub requester: Requester,
}

/// Successful outcome of one import request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    /// Chunk stored, more expected
    ChunkAccepted { name: String, size: u64 },

    /// The final chunk was sent again; nothing was done
    Replayed { stage: Stage },

    /// The archive was loaded into the store
    Imported { root: Location },
}

/// Imports uploaded course archives into the course store
#[derive(Clone)]
pub struct ImportPipeline {
    data_root: PathBuf,
    store: Arc<dyn CourseStore>,
    statuses: Arc<dyn StatusStore>,
    locks: UploadLocks,
    access: Arc<dyn AccessPolicy>,
}

impl ImportPipeline {
    pub fn new(
        data_root: PathBuf,
        store: Arc<dyn CourseStore>,
        statuses: Arc<dyn StatusStore>,
        locks: UploadLocks,
        access: Arc<dyn AccessPolicy>,
    ) -> Self {
        Self {
            data_root,
            store,
            statuses,
            locks,
            access,
        }
    }

    fn tracker(&self, session: &str, target: &CourseLikeKey, file_name: &str) -> StageTracker {
        StageTracker::new(self.statuses.clone(), StatusKey::new(session, target, file_name))
    }

    fn authorize(&self, requester: &Requester, target: &CourseLikeKey) -> Result<(), ImportError> {
        if self.access.has_author_access(&requester.user_id, target) {
            Ok(())
        } else {
            tracing::warn!(user = %requester.user_id, course = %target, "Import denied");
            Err(ImportError::Forbidden(target.to_string()))
        }
    }

    /// Current stage of an upload
    pub async fn status(
        &self,
        requester: &Requester,
        target: &CourseLikeKey,
        file_name: &str,
    ) -> Result<Stage, ImportError> {
        self.authorize(requester, target)?;
        Ok(self.tracker(&requester.session_id, target, file_name).current().await?)
    }

    /// Handle one upload request
    pub async fn import(&self, request: ImportRequest) -> Result<ImportOutcome, ImportFailure> {
        let ImportRequest {
            target,
            file_name,
            content_range,
            payload,
            requester,
        } = request;

        self.authorize(&requester, &target)
            .map_err(|e| ImportFailure::new(e, None))?;

        let tracker = self.tracker(&requester.session_id, &target, &file_name);

        if !file_name.ends_with(ARCHIVE_SUFFIX) {
            return Err(reject(&tracker, ImportError::UnsupportedFile(file_name)).await);
        }
        if !is_plain_file_name(&file_name) {
            return Err(reject(&tracker, UploadError::InvalidFileName(file_name).into()).await);
        }
        let range = match ByteRange::from_header(content_range.as_deref()) {
            Ok(range) => range,
            Err(e) => return Err(reject(&tracker, e.into()).await),
        };

        // Replays of the final chunk are answered from the status store alone
        if !range.is_first() && range.is_final() {
            let stage = tracker
                .current()
                .await
                .map_err(|e| ImportFailure::new(e, None))?;
            if stage != Stage::NONE {
                tracing::debug!(course = %target, stage = stage.code(), "Final chunk replayed");
                return Ok(ImportOutcome::Replayed { stage });
            }
        }

        let session = UploadSession::new(target, file_name, &self.data_root);
        let lock_key = session.target.staging_dir_name();
        let Some(_lock) = self.locks.try_acquire(&lock_key) else {
            tracing::warn!(course = %session.target, "Concurrent upload rejected");
            return Err(ImportFailure::new(ImportError::Conflict(lock_key), None));
        };

        if range.is_first() {
            tracker
                .set(Stage::NONE)
                .await
                .map_err(|e| ImportFailure::new(e, None))?;
        }

        let staging = match StagingDir::create(&session.staging_dir, session.target.to_string()).await {
            Ok(staging) => staging,
            Err(e) => return Err(reject(&tracker, e.into()).await),
        };

        tracing::debug!(
            course = %session.target,
            archive = %session.archive_path.display(),
            "Importing course archive"
        );

        let receiver = ChunkReceiver::new(&session.archive_path);
        let progress = match receiver.receive(&range, &payload).await {
            Ok(progress) => progress,
            Err(e) => {
                tracing::warn!(course = %session.target, error = %e, "Course upload failed");
                staging.cleanup().await;
                return Err(reject(&tracker, e.into()).await);
            }
        };

        match progress {
            ChunkProgress::Partial { size } => {
                staging.keep();
                Ok(ImportOutcome::ChunkAccepted {
                    name: session.file_name,
                    size,
                })
            }
            ChunkProgress::ReplayedFinal { .. } => {
                staging.keep();
                let stage = tracker
                    .current()
                    .await
                    .map_err(|e| ImportFailure::new(e, None))?;
                Ok(ImportOutcome::Replayed { stage })
            }
            ChunkProgress::Complete { size } => {
                tracing::debug!(course = %session.target, size, "Archive assembled");
                let result = self
                    .process_archive(&session, &tracker, &requester, &staging)
                    .await;
                staging.cleanup().await;

                match result {
                    Ok(root) => Ok(ImportOutcome::Imported { root }),
                    Err(error) => {
                        tracing::error!(
                            course = %session.target,
                            error = %error,
                            "Error importing course"
                        );
                        let stage = match tracker.fail().await {
                            Ok(stage) => Some(stage),
                            Err(e) => {
                                tracing::warn!(error = %e, "Failed to record import failure");
                                None
                            }
                        };
                        Err(ImportFailure::new(error, stage))
                    }
                }
            }
        }
    }

    /// Extract, locate and load a fully received archive
    async fn process_archive(
        &self,
        session: &UploadSession,
        tracker: &StageTracker,
        requester: &Requester,
        staging: &StagingDir,
    ) -> Result<Location, ImportError> {
        let target = &session.target;

        tracing::info!("Course import {}: Upload complete", target);
        tracker.set(Stage::UPLOADED).await?;

        let extractor = ArchiveExtractor::new(staging.path());
        if let Err(e) = extractor.extract(&session.archive_path).await {
            tracker.set(Stage::UPLOAD_FAILED).await?;
            return Err(e.into());
        }

        tracing::info!("Course import {}: Uploaded file extracted", target);
        tracker.set(Stage::EXTRACTED).await?;

        let search_root = staging.path().to_path_buf();
        let found = tokio::task::spawn_blocking(move || find_descriptor_dir(&search_root, COURSE_DESCRIPTOR))
            .await
            .map_err(std::io::Error::other)?;
        let Some(descriptor_dir) = found else {
            tracker.set(Stage::DESCRIPTOR_MISSING).await?;
            return Err(ImportError::DescriptorMissing);
        };

        let relative = descriptor_dir
            .strip_prefix(&self.data_root)
            .map(Path::to_path_buf)
            .map_err(|_| {
                std::io::Error::other(format!(
                    "{} is outside the data root",
                    descriptor_dir.display()
                ))
            })?;
        tracing::debug!(course = %target, dir = %relative.display(), "Found course.xml");

        tracing::info!("Course import {}: Extracted file verified", target);
        tracker.set(Stage::VERIFIED).await?;

        let roots = self
            .store
            .import_from_xml(&self.data_root, &[relative], &requester.user_id, target)
            .await?;
        let root = roots
            .into_iter()
            .next()
            .map(|block| block.location)
            .ok_or_else(|| StoreError::InvalidContent("no course was created".to_string()))?;

        tracing::debug!(course = %target, location = %root, "New course created");
        tracing::info!("Course import {}: Course import successful", target);
        tracker.set(Stage::IMPORTED).await?;

        Ok(root)
    }
}

/// Record an upload failure (stage -1) and build the response
async fn reject(tracker: &StageTracker, error: ImportError) -> ImportFailure {
    match tracker.set(Stage::UPLOAD_FAILED).await {
        Ok(()) => ImportFailure::new(error, Some(Stage::UPLOAD_FAILED)),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to record upload failure");
            ImportFailure::new(error, None)
        }
    }
}

/// A bare file name, no directory parts
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

// ============================================================================
// Tests
// ============================================================================

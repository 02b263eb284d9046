//! Course export pipeline

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::{NamedTempFile, TempDir};

use super::error::{ExportError, ExportErrorPayload};
use crate::access::{AccessPolicy, Requester};
use crate::archive::pack_directory;
use crate::course::{CourseLikeKey, Location};
use crate::store::{CourseStore, StoreError};
use crate::upload::ARCHIVE_SUFFIX;

/// Content type of exported archives
pub const EXPORT_CONTENT_TYPE: &str = "application/x-tgz";

/// A packed export, deleted when dropped
#[derive(Debug)]
pub struct ExportedArchive {
    pub file: NamedTempFile,

    /// `{name}.{random}.tar.gz`
    pub file_name: String,

    pub size: u64,
}

impl ExportedArchive {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Failure while writing the archive
#[derive(Debug, thiserror::Error)]
enum PackError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Exports courses and libraries as tarballs
#[derive(Clone)]
pub struct ExportPipeline {
    store: Arc<dyn CourseStore>,
    access: Arc<dyn AccessPolicy>,
}

impl ExportPipeline {
    pub fn new(store: Arc<dyn CourseStore>, access: Arc<dyn AccessPolicy>) -> Self {
        Self { store, access }
    }

    /// Export a course or library
    pub async fn export(
        &self,
        key: &CourseLikeKey,
        requester: &Requester,
    ) -> Result<ExportedArchive, ExportError> {
        if !self.access.has_author_access(&requester.user_id, key) {
            tracing::warn!(user = %requester.user_id, course = %key, "Export denied");
            return Err(ExportError::Forbidden(key.to_string()));
        }

        let root = if key.is_library() {
            self.store.get_library(key).await
        } else {
            self.store.get_course(key).await
        };
        let root = match root {
            Ok(Some(root)) => root,
            Ok(None) => return Err(ExportError::NotFound(key.to_string())),
            Err(e) => {
                tracing::error!(course = %key, error = %e, "There was an error exporting course");
                return Err(ExportError::Failed(ExportErrorPayload::generic(
                    key.to_string(),
                    e.to_string(),
                )));
            }
        };
        let name = root.url_name().to_string();

        match self.write_archive(key, &name).await {
            Ok(archive) => {
                tracing::info!(
                    course = %key,
                    file_name = %archive.file_name,
                    size = archive.size,
                    "Course exported"
                );
                Ok(archive)
            }
            Err(PackError::Store(StoreError::Serialization { location, message })) => {
                tracing::error!(
                    course = %key,
                    location = %location,
                    error = %message,
                    "There was an error exporting course"
                );
                let (failed_module, unit) = self.locate_failure(&location).await;
                Err(ExportError::Failed(ExportErrorPayload::for_item(
                    root.location.to_string(),
                    message,
                    failed_module.map(|l| l.to_string()),
                    unit.map(|l| l.to_string()),
                )))
            }
            Err(e) => {
                tracing::error!(course = %key, error = %e, "There was an error exporting course");
                Err(ExportError::Failed(ExportErrorPayload::generic(name, e.to_string())))
            }
        }
    }

    /// Serialize to a scratch directory and pack it
    ///
    /// The scratch directory is removed when this returns, on every path.
    async fn write_archive(&self, key: &CourseLikeKey, name: &str) -> Result<ExportedArchive, PackError> {
        let root_dir = TempDir::new()?;
        self.store.export_to_xml(key, root_dir.path(), name).await?;

        let export_file = tempfile::Builder::new()
            .prefix(&format!("{}.", name))
            .suffix(ARCHIVE_SUFFIX)
            .tempfile()?;

        let source: PathBuf = root_dir.path().join(name);
        let output = export_file.path().to_path_buf();
        let arcname = name.to_string();
        tracing::debug!(output = %output.display(), "tar file being generated");

        let size = tokio::task::spawn_blocking(move || pack_directory(&source, &arcname, &output))
            .await
            .map_err(std::io::Error::other)??;

        let file_name = export_file
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}{}", name, ARCHIVE_SUFFIX));

        Ok(ExportedArchive {
            file: export_file,
            file_name,
            size,
        })
    }

    /// Failing block and, if its parent is a leaf container, that unit
    ///
    /// Lookups are best effort; a failed lookup leaves the rest empty.
    async fn locate_failure(&self, location: &Location) -> (Option<Location>, Option<Location>) {
        let Ok(item) = self.store.get_item(location).await else {
            return (None, None);
        };

        let unit = match self.store.get_parent_location(&item.location).await {
            Ok(Some(parent)) => match self.store.get_item(&parent).await {
                Ok(parent) if parent.location.is_leaf_container() => Some(parent.location),
                _ => None,
            },
            _ => None,
        };

        (Some(item.location), unit)
    }
}

// ============================================================================
// Tests
// ============================================================================

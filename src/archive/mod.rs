//! Course archive handling
//!
//! - [`safety`]: validation and extraction of untrusted gzip tarballs
//! - [`locate`]: finding the course descriptor inside an extracted tree
//! - [`package`]: packing an exported course back into a tarball

pub mod locate;
pub mod package;
pub mod safety;

use std::path::{Path, PathBuf};

use thiserror::Error;

pub use locate::{archive_files, find_descriptor_dir, ArchiveFiles};
pub use package::pack_directory;
pub use safety::safe_extract_all;

/// Archive extraction errors
#[derive(Error, Debug)]
pub enum ExtractError {
    /// A member would land outside the extraction directory
    #[error("Unsafe tar file. Aborting import.")]
    Suspicious(String),

    #[error("Invalid course archive: {0}")]
    InvalidArchive(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractError {
    /// Operator-facing detail for rejected archives
    pub fn suspicious_operation(&self) -> Option<&str> {
        match self {
            ExtractError::Suspicious(detail) => Some(detail),
            _ => None,
        }
    }
}

/// Extracts staged archives into their staging directory
#[derive(Debug, Clone)]
pub struct ArchiveExtractor {
    destination: PathBuf,
}

impl ArchiveExtractor {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
        }
    }

    /// Validate and extract `archive_path` on the blocking pool
    pub async fn extract(&self, archive_path: &Path) -> Result<usize, ExtractError> {
        let archive_path = archive_path.to_path_buf();
        let destination = self.destination.clone();

        let written = tokio::task::spawn_blocking(move || safe_extract_all(&archive_path, &destination))
            .await
            .map_err(|e| ExtractError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

        tracing::debug!(
            destination = %self.destination.display(),
            members = written,
            "Extracted course archive"
        );
        Ok(written)
    }
}

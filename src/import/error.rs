//! Import error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::archive::ExtractError;
use crate::store::StoreError;
use crate::upload::{Stage, StatusStoreError, UploadError};

/// Import pipeline errors
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Author access to {0} denied")]
    Forbidden(String),

    #[error("We only support uploading a .tar.gz file.")]
    UnsupportedFile(String),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("Another upload for this course is in progress. Please try again")]
    Conflict(String),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("Could not find the course.xml file in the package.")]
    DescriptorMissing,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Import status unavailable: {0}")]
    Status(#[from] StatusStoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ImportError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ImportError::Forbidden(_) => StatusCode::FORBIDDEN,
            ImportError::UnsupportedFile(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ImportError::Upload(UploadError::Corrupted { .. }) => StatusCode::CONFLICT,
            ImportError::Upload(_) => StatusCode::BAD_REQUEST,
            ImportError::Conflict(_) => StatusCode::CONFLICT,
            ImportError::Extract(_) => StatusCode::BAD_REQUEST,
            ImportError::DescriptorMissing => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ImportError::Store(_) => StatusCode::BAD_REQUEST,
            ImportError::Status(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ImportError::Io(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ImportError::Forbidden(_) => "FORBIDDEN",
            ImportError::UnsupportedFile(_) => "UNSUPPORTED_FILE",
            ImportError::Upload(UploadError::InvalidRange(_)) => "INVALID_RANGE",
            ImportError::Upload(UploadError::Corrupted { .. }) => "UPLOAD_CORRUPTED",
            ImportError::Upload(UploadError::InvalidFileName(_)) => "INVALID_FILE_NAME",
            ImportError::Upload(UploadError::Storage(_)) => "STORAGE_ERROR",
            ImportError::Conflict(_) => "UPLOAD_IN_PROGRESS",
            ImportError::Extract(ExtractError::Suspicious(_)) => "UNSAFE_ARCHIVE",
            ImportError::Extract(_) => "INVALID_ARCHIVE",
            ImportError::DescriptorMissing => "DESCRIPTOR_MISSING",
            ImportError::Store(_) => "IMPORT_FAILED",
            ImportError::Status(_) => "STATUS_ERROR",
            ImportError::Io(_) => "IO_ERROR",
        }
    }
}

/// An import error together with the stage it left the upload in
#[derive(Debug)]
pub struct ImportFailure {
    pub error: ImportError,

    /// `None` when the failure did not touch the upload's stage
    pub stage: Option<Stage>,
}

impl ImportFailure {
    pub fn new(error: impl Into<ImportError>, stage: Option<Stage>) -> Self {
        Self {
            error: error.into(),
            stage,
        }
    }
}

impl std::fmt::Display for ImportFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.stage {
            Some(stage) => write!(f, "{} (stage {})", self.error, stage),
            None => write!(f, "{}", self.error),
        }
    }
}

#[derive(Serialize)]
struct ImportErrorResponse {
    error_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<Stage>,
    code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    suspicious_operation_message: Option<String>,
}

impl IntoResponse for ImportFailure {
    fn into_response(self) -> Response {
        let status = self.error.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self.error, "Course import failed");
        }

        let suspicious_operation_message = match &self.error {
            ImportError::Extract(e) => e.suspicious_operation().map(str::to_string),
            _ => None,
        };

        let body = Json(ImportErrorResponse {
            error_message: self.error.to_string(),
            stage: self.stage,
            code: self.error.code().to_string(),
            suspicious_operation_message,
        });

        (status, body).into_response()
    }
}

//! Error types for requests outside the import and export pipelines
//!
//! Pipeline failures carry their own response shapes
//! ([`crate::import::ImportFailure`], [`crate::export::ExportErrorPayload`]);
//! everything else (missing identity, unknown course, infrastructure) ends
//! up here.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Status store error: {0}")]
    Status(#[from] crate::upload::StatusStoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Internal(_)
            | AppError::Database(_)
            | AppError::Status(_)
            | AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error kind
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::Internal(_) => "internal_error",
            AppError::Database(_) => "database_error",
            AppError::Status(_) => "status_error",
            AppError::Io(_) => "io_error",
        }
    }

    /// Message safe to show to clients; server-side details stay in the log
    fn public_message(&self) -> String {
        match self {
            AppError::NotFound(msg)
            | AppError::BadRequest(msg)
            | AppError::Unauthorized(msg)
            | AppError::Forbidden(msg) => msg.clone(),
            AppError::Internal(_) => "An internal error occurred".to_string(),
            AppError::Database(_) => "Database error".to_string(),
            AppError::Status(_) => "Import status unavailable".to_string(),
            AppError::Io(_) => "IO error".to_string(),
        }
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), error = %self, "Request failed");
        }

        let body = Json(ErrorResponse {
            error: self.kind(),
            message: self.public_message(),
            details: cfg!(debug_assertions).then(|| self.to_string()),
        });

        (status, body).into_response()
    }
}

/// Unparseable course keys name no course
impl From<crate::course::KeyError> for AppError {
    fn from(e: crate::course::KeyError) -> Self {
        AppError::NotFound(e.to_string())
    }
}

//! Course import and export routes
//!
//! - `POST /:course_key` uploads one chunk of a course archive
//! - `GET /:course_key` downloads the course as a tarball
//! - `GET /:course_key/import_status/:filename` reports the import stage

use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::access::Requester;
use crate::course::CourseLikeKey;
use crate::error::{AppError, Result};
use crate::export::{ExportError, EXPORT_CONTENT_TYPE};
use crate::import::{ImportError, ImportOutcome, ImportRequest};
use crate::state::AppState;
use crate::upload::Stage;

/// Multipart field carrying the archive chunk
pub const UPLOAD_FIELD: &str = "course-data";

// ============================================================================
// Response Types
// ============================================================================

/// Reply to a chunk when more are expected
#[derive(Debug, Serialize)]
pub struct ChunkResponse {
    pub files: Vec<UploadedFile>,
}

#[derive(Debug, Serialize)]
pub struct UploadedFile {
    pub name: String,
    pub size: u64,
    pub delete_url: String,
    pub delete_type: String,
    pub thumbnail_url: String,
}

#[derive(Debug, Serialize)]
pub struct ImportStatusResponse {
    #[serde(rename = "ImportStatus")]
    pub import_status: Stage,
}

#[derive(Debug, Serialize)]
pub struct ImportedResponse {
    pub status: &'static str,
    pub location: String,
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub redirect: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/courses/:course_key
///
/// Upload one chunk of a course archive. The byte range comes from the
/// `Content-Range` header; without one the body is the whole archive.
async fn import_course(
    State(state): State<AppState>,
    Path(course_key): Path<String>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response> {
    let requester = Requester::from_headers(&headers)?;
    let target: CourseLikeKey = course_key.parse()?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| AppError::BadRequest("Upload is missing a file name".to_string()))?;
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to read upload: {}", e)))?;
        upload = Some((file_name, data));
        break;
    }
    let (file_name, payload) = upload
        .ok_or_else(|| AppError::BadRequest(format!("Missing '{}' field", UPLOAD_FIELD)))?;

    let content_range = headers
        .get(header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let request = ImportRequest {
        target,
        file_name,
        content_range,
        payload,
        requester,
    };

    let response = match state.imports().import(request).await {
        Ok(ImportOutcome::ChunkAccepted { name, size }) => Json(ChunkResponse {
            files: vec![UploadedFile {
                name,
                size,
                delete_url: String::new(),
                delete_type: String::new(),
                thumbnail_url: String::new(),
            }],
        })
        .into_response(),
        Ok(ImportOutcome::Replayed { stage }) => Json(ImportStatusResponse {
            import_status: stage,
        })
        .into_response(),
        Ok(ImportOutcome::Imported { root }) => Json(ImportedResponse {
            status: "OK",
            location: root.to_string(),
        })
        .into_response(),
        Err(failure) => failure.into_response(),
    };

    Ok(response)
}

/// GET /api/v1/courses/:course_key
///
/// Download the course as `application/x-tgz`. Failures are reported as a
/// JSON payload, or as query parameters on `?redirect=` when given.
async fn export_course(
    State(state): State<AppState>,
    Path(course_key): Path<String>,
    Query(query): Query<ExportQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    let requester = Requester::from_headers(&headers)?;
    let key: CourseLikeKey = course_key.parse()?;

    let archive = match state.exports().export(&key, &requester).await {
        Ok(archive) => archive,
        Err(ExportError::Forbidden(key)) => {
            return Err(AppError::Forbidden(format!("No author access to {}", key)))
        }
        Err(ExportError::NotFound(key)) => return Err(AppError::NotFound(key)),
        Err(ExportError::Failed(payload)) => {
            let response = match query.redirect.as_deref().filter(|url| is_local_redirect(url)) {
                Some(url) => Redirect::to(&payload.redirect_url(url)).into_response(),
                None => Json(payload).into_response(),
            };
            return Ok(response);
        }
    };

    let bytes = tokio::fs::read(archive.path()).await?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, EXPORT_CONTENT_TYPE)
        .header(header::CONTENT_LENGTH, archive.size)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename={}", archive.file_name),
        )
        .body(Body::from(bytes))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
}

/// GET /api/v1/courses/:course_key/import_status/:filename
async fn import_status(
    State(state): State<AppState>,
    Path((course_key, filename)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<ImportStatusResponse>> {
    let requester = Requester::from_headers(&headers)?;
    let key: CourseLikeKey = course_key.parse()?;

    let stage = state
        .imports()
        .status(&requester, &key, &filename)
        .await
        .map_err(|e| match e {
            ImportError::Forbidden(key) => AppError::Forbidden(format!("No author access to {}", key)),
            ImportError::Status(e) => AppError::Status(e),
            other => AppError::Internal(other.to_string()),
        })?;

    Ok(Json(ImportStatusResponse { import_status: stage }))
}

/// Only same-site paths are followed
fn is_local_redirect(url: &str) -> bool {
    url.starts_with('/') && !url.starts_with("//") && !url.contains('\\')
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:course_key", get(export_course).post(import_course))
        .route("/:course_key/import_status/:filename", get(import_status))
}

// ============================================================================
// Tests
// ============================================================================

//! Export error types

use serde::Serialize;
use thiserror::Error;

/// Export pipeline errors
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Author access to {0} denied")]
    Forbidden(String),

    #[error("Course not found: {0}")]
    NotFound(String),

    /// Reported to the client as a structured payload
    #[error("{}", .0.error_message)]
    Failed(ExportErrorPayload),
}

/// Client-facing description of a failed export
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportErrorPayload {
    pub context_course: String,
    pub error: bool,
    pub error_message: String,
    pub failed_module: Option<String>,
    pub unit: Option<String>,
}

impl ExportErrorPayload {
    /// Failure tied to a specific block
    pub fn for_item(
        context_course: impl Into<String>,
        error_message: impl Into<String>,
        failed_module: Option<String>,
        unit: Option<String>,
    ) -> Self {
        Self {
            context_course: context_course.into(),
            error: true,
            error_message: error_message.into(),
            failed_module,
            unit,
        }
    }

    /// Failure with no block context
    pub fn generic(context_course: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self::for_item(context_course, error_message, None, None)
    }

    /// URL-encoded query string; absent fields are left out
    pub fn to_query(&self) -> String {
        let mut pairs = vec![
            ("context_course", self.context_course.clone()),
            ("error", self.error.to_string()),
            ("error_message", self.error_message.clone()),
        ];
        if let Some(failed_module) = &self.failed_module {
            pairs.push(("failed_module", failed_module.clone()));
        }
        if let Some(unit) = &self.unit {
            pairs.push(("unit", unit.clone()));
        }

        pairs
            .into_iter()
            .map(|(key, value)| format!("{}={}", key, urlencoding::encode(&value)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// `redirect` with the payload appended as query parameters
    pub fn redirect_url(&self, redirect: &str) -> String {
        let separator = if redirect.contains('?') { '&' } else { '?' };
        format!("{}{}{}", redirect, separator, self.to_query())
    }
}

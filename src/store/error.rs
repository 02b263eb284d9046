//! Course store error types

use thiserror::Error;

use crate::course::Location;

/// Errors raised by a course store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Course or library not found
    #[error("Course not found: {0}")]
    CourseNotFound(String),

    /// Block not found
    #[error("Item not found: {0}")]
    ItemNotFound(String),

    /// Serializing a specific block failed
    #[error("{message}")]
    Serialization { location: Location, message: String },

    /// Course content could not be understood
    #[error("Invalid course content: {0}")]
    InvalidContent(String),

    /// Malformed XML
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

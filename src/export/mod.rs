//! Course export
//!
//! Serializes a course or library from the store into a scratch directory
//! and packs it as `{name}.tar.gz`. Serialization failures tied to one
//! block are reported with the failing block and its enclosing unit.

mod error;
mod pipeline;

pub use error::{ExportError, ExportErrorPayload};
pub use pipeline::{ExportPipeline, ExportedArchive, EXPORT_CONTENT_TYPE};

//! Course document store
//!
//! The import pipeline loads extracted course trees through [`CourseStore`]
//! and the export pipeline serializes them back out. [`MemoryCourseStore`]
//! is the bundled implementation.

mod error;
mod memory;
mod traits;
mod types;
mod xml;

pub use error::{StoreError, StoreResult};
pub use memory::{MemoryCourseStore, StoredCourse};
pub use traits::CourseStore;
pub use types::Block;
pub use xml::{is_xml_name, XmlNode};

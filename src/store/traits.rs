//! Course store trait
//!
//! The import and export pipelines only talk to the document store through
//! this interface.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::error::StoreResult;
use super::types::Block;
use crate::course::{CourseLikeKey, Location};

/// Persistent store of course and library content
#[async_trait]
pub trait CourseStore: Send + Sync {
    /// Load extracted course trees into the store under `target`
    ///
    /// `course_dirs` are relative to `data_root` and each contains a course
    /// descriptor. Returns the root blocks that were created.
    async fn import_from_xml(
        &self,
        data_root: &Path,
        course_dirs: &[PathBuf],
        user_id: &str,
        target: &CourseLikeKey,
    ) -> StoreResult<Vec<Block>>;

    /// Root block of a course
    async fn get_course(&self, key: &CourseLikeKey) -> StoreResult<Option<Block>>;

    /// Root block of a library
    async fn get_library(&self, key: &CourseLikeKey) -> StoreResult<Option<Block>>;

    /// Fetch a block by location
    async fn get_item(&self, location: &Location) -> StoreResult<Block>;

    /// Location of the block that lists `location` as a child
    async fn get_parent_location(&self, location: &Location) -> StoreResult<Option<Location>>;

    /// Serialize a course or library to `root_dir/name`
    async fn export_to_xml(&self, key: &CourseLikeKey, root_dir: &Path, name: &str) -> StoreResult<()>;
}

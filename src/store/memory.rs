//! In-memory course store
//!
//! Holds imported courses and libraries as block maps. Import reads the
//! extracted descriptor tree; export writes the whole tree back out as a
//! single inline descriptor plus the `static/` assets.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use walkdir::WalkDir;

use super::error::{StoreError, StoreResult};
use super::traits::CourseStore;
use super::types::Block;
use super::xml::{is_xml_name, too_deep, XmlNode, MAX_DEPTH};
use crate::course::{
    is_valid_component, CourseLikeKey, Location, COURSE_DESCRIPTOR, LIBRARY_DESCRIPTOR,
};

/// Directory holding course assets inside a course tree
const STATIC_DIR: &str = "static";

// ============================================================================
// Stored Course
// ============================================================================

/// A course or library held by the store
#[derive(Debug, Clone)]
pub struct StoredCourse {
    pub root: Location,
    pub blocks: HashMap<Location, Block>,
    pub parents: HashMap<Location, Location>,

    /// Asset files keyed by path relative to `static/`
    pub assets: BTreeMap<PathBuf, Vec<u8>>,

    pub edited_by: String,
    pub edited_on: DateTime<Utc>,
}

impl StoredCourse {
    pub fn new(root: Block, edited_by: impl Into<String>) -> Self {
        let location = root.location.clone();
        let mut blocks = HashMap::new();
        blocks.insert(location.clone(), root);

        Self {
            root: location,
            blocks,
            parents: HashMap::new(),
            assets: BTreeMap::new(),
            edited_by: edited_by.into(),
            edited_on: Utc::now(),
        }
    }

    /// Attach `block` as the last child of `parent`
    pub fn add_block(&mut self, parent: &Location, block: Block) -> StoreResult<()> {
        let location = block.location.clone();
        let parent_block = self
            .blocks
            .get_mut(parent)
            .ok_or_else(|| StoreError::ItemNotFound(parent.to_string()))?;
        parent_block.children.push(location.clone());
        self.parents.insert(location.clone(), parent.clone());
        self.blocks.insert(location, block);
        Ok(())
    }

    pub fn root_block(&self) -> StoreResult<&Block> {
        self.blocks
            .get(&self.root)
            .ok_or_else(|| StoreError::ItemNotFound(self.root.to_string()))
    }

    /// Build the XML subtree rooted at `location`
    fn to_xml(&self, location: &Location) -> StoreResult<XmlNode> {
        let block = self
            .blocks
            .get(location)
            .ok_or_else(|| StoreError::ItemNotFound(location.to_string()))?;

        if !is_xml_name(block.category()) {
            return Err(StoreError::Serialization {
                location: location.clone(),
                message: format!("Cannot export block with category '{}'", block.category()),
            });
        }
        if let Some(field) = block.fields.keys().find(|name| !is_xml_name(name)) {
            return Err(StoreError::Serialization {
                location: location.clone(),
                message: format!("Cannot export field '{}' of {}", field, location),
            });
        }

        let mut node = XmlNode::new(block.category()).with_attr("url_name", block.url_name());
        if *location == self.root {
            node = node
                .with_attr("org", location.course.org())
                .with_attr(root_name_attr(&location.course), location.course.course_name());
        }
        if let Some(name) = &block.display_name {
            node = node.with_attr("display_name", name.clone());
        }
        for (key, value) in &block.fields {
            node = node.with_attr(key.clone(), value.clone());
        }
        if let Some(data) = &block.data {
            node.text = data.clone();
        }
        for child in &block.children {
            node.children.push(self.to_xml(child)?);
        }

        Ok(node)
    }
}

fn root_name_attr(key: &CourseLikeKey) -> &'static str {
    if key.is_library() {
        "library"
    } else {
        "course"
    }
}

// ============================================================================
// Memory Course Store
// ============================================================================

/// Course store backed by process memory
#[derive(Clone, Default)]
pub struct MemoryCourseStore {
    courses: Arc<RwLock<HashMap<CourseLikeKey, StoredCourse>>>,
}

impl MemoryCourseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a course directly
    pub async fn insert_course(&self, course: StoredCourse) {
        let key = course.root.course.clone();
        self.courses.write().await.insert(key, course);
    }

    pub async fn course_count(&self) -> usize {
        self.courses.read().await.len()
    }

    /// Snapshot of a stored course
    pub async fn stored_course(&self, key: &CourseLikeKey) -> Option<StoredCourse> {
        self.courses.read().await.get(key).cloned()
    }

    async fn root_of(&self, key: &CourseLikeKey) -> StoreResult<Option<Block>> {
        let courses = self.courses.read().await;
        match courses.get(key) {
            Some(course) => Ok(Some(course.root_block()?.clone())),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl CourseStore for MemoryCourseStore {
    async fn import_from_xml(
        &self,
        data_root: &Path,
        course_dirs: &[PathBuf],
        user_id: &str,
        target: &CourseLikeKey,
    ) -> StoreResult<Vec<Block>> {
        let mut roots = Vec::with_capacity(course_dirs.len());

        for dir in course_dirs {
            let course_dir = data_root.join(dir);
            let loader_target = target.clone();
            let loader_user = user_id.to_string();

            let course = tokio::task::spawn_blocking(move || {
                CourseLoader::new(&course_dir, &loader_target)?.load(loader_user)
            })
            .await
            .map_err(std::io::Error::other)??;

            let root = course.root_block()?.clone();
            tracing::info!(
                course = %target,
                blocks = course.blocks.len(),
                assets = course.assets.len(),
                "Loaded course content into store"
            );

            self.courses.write().await.insert(target.clone(), course);
            roots.push(root);
        }

        Ok(roots)
    }

    async fn get_course(&self, key: &CourseLikeKey) -> StoreResult<Option<Block>> {
        if key.is_library() {
            return Ok(None);
        }
        self.root_of(key).await
    }

    async fn get_library(&self, key: &CourseLikeKey) -> StoreResult<Option<Block>> {
        if !key.is_library() {
            return Ok(None);
        }
        self.root_of(key).await
    }

    async fn get_item(&self, location: &Location) -> StoreResult<Block> {
        let courses = self.courses.read().await;
        courses
            .get(&location.course)
            .and_then(|course| course.blocks.get(location))
            .cloned()
            .ok_or_else(|| StoreError::ItemNotFound(location.to_string()))
    }

    async fn get_parent_location(&self, location: &Location) -> StoreResult<Option<Location>> {
        let courses = self.courses.read().await;
        let course = courses
            .get(&location.course)
            .ok_or_else(|| StoreError::CourseNotFound(location.course.to_string()))?;
        Ok(course.parents.get(location).cloned())
    }

    async fn export_to_xml(&self, key: &CourseLikeKey, root_dir: &Path, name: &str) -> StoreResult<()> {
        let name = checked_url_name(name)?;
        let course = self
            .courses
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::CourseNotFound(key.to_string()))?;

        let tree = course.to_xml(&course.root)?;
        let descriptor = if key.is_library() {
            LIBRARY_DESCRIPTOR
        } else {
            COURSE_DESCRIPTOR
        };

        let out_dir = root_dir.join(name);
        tokio::fs::create_dir_all(&out_dir).await?;
        tokio::fs::write(out_dir.join(descriptor), tree.render()).await?;

        for (path, bytes) in &course.assets {
            let target = out_dir.join(STATIC_DIR).join(path);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&target, bytes).await?;
        }

        tracing::debug!(
            course = %key,
            out_dir = %out_dir.display(),
            blocks = course.blocks.len(),
            "Exported course content"
        );

        Ok(())
    }
}

// ============================================================================
// Course Loader
// ============================================================================

/// Builds a `StoredCourse` from an extracted course directory
struct CourseLoader<'a> {
    dir: &'a Path,
    /// Canonical `dir`; pointer files must resolve below it
    real_dir: PathBuf,
    target: &'a CourseLikeKey,
    blocks: HashMap<Location, Block>,
    parents: HashMap<Location, Location>,
    generated: HashMap<String, usize>,
}

impl<'a> CourseLoader<'a> {
    fn new(dir: &'a Path, target: &'a CourseLikeKey) -> StoreResult<Self> {
        Ok(Self {
            dir,
            real_dir: dir.canonicalize()?,
            target,
            blocks: HashMap::new(),
            parents: HashMap::new(),
            generated: HashMap::new(),
        })
    }

    fn load(mut self, edited_by: String) -> StoreResult<StoredCourse> {
        let descriptor_path = self.dir.join(COURSE_DESCRIPTOR);
        if !is_regular_file(&descriptor_path) {
            return Err(StoreError::InvalidContent(format!(
                "{} is not a regular file",
                COURSE_DESCRIPTOR
            )));
        }
        let descriptor = read_node(&descriptor_path)?;
        if descriptor.tag != "course" && descriptor.tag != "library" {
            return Err(StoreError::InvalidContent(format!(
                "{} root must be <course> or <library>, found <{}>",
                COURSE_DESCRIPTOR, descriptor.tag
            )));
        }

        let root = self.add_block(descriptor, None, 0)?;
        let assets = self.load_assets()?;

        Ok(StoredCourse {
            root,
            blocks: self.blocks,
            parents: self.parents,
            assets,
            edited_by,
            edited_on: Utc::now(),
        })
    }

    /// `depth` counts pointer files too, so chained pointers stay bounded
    fn add_block(
        &mut self,
        node: XmlNode,
        parent: Option<&Location>,
        depth: usize,
    ) -> StoreResult<Location> {
        if depth >= MAX_DEPTH {
            return Err(too_deep());
        }
        if !is_xml_name(&node.tag) {
            return Err(StoreError::InvalidContent(format!(
                "Illegal element name <{}>",
                node.tag
            )));
        }

        let node = self.resolve_pointer(node)?;
        let name = match node.attr("url_name") {
            Some(name) => checked_url_name(name)?.to_string(),
            None => self.generated_name(&node.tag),
        };

        let location = self.target.make_location(node.tag.clone(), name);
        if self.blocks.contains_key(&location) {
            return Err(StoreError::InvalidContent(format!(
                "Duplicate block {}",
                location
            )));
        }

        let mut block = Block::new(location.clone());
        for (key, value) in node.attrs {
            match key.as_str() {
                "url_name" | "org" | "course" | "library" => {}
                "display_name" => block.display_name = Some(value),
                _ => {
                    block.fields.insert(key, value);
                }
            }
        }
        if !node.text.is_empty() {
            block.data = Some(node.text);
        }

        // Insert before recursing so duplicates further down are caught
        self.blocks.insert(location.clone(), block);
        if let Some(parent) = parent {
            self.parents.insert(location.clone(), parent.clone());
        }

        for child in node.children {
            let child_location = self.add_block(child, Some(&location), depth + 1)?;
            if let Some(block) = self.blocks.get_mut(&location) {
                block.children.push(child_location);
            }
        }

        Ok(location)
    }

    /// Replace an empty `<tag url_name="x"/>` with the contents of `tag/x.xml`
    fn resolve_pointer(&self, node: XmlNode) -> StoreResult<XmlNode> {
        if !node.children.is_empty() || !node.text.is_empty() {
            return Ok(node);
        }
        let Some(name) = node.attr("url_name") else {
            return Ok(node);
        };
        let name = checked_url_name(name)?;

        let path = self.dir.join(&node.tag).join(format!("{}.xml", name));
        if !is_regular_file(&path) {
            return Ok(node);
        }
        if !path.canonicalize()?.starts_with(&self.real_dir) {
            return Err(StoreError::InvalidContent(format!(
                "{}/{}.xml lies outside the course directory",
                node.tag, name
            )));
        }

        let mut definition = read_node(&path)?;
        for (key, value) in node.attrs {
            if definition.attr(&key).is_none() {
                definition.attrs.push((key, value));
            }
        }
        Ok(definition)
    }

    fn generated_name(&mut self, category: &str) -> String {
        let counter = self.generated.entry(category.to_string()).or_insert(0);
        *counter += 1;
        format!("{}_{}", category, counter)
    }

    fn load_assets(&self) -> StoreResult<BTreeMap<PathBuf, Vec<u8>>> {
        let static_dir = self.dir.join(STATIC_DIR);
        let mut assets = BTreeMap::new();
        if !static_dir.is_dir() {
            return Ok(assets);
        }

        for entry in WalkDir::new(&static_dir).follow_links(false) {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&static_dir)
                .map_err(|e| StoreError::InvalidContent(e.to_string()))?
                .to_path_buf();
            assets.insert(relative, fs::read(entry.path())?);
        }

        Ok(assets)
    }
}

fn read_node(path: &Path) -> StoreResult<XmlNode> {
    let xml = fs::read_to_string(path)?;
    XmlNode::parse(&xml)
}

/// Regular file, not a symlink to one
fn is_regular_file(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|metadata| metadata.file_type().is_file())
        .unwrap_or(false)
}

/// Block names end up in locations and file names, so they must be a
/// single plain path component
fn checked_url_name(name: &str) -> StoreResult<&str> {
    if is_valid_component(name) && name != "." && name != ".." {
        Ok(name)
    } else {
        Err(StoreError::InvalidContent(format!("Illegal url_name '{}'", name)))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn target() -> CourseLikeKey {
        "course-v1:edX+Demo+2024".parse().unwrap()
    }

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn write_course_tree(dir: &Path) {
        write(
            &dir.join("course.xml"),
            r#"<course url_name="2024" org="edX" course="Demo"/>"#,
        );
        write(
            &dir.join("course/2024.xml"),
            r#"<course display_name="Demo Course">
                <chapter url_name="week1" display_name="Week 1">
                    <vertical url_name="unit1">
                        <html url_name="intro">Welcome</html>
                        <problem url_name="quiz" weight="2"/>
                    </vertical>
                </chapter>
            </course>"#,
        );
        write(&dir.join("static/images/logo.png"), "png-bytes");
    }

    #[tokio::test]
    async fn test_import_resolves_pointers_and_assets() {
        let temp = TempDir::new().unwrap();
        write_course_tree(&temp.path().join("edX-Demo-2024/content"));

        let store = MemoryCourseStore::new();
        let roots = store
            .import_from_xml(
                temp.path(),
                &[PathBuf::from("edX-Demo-2024/content")],
                "42",
                &target(),
            )
            .await
            .unwrap();

        assert_eq!(roots.len(), 1);
        let root = &roots[0];
        assert_eq!(root.category(), "course");
        assert_eq!(root.url_name(), "2024");
        assert_eq!(root.display_name.as_deref(), Some("Demo Course"));

        let unit = target().make_location("vertical", "unit1");
        let problem = target().make_location("problem", "quiz");
        assert_eq!(store.get_parent_location(&problem).await.unwrap(), Some(unit.clone()));
        assert_eq!(
            store.get_item(&problem).await.unwrap().fields.get("weight").map(String::as_str),
            Some("2")
        );

        let stored = store.stored_course(&target()).await.unwrap();
        assert_eq!(stored.edited_by, "42");
        assert_eq!(
            stored.assets.get(Path::new("images/logo.png")),
            Some(&b"png-bytes".to_vec())
        );
    }

    #[tokio::test]
    async fn test_import_rejects_duplicate_blocks() {
        let temp = TempDir::new().unwrap();
        write(
            &temp.path().join("c/course.xml"),
            r#"<course url_name="r"><chapter url_name="a"/><chapter url_name="a"/></course>"#,
        );

        let store = MemoryCourseStore::new();
        let result = store
            .import_from_xml(temp.path(), &[PathBuf::from("c")], "1", &target())
            .await;
        assert!(matches!(result, Err(StoreError::InvalidContent(_))));
        assert_eq!(store.course_count().await, 0);
    }

    #[tokio::test]
    async fn test_pointer_cannot_leave_course_dir() {
        let temp = TempDir::new().unwrap();
        write(
            &temp.path().join("victim/secret.xml"),
            r#"<chapter display_name="TOP SECRET"/>"#,
        );
        fs::create_dir_all(temp.path().join("upload/c/chapter")).unwrap();
        write(
            &temp.path().join("upload/c/course.xml"),
            r#"<course url_name="r"><chapter url_name="../../../victim/secret"/></course>"#,
        );

        let store = MemoryCourseStore::new();
        let result = store
            .import_from_xml(temp.path(), &[PathBuf::from("upload/c")], "1", &target())
            .await;
        assert!(matches!(result, Err(StoreError::InvalidContent(_))));
        assert_eq!(store.course_count().await, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_pointer_file_is_not_followed() {
        let temp = TempDir::new().unwrap();
        write(
            &temp.path().join("outside.xml"),
            r#"<chapter display_name="TOP SECRET"/>"#,
        );
        write(
            &temp.path().join("c/course.xml"),
            r#"<course url_name="r"><chapter url_name="week1"/></course>"#,
        );
        fs::create_dir_all(temp.path().join("c/chapter")).unwrap();
        std::os::unix::fs::symlink(
            temp.path().join("outside.xml"),
            temp.path().join("c/chapter/week1.xml"),
        )
        .unwrap();

        let store = MemoryCourseStore::new();
        store
            .import_from_xml(temp.path(), &[PathBuf::from("c")], "1", &target())
            .await
            .unwrap();
        let chapter = store
            .get_item(&target().make_location("chapter", "week1"))
            .await
            .unwrap();
        assert_eq!(chapter.display_name, None);
    }

    #[tokio::test]
    async fn test_dot_names_are_rejected() {
        let temp = TempDir::new().unwrap();
        write(&temp.path().join("c/course.xml"), r#"<course url_name=".."/>"#);

        let store = MemoryCourseStore::new();
        let result = store
            .import_from_xml(temp.path(), &[PathBuf::from("c")], "1", &target())
            .await;
        assert!(matches!(result, Err(StoreError::InvalidContent(_))));

        store
            .insert_course(StoredCourse::new(
                Block::new(target().make_location("course", "..")),
                "1",
            ))
            .await;
        let out = TempDir::new().unwrap();
        let scratch = out.path().join("scratch");
        fs::create_dir_all(&scratch).unwrap();
        let result = store.export_to_xml(&target(), &scratch, "..").await;
        assert!(matches!(result, Err(StoreError::InvalidContent(_))));
        assert!(!out.path().join("course.xml").exists());
    }

    #[tokio::test]
    async fn test_deeply_nested_descriptor_is_rejected() {
        let temp = TempDir::new().unwrap();
        let depth = 20_000;
        write(
            &temp.path().join("c/course.xml"),
            &format!(
                "<course url_name=\"r\">{}{}</course>",
                "<html>".repeat(depth),
                "</html>".repeat(depth)
            ),
        );

        let store = MemoryCourseStore::new();
        let result = store
            .import_from_xml(temp.path(), &[PathBuf::from("c")], "1", &target())
            .await;
        assert!(matches!(result, Err(StoreError::InvalidContent(_))));
    }

    #[tokio::test]
    async fn test_pointer_chains_are_bounded() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("c");
        write(
            &dir.join("course.xml"),
            r#"<course url_name="r"><chapter url_name="c0"/></course>"#,
        );
        for i in 0..MAX_DEPTH + 10 {
            write(
                &dir.join(format!("chapter/c{}.xml", i)),
                &format!("<chapter><chapter url_name=\"c{}\"/></chapter>", i + 1),
            );
        }

        let store = MemoryCourseStore::new();
        let result = store
            .import_from_xml(temp.path(), &[PathBuf::from("c")], "1", &target())
            .await;
        match result {
            Err(StoreError::InvalidContent(message)) => assert!(message.contains("nested")),
            other => panic!("expected nesting error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_export_then_import_preserves_tree() {
        let temp = TempDir::new().unwrap();
        write_course_tree(&temp.path().join("src"));

        let store = MemoryCourseStore::new();
        store
            .import_from_xml(temp.path(), &[PathBuf::from("src")], "1", &target())
            .await
            .unwrap();

        let out = TempDir::new().unwrap();
        store.export_to_xml(&target(), out.path(), "2024").await.unwrap();
        assert!(out.path().join("2024/course.xml").is_file());
        assert!(out.path().join("2024/static/images/logo.png").is_file());

        let reimported = MemoryCourseStore::new();
        reimported
            .import_from_xml(out.path(), &[PathBuf::from("2024")], "1", &target())
            .await
            .unwrap();

        let before = store.stored_course(&target()).await.unwrap();
        let after = reimported.stored_course(&target()).await.unwrap();
        assert_eq!(before.blocks, after.blocks);
        assert_eq!(before.assets, after.assets);
    }

    #[tokio::test]
    async fn test_export_reports_failing_block() {
        let key = target();
        let root = Block::new(key.make_location("course", "2024"));
        let mut course = StoredCourse::new(root, "1");
        let root = course.root.clone();
        let unit = key.make_location("vertical", "unit1");
        course.add_block(&root, Block::new(unit.clone())).unwrap();
        let broken = key.make_location("bad category", "b1");
        course.add_block(&unit, Block::new(broken.clone())).unwrap();

        let store = MemoryCourseStore::new();
        store.insert_course(course).await;

        let out = TempDir::new().unwrap();
        match store.export_to_xml(&key, out.path(), "2024").await {
            Err(StoreError::Serialization { location, .. }) => assert_eq!(location, broken),
            other => panic!("expected serialization error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_get_course_and_library_branch_on_key_kind() {
        let library: CourseLikeKey = "library-v1:edX+lib".parse().unwrap();
        let store = MemoryCourseStore::new();
        store
            .insert_course(StoredCourse::new(
                Block::new(library.make_location("library", "lib")),
                "1",
            ))
            .await;

        assert!(store.get_library(&library).await.unwrap().is_some());
        assert!(store.get_course(&library).await.unwrap().is_none());
        assert!(store.get_course(&target()).await.unwrap().is_none());
    }
}

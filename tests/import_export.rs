//! End-to-end import and export through the library API

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use tempfile::TempDir;

use courseport_server::access::{Requester, StaffRoster};
use courseport_server::archive::pack_directory;
use courseport_server::course::{CourseLikeKey, Location};
use courseport_server::export::{ExportError, ExportPipeline};
use courseport_server::import::{ImportError, ImportOutcome, ImportPipeline, ImportRequest};
use courseport_server::store::{Block, CourseStore, MemoryCourseStore, StoreResult, StoredCourse};
use courseport_server::upload::{
    MemoryStatusStore, Stage, StatusKey, StatusStore, StatusStoreError, UploadError, UploadLocks,
};

const COURSE: &str = "course-v1:edX+Demo+2024";
const ARCHIVE: &str = "course.tar.gz";

// ============================================================================
// Instrumented collaborators
// ============================================================================

/// Counts loader invocations
#[derive(Clone, Default)]
struct CountingStore {
    inner: MemoryCourseStore,
    imports: Arc<AtomicUsize>,
}

#[async_trait]
impl CourseStore for CountingStore {
    async fn import_from_xml(
        &self,
        data_root: &Path,
        course_dirs: &[PathBuf],
        user_id: &str,
        target: &CourseLikeKey,
    ) -> StoreResult<Vec<Block>> {
        self.imports.fetch_add(1, Ordering::SeqCst);
        self.inner
            .import_from_xml(data_root, course_dirs, user_id, target)
            .await
    }

    async fn get_course(&self, key: &CourseLikeKey) -> StoreResult<Option<Block>> {
        self.inner.get_course(key).await
    }

    async fn get_library(&self, key: &CourseLikeKey) -> StoreResult<Option<Block>> {
        self.inner.get_library(key).await
    }

    async fn get_item(&self, location: &Location) -> StoreResult<Block> {
        self.inner.get_item(location).await
    }

    async fn get_parent_location(&self, location: &Location) -> StoreResult<Option<Location>> {
        self.inner.get_parent_location(location).await
    }

    async fn export_to_xml(&self, key: &CourseLikeKey, root_dir: &Path, name: &str) -> StoreResult<()> {
        self.inner.export_to_xml(key, root_dir, name).await
    }
}

/// Remembers every stage written
#[derive(Clone, Default)]
struct RecordingStatuses {
    inner: MemoryStatusStore,
    history: Arc<Mutex<Vec<Stage>>>,
}

impl RecordingStatuses {
    fn history(&self) -> Vec<Stage> {
        self.history.lock().clone()
    }
}

#[async_trait]
impl StatusStore for RecordingStatuses {
    async fn get(&self, key: &StatusKey) -> Result<Stage, StatusStoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &StatusKey, stage: Stage) -> Result<(), StatusStoreError> {
        self.history.lock().push(stage);
        self.inner.set(key, stage).await
    }
}

struct Harness {
    _temp: TempDir,
    data_root: PathBuf,
    store: CountingStore,
    statuses: RecordingStatuses,
    pipeline: ImportPipeline,
}

impl Harness {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let data_root = temp.path().join("data");
        let store = CountingStore::default();
        let statuses = RecordingStatuses::default();
        let pipeline = ImportPipeline::new(
            data_root.clone(),
            Arc::new(store.clone()),
            Arc::new(statuses.clone()),
            UploadLocks::new(),
            Arc::new(StaffRoster::allow_all()),
        );

        Self {
            _temp: temp,
            data_root,
            store,
            statuses,
            pipeline,
        }
    }

    fn staging_dir(&self) -> PathBuf {
        self.data_root.join("edX-Demo-2024")
    }

    async fn send(&self, range: Option<String>, payload: &[u8]) -> Result<ImportOutcome, ImportError> {
        self.pipeline
            .import(ImportRequest {
                target: target(),
                file_name: ARCHIVE.to_string(),
                content_range: range,
                payload: Bytes::copy_from_slice(payload),
                requester: requester(),
            })
            .await
            .map_err(|failure| failure.error)
    }

    async fn stage(&self) -> Stage {
        self.pipeline
            .status(&requester(), &target(), ARCHIVE)
            .await
            .unwrap()
    }

    fn imports(&self) -> usize {
        self.store.imports.load(Ordering::SeqCst)
    }
}

fn target() -> CourseLikeKey {
    COURSE.parse().unwrap()
}

fn requester() -> Requester {
    Requester::new("alice", "session-1")
}

// ============================================================================
// Archive fixtures
// ============================================================================

/// Course tree nested two levels deep inside the archive
fn course_archive(with_descriptor: bool) -> Vec<u8> {
    let temp = TempDir::new().unwrap();
    let tree = temp.path().join("tree");
    fs::create_dir_all(tree.join("chapter")).unwrap();
    fs::create_dir_all(tree.join("static")).unwrap();
    if with_descriptor {
        fs::write(
            tree.join("course.xml"),
            r#"<course url_name="2024" display_name="Demo Course"><chapter url_name="week1"/></course>"#,
        )
        .unwrap();
    }
    fs::write(
        tree.join("chapter/week1.xml"),
        r#"<chapter display_name="Week 1"><vertical url_name="unit1"><problem url_name="p1"/></vertical></chapter>"#,
    )
    .unwrap();
    fs::write(tree.join("static/handout.txt"), "read me").unwrap();

    let output = temp.path().join(ARCHIVE);
    pack_directory(&tree, "export/Demo", &output).unwrap();
    fs::read(output).unwrap()
}

/// Members written with raw headers: `(name, type, data or link target)`
fn raw_archive(members: &[(&str, tar::EntryType, &str)]) -> Vec<u8> {
    let temp = TempDir::new().unwrap();
    let output = temp.path().join(ARCHIVE);
    let mut builder = tar::Builder::new(GzEncoder::new(File::create(&output).unwrap(), Compression::default()));

    for &(name, entry_type, content) in members {
        let mut header = tar::Header::new_old();
        header.as_old_mut().name[..name.len()].copy_from_slice(name.as_bytes());
        header.set_entry_type(entry_type);
        let data = if entry_type == tar::EntryType::Symlink {
            header.as_old_mut().linkname[..content.len()].copy_from_slice(content.as_bytes());
            ""
        } else {
            content
        };
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, data.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();

    fs::read(output).unwrap()
}

/// Archive with a member that climbs out of the extraction directory
fn traversal_archive() -> Vec<u8> {
    raw_archive(&[
        ("Demo/course.xml", tar::EntryType::Regular, "<course/>"),
        ("../../escaped.txt", tar::EntryType::Regular, "gotcha"),
    ])
}

/// Split into three contiguous ranges `start-stop/end`
fn three_chunks(archive: &[u8]) -> Vec<(String, &[u8])> {
    let total = archive.len();
    let first = total / 3;
    let second = 2 * total / 3;

    [(0, first), (first, second), (second, total)]
        .into_iter()
        .map(|(start, end)| {
            (
                format!("bytes {}-{}/{}", start, end - 1, total),
                &archive[start..end],
            )
        })
        .collect()
}

// ============================================================================
// Import
// ============================================================================

#[tokio::test]
async fn three_chunk_upload_reaches_imported() {
    let harness = Harness::new();
    let archive = course_archive(true);
    let chunks = three_chunks(&archive);

    for (range, payload) in &chunks[..2] {
        match harness.send(Some(range.clone()), payload).await.unwrap() {
            ImportOutcome::ChunkAccepted { name, size } => {
                assert_eq!(name, ARCHIVE);
                assert_eq!(
                    size,
                    fs::metadata(harness.staging_dir().join(ARCHIVE)).unwrap().len()
                );
            }
            other => panic!("expected partial chunk, got {:?}", other),
        }
    }
    assert_eq!(
        fs::metadata(harness.staging_dir().join(ARCHIVE)).unwrap().len(),
        (2 * archive.len() / 3) as u64
    );

    let (range, payload) = &chunks[2];
    let root = match harness.send(Some(range.clone()), payload).await.unwrap() {
        ImportOutcome::Imported { root } => root,
        other => panic!("expected import, got {:?}", other),
    };

    assert_eq!(root.to_string(), "block-v1:edX+Demo+2024+type@course+block@2024");
    assert_eq!(harness.stage().await, Stage::IMPORTED);
    assert_eq!(harness.imports(), 1);
    assert_eq!(
        harness.statuses.history(),
        vec![
            Stage::NONE,
            Stage::UPLOADED,
            Stage::EXTRACTED,
            Stage::VERIFIED,
            Stage::IMPORTED
        ]
    );

    let stored = harness.store.inner.stored_course(&target()).await.unwrap();
    assert_eq!(stored.edited_by, "alice");
    assert_eq!(stored.assets.len(), 1);
    assert!(!harness.staging_dir().exists());
}

#[tokio::test]
async fn replayed_final_chunk_has_no_side_effects() {
    let harness = Harness::new();
    let archive = course_archive(true);
    let chunks = three_chunks(&archive);

    for (range, payload) in &chunks {
        harness.send(Some(range.clone()), payload).await.unwrap();
    }
    let writes = harness.statuses.history().len();

    let (range, payload) = &chunks[2];
    let replay = harness.send(Some(range.clone()), payload).await.unwrap();

    assert_eq!(replay, ImportOutcome::Replayed { stage: Stage::IMPORTED });
    assert_eq!(harness.imports(), 1);
    assert_eq!(harness.statuses.history().len(), writes);
    assert!(!harness.staging_dir().exists());
}

#[tokio::test]
async fn replay_after_failure_reports_failure() {
    let harness = Harness::new();
    let archive = course_archive(false);
    let chunks = three_chunks(&archive);

    for (range, payload) in &chunks[..2] {
        harness.send(Some(range.clone()), payload).await.unwrap();
    }
    let (range, payload) = &chunks[2];
    assert!(matches!(
        harness.send(Some(range.clone()), payload).await,
        Err(ImportError::DescriptorMissing)
    ));

    let replay = harness.send(Some(range.clone()), payload).await.unwrap();
    assert_eq!(replay, ImportOutcome::Replayed { stage: Stage::DESCRIPTOR_MISSING });
    assert_eq!(harness.imports(), 0);
}

#[tokio::test]
async fn gap_between_chunks_fails_without_writing() {
    let harness = Harness::new();
    let archive = course_archive(true);
    let chunks = three_chunks(&archive);

    let (range, payload) = &chunks[0];
    harness.send(Some(range.clone()), payload).await.unwrap();

    // Skip the middle chunk
    let (range, payload) = &chunks[2];
    let error = harness.send(Some(range.clone()), payload).await.unwrap_err();

    assert!(matches!(error, ImportError::Upload(UploadError::Corrupted { .. })));
    assert_eq!(error.to_string(), "File upload corrupted. Please try again");
    assert_eq!(harness.stage().await, Stage::UPLOAD_FAILED);
    assert!(!harness.statuses.history().contains(&Stage::UPLOADED));
    assert_eq!(harness.imports(), 0);
    assert!(!harness.staging_dir().exists());
}

#[tokio::test]
async fn unsafe_archive_never_reaches_extracted() {
    let harness = Harness::new();

    let error = harness.send(None, &traversal_archive()).await.unwrap_err();

    assert!(matches!(error, ImportError::Extract(_)));
    assert_eq!(error.to_string(), "Unsafe tar file. Aborting import.");
    assert_eq!(harness.stage().await, Stage::UPLOAD_FAILED);
    assert!(!harness.statuses.history().contains(&Stage::EXTRACTED));
    assert!(!harness.data_root.join("escaped.txt").exists());
    assert!(!harness.data_root.parent().unwrap().join("escaped.txt").exists());
    assert!(!harness.staging_dir().exists());
}

#[tokio::test]
async fn symlink_through_earlier_symlink_is_refused() {
    let harness = Harness::new();
    fs::create_dir_all(&harness.data_root).unwrap();
    fs::write(harness.data_root.join("secret.txt"), "SECRET").unwrap();

    let archive = raw_archive(&[
        ("Demo/course.xml", tar::EntryType::Regular, "<course/>"),
        ("Demo/d", tar::EntryType::Symlink, ".."),
        ("Demo/x", tar::EntryType::Symlink, "d/../secret.txt"),
    ]);
    let error = harness.send(None, &archive).await.unwrap_err();

    assert!(matches!(error, ImportError::Extract(_)));
    assert_eq!(harness.stage().await, Stage::UPLOAD_FAILED);
    assert_eq!(harness.imports(), 0);
    assert!(!harness.staging_dir().exists());
}

#[tokio::test]
async fn pointer_outside_course_tree_is_not_imported() {
    let harness = Harness::new();
    fs::create_dir_all(harness.data_root.join("victim")).unwrap();
    fs::write(
        harness.data_root.join("victim/secret.xml"),
        r#"<chapter display_name="TOP SECRET"/>"#,
    )
    .unwrap();

    let temp = TempDir::new().unwrap();
    let tree = temp.path().join("tree");
    fs::create_dir_all(tree.join("chapter")).unwrap();
    fs::write(
        tree.join("course.xml"),
        r#"<course url_name="2024"><chapter url_name="../../../../victim/secret"/></course>"#,
    )
    .unwrap();
    let output = temp.path().join(ARCHIVE);
    pack_directory(&tree, "export/Demo", &output).unwrap();

    let error = harness.send(None, &fs::read(output).unwrap()).await.unwrap_err();

    assert!(matches!(error, ImportError::Store(_)));
    assert!(harness.stage().await.is_failure());
    assert!(harness.store.get_course(&target()).await.unwrap().is_none());
    assert!(!harness.staging_dir().exists());
}

#[tokio::test]
async fn missing_descriptor_ends_at_stage_minus_two() {
    let harness = Harness::new();
    let archive = course_archive(false);

    for (range, payload) in three_chunks(&archive) {
        let _ = harness.send(Some(range), payload).await;
    }

    assert_eq!(harness.stage().await, Stage::DESCRIPTOR_MISSING);
    assert_eq!(harness.imports(), 0);
    assert!(!harness.staging_dir().exists());
}

#[tokio::test]
async fn new_upload_resets_previous_outcome() {
    let harness = Harness::new();

    harness.send(None, &course_archive(false)).await.unwrap_err();
    assert_eq!(harness.stage().await, Stage::DESCRIPTOR_MISSING);

    harness.send(None, &course_archive(true)).await.unwrap();
    assert_eq!(harness.stage().await, Stage::IMPORTED);
}

// ============================================================================
// Export
// ============================================================================

#[tokio::test]
async fn export_round_trips_through_import() {
    let harness = Harness::new();
    harness.send(None, &course_archive(true)).await.unwrap();

    let exports = ExportPipeline::new(Arc::new(harness.store.clone()), Arc::new(StaffRoster::allow_all()));
    let archive = exports.export(&target(), &requester()).await.unwrap();
    assert!(archive.file_name.starts_with("2024."));

    let reimport = Harness::new();
    let bytes = fs::read(archive.path()).unwrap();
    match reimport.send(None, &bytes).await.unwrap() {
        ImportOutcome::Imported { root } => assert_eq!(root.name, "2024"),
        other => panic!("expected import, got {:?}", other),
    }

    let original = harness.store.inner.stored_course(&target()).await.unwrap();
    let copy = reimport.store.inner.stored_course(&target()).await.unwrap();
    assert_eq!(original.blocks.len(), copy.blocks.len());
    assert_eq!(original.assets, copy.assets);
}

#[tokio::test]
async fn export_failure_names_module_and_unit() {
    let key = target();
    let mut course = StoredCourse::new(Block::new(key.make_location("course", "2024")), "1");
    let root = course.root.clone();
    let unit = key.make_location("vertical", "unit1");
    let broken = key.make_location("bad category", "broken");
    course.add_block(&root, Block::new(unit.clone())).unwrap();
    course.add_block(&unit, Block::new(broken.clone())).unwrap();

    let store = MemoryCourseStore::new();
    store.insert_course(course).await;

    let exports = ExportPipeline::new(Arc::new(store), Arc::new(StaffRoster::allow_all()));
    match exports.export(&key, &requester()).await {
        Err(ExportError::Failed(payload)) => {
            assert_eq!(payload.failed_module, Some(broken.to_string()));
            assert_eq!(payload.unit, Some(unit.to_string()));
            assert!(payload.error);
        }
        other => panic!("expected export failure, got {:?}", other),
    }
}

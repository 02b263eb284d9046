//! Chunked Upload Module
//!
//! Receives course archives in byte ranges and tracks import progress:
//! - Content-Range parsing and append-only chunk assembly
//! - Duplicate final chunk detection (proxies may replay the last request)
//! - Per-upload stage tracking through a pluggable status store
//! - Scoped staging directories and per-target upload locks
//!
//! Protocol Flow:
//! 1. Client sends chunks with `Content-Range: bytes start-stop/end`
//! 2. Server appends each chunk to the staging archive
//! 3. The final chunk (`stop == end - 1`) hands the archive to the import pipeline
//! 4. Client polls the import status until it reaches 4 or a negative stage

pub mod receiver;
pub mod staging;
pub mod status;
pub mod types;

pub use receiver::ChunkReceiver;
pub use staging::{StagingDir, StagingSweeper, UploadLock, UploadLocks};
pub use status::{
    MemoryStatusStore, SqliteStatusStore, StageTracker, StatusKey, StatusStore, StatusStoreError,
};
pub use types::*;

//! Upload types for chunked course archive uploads

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::course::CourseLikeKey;

// ============================================================================
// Constants
// ============================================================================

/// Uploaded course archives must carry this suffix
pub const ARCHIVE_SUFFIX: &str = ".tar.gz";

/// Maximum digits accepted per Content-Range component
pub const MAX_RANGE_DIGITS: usize = 11;

/// Abandoned staging directories are removed after this long
pub const STAGING_EXPIRY_HOURS: i64 = 24;

// ============================================================================
// Stage
// ============================================================================

/// Import progress for one upload key
///
/// Positive values are reached strictly in order. A negative value `-N`
/// means the import failed while at stage `N` (never above `-1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Stage(i8);

impl Stage {
    /// No status yet: not started, upload still in progress, or cleared
    pub const NONE: Stage = Stage(0);
    /// Full archive assembled
    pub const UPLOADED: Stage = Stage(1);
    /// Archive extracted
    pub const EXTRACTED: Stage = Stage(2);
    /// Descriptor located, handing off to the store loader
    pub const VERIFIED: Stage = Stage(3);
    /// Import succeeded
    pub const IMPORTED: Stage = Stage(4);
    /// Failed during upload or extraction
    pub const UPLOAD_FAILED: Stage = Stage(-1);
    /// Failed because the descriptor was missing
    pub const DESCRIPTOR_MISSING: Stage = Stage(-2);

    pub fn from_code(code: i8) -> Self {
        Stage(code.clamp(-4, 4))
    }

    pub fn code(self) -> i8 {
        self.0
    }

    /// Failure stage for an import that was at `self`
    pub fn failed(self) -> Stage {
        Stage(-(self.0.abs().max(1)))
    }

    pub fn is_failure(self) -> bool {
        self.0 < 0
    }

    /// Success or failure; the upload key's lifecycle has ended
    pub fn is_terminal(self) -> bool {
        self == Self::IMPORTED || self.is_failure()
    }
}

impl Default for Stage {
    fn default() -> Self {
        Self::NONE
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Byte Range
// ============================================================================

/// Byte range of one chunk, parsed from `Content-Range: bytes start-stop/end`
///
/// `start` and `stop` are inclusive offsets, `end` is the total size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub stop: u64,
    pub end: u64,
}

impl ByteRange {
    /// Sentinel for a request without a range header: the whole body, final
    pub const WHOLE_BODY: ByteRange = ByteRange {
        start: 0,
        stop: 1,
        end: 2,
    };

    /// Parse a Content-Range header value
    ///
    /// Accepts an optional unit prefix (`bytes 0-9/30` or `0-9/30`).
    pub fn parse(header: &str) -> Result<Self, UploadError> {
        let invalid = || UploadError::InvalidRange(header.to_string());

        let spec = header.trim();
        let spec = spec
            .find(|c: char| c.is_ascii_digit())
            .map(|idx| &spec[idx..])
            .ok_or_else(invalid)?;

        let (span, end) = spec.split_once('/').ok_or_else(invalid)?;
        let (start, stop) = span.split_once('-').ok_or_else(invalid)?;

        let start = parse_offset(start).ok_or_else(invalid)?;
        let stop = parse_offset(stop).ok_or_else(invalid)?;
        let end = parse_offset(end).ok_or_else(invalid)?;

        if start > stop || stop >= end {
            return Err(invalid());
        }

        Ok(Self { start, stop, end })
    }

    /// Parse an optional header, falling back to the whole-body sentinel
    pub fn from_header(header: Option<&str>) -> Result<Self, UploadError> {
        match header {
            Some(value) => Self::parse(value),
            None => Ok(Self::WHOLE_BODY),
        }
    }

    /// Whether this chunk completes the archive
    pub fn is_final(&self) -> bool {
        self.stop == self.end - 1
    }

    pub fn is_first(&self) -> bool {
        self.start == 0
    }
}

fn parse_offset(digits: &str) -> Option<u64> {
    let digits = digits.trim();
    if digits.is_empty()
        || digits.len() > MAX_RANGE_DIGITS
        || !digits.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }
    digits.parse().ok()
}

// ============================================================================
// Upload Session
// ============================================================================

/// Per-request view of one (target, filename) upload
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub target: CourseLikeKey,
    pub file_name: String,

    /// Scratch directory for this target
    pub staging_dir: PathBuf,

    /// Archive being assembled inside `staging_dir`
    pub archive_path: PathBuf,
}

impl UploadSession {
    pub fn new(target: CourseLikeKey, file_name: String, data_root: &std::path::Path) -> Self {
        let staging_dir = data_root.join(target.staging_dir_name());
        let archive_path = staging_dir.join(&file_name);
        Self {
            target,
            file_name,
            staging_dir,
            archive_path,
        }
    }
}

/// Outcome of writing one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkProgress {
    /// More chunks are expected
    Partial { size: u64 },
    /// The archive is complete
    Complete { size: u64 },
    /// The final chunk was sent again after the archive was already complete
    ReplayedFinal { size: u64 },
}

// ============================================================================
// Error Types
// ============================================================================

/// Chunk transfer errors
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Invalid Content-Range: {0}")]
    InvalidRange(String),

    #[error("File upload corrupted. Please try again")]
    Corrupted { expected: u64, actual: u64 },

    #[error("Invalid file name: {0}")]
    InvalidFileName(String),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),
}

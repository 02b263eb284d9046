//! Chunk Receiver
//!
//! Appends byte ranges of an uploaded archive to a single staging file.
//! The first chunk (re)creates the file; later chunks are appended after
//! checking that nothing was lost in between.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use super::types::{ByteRange, ChunkProgress, UploadError};

/// Writes chunks of one archive to disk
#[derive(Debug, Clone)]
pub struct ChunkReceiver {
    archive_path: PathBuf,
}

impl ChunkReceiver {
    pub fn new(archive_path: impl Into<PathBuf>) -> Self {
        Self {
            archive_path: archive_path.into(),
        }
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    /// Store one chunk
    ///
    /// Fails with [`UploadError::Corrupted`] when `range.start` lies beyond
    /// the bytes already on disk. A repeated final chunk for an archive that
    /// is already complete is reported as [`ChunkProgress::ReplayedFinal`]
    /// without writing anything.
    pub async fn receive(&self, range: &ByteRange, payload: &[u8]) -> Result<ChunkProgress, UploadError> {
        let mut file = if range.is_first() {
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.archive_path)
                .await?
        } else {
            let size = self.current_size().await?;

            if size < range.start {
                tracing::warn!(
                    archive = %self.archive_path.display(),
                    range_start = range.start,
                    size = size,
                    "Reported range does not match size downloaded so far"
                );
                return Err(UploadError::Corrupted {
                    expected: range.start,
                    actual: size,
                });
            }

            // Proxies may resend the last request when the response is slow
            if size > range.stop && size == range.end {
                tracing::debug!(
                    archive = %self.archive_path.display(),
                    size = size,
                    "Final chunk received again, ignoring"
                );
                return Ok(ChunkProgress::ReplayedFinal { size });
            }

            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.archive_path)
                .await?;

            // A retried chunk overlaps what is on disk; drop the stale tail
            if size > range.start {
                file.set_len(range.start).await?;
            }
            file
        };

        file.write_all(payload).await?;
        file.flush().await?;
        drop(file);

        let size = self.current_size().await?;
        tracing::debug!(
            archive = %self.archive_path.display(),
            range_start = range.start,
            range_stop = range.stop,
            range_end = range.end,
            size = size,
            "Chunk written"
        );

        if range.is_final() {
            Ok(ChunkProgress::Complete { size })
        } else {
            Ok(ChunkProgress::Partial { size })
        }
    }

    /// Size of the staging file, zero if it does not exist yet
    pub async fn current_size(&self) -> Result<u64, UploadError> {
        match tokio::fs::metadata(&self.archive_path).await {
            Ok(metadata) => Ok(metadata.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn range(start: u64, stop: u64, end: u64) -> ByteRange {
        ByteRange { start, stop, end }
    }

    #[tokio::test]
    async fn test_contiguous_chunks_assemble_file() {
        let temp_dir = TempDir::new().unwrap();
        let receiver = ChunkReceiver::new(temp_dir.path().join("course.tar.gz"));

        let first = receiver.receive(&range(0, 9, 30), &[b'a'; 10]).await.unwrap();
        assert_eq!(first, ChunkProgress::Partial { size: 10 });

        let second = receiver.receive(&range(10, 19, 30), &[b'b'; 10]).await.unwrap();
        assert_eq!(second, ChunkProgress::Partial { size: 20 });

        let last = receiver.receive(&range(20, 29, 30), &[b'c'; 10]).await.unwrap();
        assert_eq!(last, ChunkProgress::Complete { size: 30 });

        let contents = std::fs::read(receiver.archive_path()).unwrap();
        assert_eq!(&contents[..10], &[b'a'; 10]);
        assert_eq!(&contents[20..], &[b'c'; 10]);
    }

    #[tokio::test]
    async fn test_gap_is_corruption_and_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let receiver = ChunkReceiver::new(temp_dir.path().join("course.tar.gz"));

        receiver.receive(&range(0, 9, 30), &[0; 10]).await.unwrap();
        let result = receiver.receive(&range(20, 29, 30), &[0; 10]).await;

        assert!(matches!(
            result,
            Err(UploadError::Corrupted { expected: 20, actual: 10 })
        ));
        assert_eq!(receiver.current_size().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_missing_file_for_later_chunk_is_corruption() {
        let temp_dir = TempDir::new().unwrap();
        let receiver = ChunkReceiver::new(temp_dir.path().join("course.tar.gz"));

        let result = receiver.receive(&range(10, 19, 30), &[0; 10]).await;
        assert!(matches!(result, Err(UploadError::Corrupted { .. })));
        assert!(!receiver.archive_path().exists());
    }

    #[tokio::test]
    async fn test_replayed_final_chunk_is_not_appended() {
        let temp_dir = TempDir::new().unwrap();
        let receiver = ChunkReceiver::new(temp_dir.path().join("course.tar.gz"));

        receiver.receive(&range(0, 9, 20), &[1; 10]).await.unwrap();
        receiver.receive(&range(10, 19, 20), &[2; 10]).await.unwrap();
        let replay = receiver.receive(&range(10, 19, 20), &[2; 10]).await.unwrap();

        assert_eq!(replay, ChunkProgress::ReplayedFinal { size: 20 });
        assert_eq!(receiver.current_size().await.unwrap(), 20);
    }

    #[tokio::test]
    async fn test_retried_middle_chunk_replaces_tail() {
        let temp_dir = TempDir::new().unwrap();
        let receiver = ChunkReceiver::new(temp_dir.path().join("course.tar.gz"));

        receiver.receive(&range(0, 9, 30), &[1; 10]).await.unwrap();
        receiver.receive(&range(10, 19, 30), &[2; 10]).await.unwrap();
        let retried = receiver.receive(&range(10, 19, 30), &[3; 10]).await.unwrap();

        assert_eq!(retried, ChunkProgress::Partial { size: 20 });
        let contents = std::fs::read(receiver.archive_path()).unwrap();
        assert_eq!(&contents[10..], &[3; 10]);
    }

    #[tokio::test]
    async fn test_first_chunk_truncates_previous_attempt() {
        let temp_dir = TempDir::new().unwrap();
        let receiver = ChunkReceiver::new(temp_dir.path().join("course.tar.gz"));

        receiver.receive(&range(0, 19, 40), &[1; 20]).await.unwrap();
        let restarted = receiver
            .receive(&ByteRange::WHOLE_BODY, b"whole archive")
            .await
            .unwrap();

        assert_eq!(restarted, ChunkProgress::Complete { size: 13 });
    }
}

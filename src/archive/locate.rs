//! Descriptor lookup inside an extracted archive

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

/// Lazy walk over every regular file below a directory
///
/// Yields `(file name, containing directory)`. Within a directory, files
/// come before subdirectories and names are visited in sorted order, so the
/// shallowest descriptor wins.
pub struct ArchiveFiles {
    walker: walkdir::IntoIter,
}

impl Iterator for ArchiveFiles {
    type Item = (String, PathBuf);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.walker.next()? {
                Ok(entry) if entry.file_type().is_file() => {
                    let Some(dir) = entry.path().parent() else {
                        continue;
                    };
                    return Some((entry.file_name().to_string_lossy().into_owned(), dir.to_path_buf()));
                }
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable archive entry");
                    continue;
                }
            }
        }
    }
}

fn files_first(a: &DirEntry, b: &DirEntry) -> Ordering {
    a.file_type()
        .is_dir()
        .cmp(&b.file_type().is_dir())
        .then_with(|| a.file_name().cmp(b.file_name()))
}

/// Walk `dir` without following symlinks
pub fn archive_files(dir: &Path) -> ArchiveFiles {
    ArchiveFiles {
        walker: WalkDir::new(dir)
            .follow_links(false)
            .sort_by(files_first)
            .into_iter(),
    }
}

/// Directory holding the first file named `descriptor`, if any
pub fn find_descriptor_dir(dir: &Path, descriptor: &str) -> Option<PathBuf> {
    archive_files(dir)
        .find(|(name, _)| name == descriptor)
        .map(|(_, parent)| parent)
}

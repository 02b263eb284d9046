//! Safe tar extraction
//!
//! Archives come from untrusted uploads. Every member is checked before
//! anything is written; a single bad member rejects the whole archive:
//! - `../../etc/passwd` or `/etc/passwd` member paths
//! - symlinks or hard links pointing outside the destination
//! - device and FIFO members

use std::collections::{HashMap, VecDeque};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::{Archive, EntryType};

use super::ExtractError;

type CourseArchive = Archive<GzDecoder<BufReader<File>>>;

fn open_archive(path: &Path) -> Result<CourseArchive, ExtractError> {
    let file = File::open(path)?;
    Ok(Archive::new(GzDecoder::new(BufReader::new(file))))
}

/// Extract a gzip tar into `destination`, refusing anything that escapes it
///
/// Returns the number of members written.
pub fn safe_extract_all(archive_path: &Path, destination: &Path) -> Result<usize, ExtractError> {
    check_members(archive_path)?;
    extract_members(archive_path, destination)
}

/// Validation pass over every member
///
/// Link targets are resolved through every symlink the archive declares, in
/// any order, so `d -> .` followed by `x -> d/../secret` is caught.
pub fn check_members(archive_path: &Path) -> Result<usize, ExtractError> {
    let mut archive = open_archive(archive_path)?;
    let mut symlinks: HashMap<PathBuf, PathBuf> = HashMap::new();
    let mut links = Vec::new();
    let mut count = 0;

    for entry in archive.entries().map_err(invalid_archive)? {
        let entry = entry.map_err(invalid_archive)?;
        let path = entry.path().map_err(invalid_archive)?.into_owned();
        let member = member_path(&path)?;

        match entry.header().entry_type() {
            EntryType::Symlink => {
                let link = link_target(&entry, &path)?;
                symlinks.insert(member.clone(), link.clone());
                links.push((path, member, link, true));
            }
            EntryType::Link => {
                let link = link_target(&entry, &path)?;
                links.push((path, member, link, false));
            }
            EntryType::Char | EntryType::Block | EntryType::Fifo => {
                return Err(ExtractError::Suspicious(format!(
                    "{} is a device or FIFO",
                    path.display()
                )));
            }
            _ => {}
        }

        count += 1;
    }

    for (path, member, link, symbolic) in links {
        let (kind, base) = if symbolic {
            ("Symlink", member.parent().unwrap_or(Path::new("")))
        } else {
            ("Hard link", Path::new(""))
        };
        if resolve_through_links(&symlinks, base, &link).is_none() {
            return Err(ExtractError::Suspicious(format!(
                "{} ({} -> {}) is illegal: leads outside the extraction directory",
                kind,
                path.display(),
                link.display()
            )));
        }
    }

    Ok(count)
}

/// Extraction pass; members were validated by [`check_members`]
fn extract_members(archive_path: &Path, destination: &Path) -> Result<usize, ExtractError> {
    let root = destination.canonicalize()?;
    let mut archive = open_archive(archive_path)?;
    let mut written = 0;
    let mut created_links = Vec::new();

    for entry in archive.entries().map_err(invalid_archive)? {
        let mut entry = entry.map_err(invalid_archive)?;
        let path = entry.path().map_err(invalid_archive)?.into_owned();
        let member = member_path(&path)?;
        if member.as_os_str().is_empty() {
            continue;
        }

        let target = root.join(&member);
        let entry_type = entry.header().entry_type();

        match entry_type {
            EntryType::Directory => {
                fs::create_dir_all(&target)?;
                ensure_within(&root, &target, &path)?;
            }
            EntryType::Regular | EntryType::Continuous | EntryType::GNUSparse => {
                prepare_parent(&root, &target, &path)?;
                remove_stale_link(&target)?;
                entry.unpack(&target).map_err(invalid_archive)?;
            }
            EntryType::Symlink => {
                prepare_parent(&root, &target, &path)?;
                remove_stale_link(&target)?;
                entry.unpack(&target).map_err(invalid_archive)?;
                created_links.push((target, path));
            }
            EntryType::Link => {
                let link = link_target(&entry, &path)?;
                let source = resolve_within(Path::new(""), &link)
                    .map(|relative| root.join(relative))
                    .ok_or_else(|| {
                        ExtractError::Suspicious(format!("Hard link {} is illegal", path.display()))
                    })?;
                ensure_within(&root, &source, &path)?;
                prepare_parent(&root, &target, &path)?;
                remove_stale_link(&target)?;
                fs::hard_link(&source, &target)?;
            }
            // Metadata-only members (pax/GNU headers) carry no content
            _ => continue,
        }

        written += 1;
    }

    // Dangling links cannot be followed; everything else must stay inside
    for (link, member) in created_links {
        if let Ok(real) = link.canonicalize() {
            if !real.starts_with(&root) {
                return Err(ExtractError::Suspicious(format!(
                    "Symlink {} leads outside the extraction directory",
                    member.display()
                )));
            }
        }
    }

    Ok(written)
}

/// Relative, normalized member path
fn member_path(path: &Path) -> Result<PathBuf, ExtractError> {
    resolve_within(Path::new(""), path).ok_or_else(|| {
        ExtractError::Suspicious(format!(
            "Illegal path {}: leads outside the extraction directory",
            path.display()
        ))
    })
}

fn link_target<R: std::io::Read>(entry: &tar::Entry<'_, R>, path: &Path) -> Result<PathBuf, ExtractError> {
    entry
        .link_name()
        .map_err(invalid_archive)?
        .map(|link| link.into_owned())
        .ok_or_else(|| ExtractError::InvalidArchive(format!("{} has no link target", path.display())))
}

/// Join `path` onto the relative directory `base` without leaving the root
///
/// Returns `None` for absolute paths and for `..` components that would
/// climb above the root.
pub fn resolve_within(base: &Path, path: &Path) -> Option<PathBuf> {
    let mut resolved = base.to_path_buf();
    for component in path.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(resolved)
}

/// Upper bound on symlink substitutions while resolving one path
const MAX_LINK_HOPS: usize = 40;

enum Step {
    Up,
    Name(OsString),
}

fn steps(path: &Path) -> Option<Vec<Step>> {
    let mut steps = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => steps.push(Step::Name(part.to_os_string())),
            Component::CurDir => {}
            Component::ParentDir => steps.push(Step::Up),
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(steps)
}

/// Like [`resolve_within`], but every prefix that names a symlink member is
/// replaced by that link's target before continuing
///
/// `None` when the path climbs above the root, is absolute, or loops.
pub fn resolve_through_links(
    symlinks: &HashMap<PathBuf, PathBuf>,
    base: &Path,
    path: &Path,
) -> Option<PathBuf> {
    let mut pending: VecDeque<Step> = steps(base)?.into_iter().chain(steps(path)?).collect();
    let mut resolved = PathBuf::new();
    let mut hops = 0;

    while let Some(step) = pending.pop_front() {
        match step {
            Step::Up => {
                if !resolved.pop() {
                    return None;
                }
            }
            Step::Name(part) => {
                let candidate = resolved.join(&part);
                match symlinks.get(&candidate) {
                    Some(target) => {
                        hops += 1;
                        if hops > MAX_LINK_HOPS {
                            return None;
                        }
                        for step in steps(target)?.into_iter().rev() {
                            pending.push_front(step);
                        }
                    }
                    None => resolved = candidate,
                }
            }
        }
    }

    Some(resolved)
}

fn prepare_parent(root: &Path, target: &Path, member: &Path) -> Result<(), ExtractError> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
        ensure_within(root, parent, member)?;
    }
    Ok(())
}

/// Catch symlinked directories created by earlier members
fn ensure_within(root: &Path, path: &Path, member: &Path) -> Result<(), ExtractError> {
    let real = path.canonicalize()?;
    if real.starts_with(root) {
        Ok(())
    } else {
        Err(ExtractError::Suspicious(format!(
            "{} would be written outside the extraction directory",
            member.display()
        )))
    }
}

fn remove_stale_link(target: &Path) -> Result<(), ExtractError> {
    if let Ok(metadata) = fs::symlink_metadata(target) {
        if metadata.file_type().is_symlink() {
            fs::remove_file(target)?;
        }
    }
    Ok(())
}

fn invalid_archive(e: std::io::Error) -> ExtractError {
    ExtractError::InvalidArchive(e.to_string())
}

// ============================================================================
// Tests
// ============================================================================

//! File tree enumeration.
//!
//! Listings are raw: [`relative_files`] never filters, callers apply their
//! own exclusion policy with [`crate::path::covered_by`]. [`files`] and
//! [`delete_filesystem`] are the whitelist-aware variants used when
//! snapshotting or resetting a build root.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use kaniko_common::{KanikoError, KanikoResult};
use walkdir::{DirEntry, WalkDir};

use crate::path::{PathSet, has_prefix, join_under};

/// List every node below `root/subdirectory`, relative to `root`.
///
/// The scan directory itself is included; the root is reported as `.`.
/// An empty `subdirectory` walks all of `root`. Order is unspecified.
///
/// # Errors
///
/// Returns an error if the subdirectory escapes `root` or a node cannot be
/// read.
pub fn relative_files(
    subdirectory: impl AsRef<Path>,
    root: impl AsRef<Path>,
) -> KanikoResult<Vec<PathBuf>> {
    let root = root.as_ref();
    let subdirectory = subdirectory.as_ref();
    let start = join_under(root, subdirectory).ok_or_else(|| KanikoError::EscapesRoot {
        path: subdirectory.to_path_buf(),
    })?;

    tracing::debug!(root = %root.display(), start = %start.display(), "Listing files");

    let mut files = Vec::new();
    for entry in WalkDir::new(&start) {
        let entry = entry.map_err(|e| walk_error(e, &start))?;
        files.push(relative_to(root, entry.path()));
    }
    Ok(files)
}

/// List every node below `root` as an absolute in-image path, without
/// descending into whitelisted subtrees.
///
/// # Errors
///
/// Returns an error if a node cannot be read.
pub fn files(root: impl AsRef<Path>, whitelist: &PathSet) -> KanikoResult<Vec<PathBuf>> {
    let root = root.as_ref();
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| !whitelist.covers(image_path(root, entry.path())));
    for entry in walker {
        let entry = entry.map_err(|e| walk_error(e, root))?;
        files.push(image_path(root, entry.path()));
    }

    tracing::debug!(root = %root.display(), count = files.len(), "Collected files");
    Ok(files)
}

/// Remove everything below `root` that the whitelist does not cover.
///
/// Directories leading to a whitelisted path are kept so the whitelisted
/// content stays reachable. Returns the number of removed nodes.
///
/// # Errors
///
/// Returns an error if a node cannot be read or removed.
pub fn delete_filesystem(root: impl AsRef<Path>, whitelist: &PathSet) -> KanikoResult<usize> {
    let root = root.as_ref();
    tracing::info!(root = %root.display(), "Deleting filesystem");

    let mut removed = 0;
    let mut walker = WalkDir::new(root).min_depth(1).into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry.map_err(|e| walk_error(e, root))?;
        let image = image_path(root, entry.path());

        if whitelist.covers(&image) {
            if entry.file_type().is_dir() {
                walker.skip_current_dir();
            }
            continue;
        }
        // Ancestor of a whitelisted path.
        if whitelist.iter().any(|w| has_prefix(w, &image)) {
            continue;
        }

        remove(&entry)?;
        removed += 1;
        if entry.file_type().is_dir() {
            walker.skip_current_dir();
        }
    }

    Ok(removed)
}

fn remove(entry: &DirEntry) -> KanikoResult<()> {
    let path = entry.path();
    tracing::debug!(path = %path.display(), "Removing");
    let result = if entry.file_type().is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|e| KanikoError::filesystem(path, e))
}

fn relative_to(root: &Path, path: &Path) -> PathBuf {
    match path.strip_prefix(root) {
        Ok(rel) if rel.as_os_str().is_empty() => PathBuf::from("."),
        Ok(rel) => rel.to_path_buf(),
        Err(_) => path.to_path_buf(),
    }
}

fn image_path(root: &Path, path: &Path) -> PathBuf {
    Path::new("/").join(path.strip_prefix(root).unwrap_or(path))
}

fn walk_error(err: walkdir::Error, fallback: &Path) -> KanikoError {
    let path = err.path().unwrap_or(fallback).to_path_buf();
    KanikoError::filesystem(path, io::Error::from(err))
}

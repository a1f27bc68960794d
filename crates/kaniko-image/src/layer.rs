//! Layer materialization.
//!
//! Entries are applied one at a time, strictly in archive order, onto a
//! destination root. The filesystem is the only state: missing ancestors are
//! created with [`DEFAULT_DIR_MODE`] and an explicit directory entry always
//! overwrites the mode, so the last directory header for a path wins no
//! matter where it appears in the stream.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use kaniko_common::error::PathContext;
use kaniko_common::{KanikoError, KanikoResult};
use kaniko_fs::path::{has_prefix, join_under, parent_directories};
use rustix::fs::{AtFlags, CWD, Mode, chmodat, fchmod};

use crate::entry::{ArchiveEntry, EntryKind};

/// Mode given to directories created implicitly to host a descendant.
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// Permission, setuid, setgid and sticky bits.
const PERMISSION_BITS: u32 = 0o7777;

/// Applies archive entries onto a fixed destination root.
#[derive(Debug, Clone)]
pub struct Materializer {
    /// Destination root.
    root: PathBuf,
}

impl Materializer {
    /// Create a materializer for `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Destination root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Apply one entry. See [`apply`].
    ///
    /// # Errors
    ///
    /// See [`apply`].
    pub fn apply<R: Read + ?Sized>(
        &self,
        entry: &ArchiveEntry,
        content: &mut R,
    ) -> KanikoResult<()> {
        apply(&self.root, entry, content)
    }
}

/// Apply one archive entry onto `root`.
///
/// `content` supplies exactly `size` bytes for regular files and is not read
/// for other kinds. Applying the same entry twice leaves the same state.
///
/// # Errors
///
/// Returns [`KanikoError::EscapesRoot`] if the entry or a hardlink source
/// resolves outside `root`, and [`KanikoError::Filesystem`] carrying the
/// offending path for any I/O failure. Effects applied before the failure
/// stay on disk.
pub fn apply<R: Read + ?Sized>(
    root: &Path,
    entry: &ArchiveEntry,
    content: &mut R,
) -> KanikoResult<()> {
    let path = join_under(root, &entry.name).ok_or_else(|| KanikoError::EscapesRoot {
        path: entry.name.clone(),
    })?;

    tracing::debug!(
        path = %path.display(),
        kind = %entry.kind,
        mode = format_args!("{:o}", entry.mode),
        "Applying entry"
    );

    if path == root {
        return match entry.kind {
            EntryKind::Directory => set_mode(&path, entry.mode),
            _ => Err(KanikoError::filesystem(
                path,
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "only a directory entry may name the extraction root",
                ),
            )),
        };
    }

    let real_root = root.canonicalize().at_path(root)?;
    create_parents(root, &real_root, &path)?;

    match &entry.kind {
        EntryKind::Regular { size } => {
            clear_conflicting(&path, &entry.kind)?;
            write_regular(&path, content, *size, entry.mode)
        }
        EntryKind::Directory => {
            clear_conflicting(&path, &entry.kind)?;
            write_directory(&path, entry.mode)
        }
        EntryKind::Symlink { target } => {
            clear_conflicting(&path, &entry.kind)?;
            std::os::unix::fs::symlink(target, &path).at_path(&path)
        }
        EntryKind::Hardlink { target } => {
            let source = join_under(root, target).ok_or_else(|| KanikoError::EscapesRoot {
                path: target.clone(),
            })?;
            if source == path {
                return Ok(());
            }
            if let Some(parent) = source.parent() {
                ensure_inside(&real_root, parent)?;
            }
            clear_conflicting(&path, &entry.kind)?;
            fs::hard_link(&source, &path).at_path(&path)
        }
    }
}

/// Write `content` to `path`, creating missing parents with
/// [`DEFAULT_DIR_MODE`], then apply `mode`. Returns the bytes written.
///
/// # Errors
///
/// Returns [`KanikoError::Filesystem`] if a parent, the file or its mode
/// cannot be written.
pub fn create_file<R: Read + ?Sized>(
    path: &Path,
    content: &mut R,
    mode: u32,
) -> KanikoResult<u64> {
    for dir in parent_directories(path) {
        if fs::symlink_metadata(&dir).is_err() {
            create_dir(&dir)?;
        }
    }

    let mut file = File::create(path).at_path(path)?;
    let written = io::copy(content, &mut file).at_path(path)?;
    set_file_mode(&file, path, mode)?;
    Ok(written)
}

/// Create every missing ancestor of `path` strictly below `root`.
///
/// Existing ancestors that are symlinks must resolve inside the root.
fn create_parents(root: &Path, real_root: &Path, path: &Path) -> KanikoResult<()> {
    for dir in parent_directories(path) {
        if dir == root || !has_prefix(&dir, root) {
            continue;
        }
        match fs::symlink_metadata(&dir) {
            Ok(meta) if meta.file_type().is_symlink() => ensure_inside(real_root, &dir)?,
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => create_dir(&dir)?,
            Err(e) => return Err(KanikoError::filesystem(dir, e)),
        }
    }
    Ok(())
}

fn ensure_inside(real_root: &Path, dir: &Path) -> KanikoResult<()> {
    let real = dir.canonicalize().at_path(dir)?;
    if has_prefix(&real, real_root) {
        Ok(())
    } else {
        Err(KanikoError::EscapesRoot {
            path: dir.to_path_buf(),
        })
    }
}

/// Remove whatever occupies `path` unless it can be reused by `kind`.
///
/// Only directories are kept, and only for directory entries. Regular files
/// are unlinked rather than truncated so other hardlinks to the old inode
/// keep their content.
fn clear_conflicting(path: &Path, kind: &EntryKind) -> KanikoResult<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(KanikoError::filesystem(path, e)),
    };

    let file_type = meta.file_type();
    if matches!(kind, EntryKind::Directory) && file_type.is_dir() {
        return Ok(());
    }

    tracing::debug!(path = %path.display(), "Replacing existing entry");
    if file_type.is_dir() {
        fs::remove_dir_all(path).at_path(path)
    } else {
        fs::remove_file(path).at_path(path)
    }
}

fn write_regular<R: Read + ?Sized>(
    path: &Path,
    content: &mut R,
    size: u64,
    mode: u32,
) -> KanikoResult<()> {
    let mut file = File::create(path).at_path(path)?;
    let written = io::copy(&mut content.take(size), &mut file).at_path(path)?;
    if written != size {
        return Err(KanikoError::filesystem(
            path,
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("expected {size} bytes of content, got {written}"),
            ),
        ));
    }
    // Mode goes on after the write so creation-time umask never sticks.
    set_file_mode(&file, path, mode)
}

fn write_directory(path: &Path, mode: u32) -> KanikoResult<()> {
    match fs::create_dir(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(KanikoError::filesystem(path, e)),
    }
    set_mode(path, mode)
}

/// Create a single directory with [`DEFAULT_DIR_MODE`].
fn create_dir(dir: &Path) -> KanikoResult<()> {
    match fs::create_dir(dir) {
        Ok(()) => {
            tracing::debug!(path = %dir.display(), "Created parent directory");
            set_mode(dir, DEFAULT_DIR_MODE)
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(KanikoError::filesystem(dir, e)),
    }
}

fn set_mode(path: &Path, mode: u32) -> KanikoResult<()> {
    chmodat(
        CWD,
        path,
        Mode::from_raw_mode(mode & PERMISSION_BITS),
        AtFlags::empty(),
    )
    .map_err(|e| KanikoError::filesystem(path, e.into()))
}

fn set_file_mode(file: &File, path: &Path, mode: u32) -> KanikoResult<()> {
    fchmod(file, Mode::from_raw_mode(mode & PERMISSION_BITS))
        .map_err(|e| KanikoError::filesystem(path, e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn mode_of(path: &Path) -> u32 {
        fs::symlink_metadata(path).unwrap().permissions().mode() & PERMISSION_BITS
    }

    #[test]
    fn rejects_names_escaping_root() {
        let temp = tempdir().unwrap();
        let entry = ArchiveEntry::regular("../outside", 0o644, 0);
        let err = apply(temp.path(), &entry, &mut io::empty()).unwrap_err();
        assert!(matches!(err, KanikoError::EscapesRoot { .. }));
    }

    #[test]
    fn rejects_writes_through_escaping_symlink() {
        let temp = tempdir().unwrap();
        let outside = tempdir().unwrap();
        let root = temp.path();

        let link = ArchiveEntry::symlink("./escape", outside.path());
        apply(root, &link, &mut io::empty()).unwrap();

        let file = ArchiveEntry::regular("./escape/owned", 0o644, 0);
        let err = apply(root, &file, &mut io::empty()).unwrap_err();
        assert!(matches!(err, KanikoError::EscapesRoot { .. }));
        assert!(!outside.path().join("owned").exists());
    }

    #[test]
    fn short_content_is_filesystem_error() {
        let temp = tempdir().unwrap();
        let entry = ArchiveEntry::regular("./short", 0o644, 10);
        let err = apply(temp.path(), &entry, &mut &b"abc"[..]).unwrap_err();
        assert_eq!(err.path(), Some(temp.path().join("short").as_path()));
    }

    #[test]
    fn directory_replaces_file() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        apply(root, &ArchiveEntry::regular("./foo", 0o644, 3), &mut &b"abc"[..]).unwrap();
        apply(root, &ArchiveEntry::directory("./foo", 0o700), &mut io::empty()).unwrap();

        assert!(root.join("foo").is_dir());
        assert_eq!(mode_of(&root.join("foo")), 0o700);
    }

    #[test]
    fn symlink_reapplied_is_recreated() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        let entry = ArchiveEntry::symlink("./bar", "bar/bat");
        apply(root, &entry, &mut io::empty()).unwrap();
        apply(root, &entry, &mut io::empty()).unwrap();

        assert_eq!(fs::read_link(root.join("bar")).unwrap(), PathBuf::from("bar/bat"));
    }

    #[test]
    fn root_directory_entry_sets_root_mode() {
        let temp = tempdir().unwrap();
        apply(temp.path(), &ArchiveEntry::directory("./", 0o750), &mut io::empty()).unwrap();
        assert_eq!(mode_of(temp.path()), 0o750);

        let err = apply(temp.path(), &ArchiveEntry::regular(".", 0o644, 0), &mut io::empty())
            .unwrap_err();
        assert!(matches!(err, KanikoError::Filesystem { .. }));
    }

    #[test]
    fn rewriting_hardlink_leaves_other_names_alone() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        apply(root, &ArchiveEntry::regular("./bin/gzip", 0o755, 4), &mut &b"gzip"[..]).unwrap();
        apply(
            root,
            &ArchiveEntry::hardlink("./bin/uncompress", "./bin/gzip"),
            &mut io::empty(),
        )
        .unwrap();
        apply(
            root,
            &ArchiveEntry::regular("./bin/uncompress", 0o700, 3),
            &mut &b"new"[..],
        )
        .unwrap();

        assert_eq!(fs::read(root.join("bin/gzip")).unwrap(), b"gzip");
        assert_eq!(mode_of(&root.join("bin/gzip")), 0o755);
        assert_eq!(fs::read(root.join("bin/uncompress")).unwrap(), b"new");
    }

    #[test]
    fn read_only_file_is_replaced() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        let entry = ArchiveEntry::regular("./etc/ro", 0o444, 2);
        apply(root, &entry, &mut &b"v1"[..]).unwrap();
        apply(root, &entry, &mut &b"v2"[..]).unwrap();

        assert_eq!(fs::read(root.join("etc/ro")).unwrap(), b"v2");
        assert_eq!(mode_of(&root.join("etc/ro")), 0o444);
    }

    #[test]
    fn create_file_makes_parents() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("a/b/c.txt");
        let written = create_file(&path, &mut &b"hello"[..], 0o600).unwrap();

        assert_eq!(written, 5);
        assert_eq!(fs::read(&path).unwrap(), b"hello");
        assert_eq!(mode_of(&path), 0o600);
        assert_eq!(mode_of(&temp.path().join("a/b")), DEFAULT_DIR_MODE);
    }
}

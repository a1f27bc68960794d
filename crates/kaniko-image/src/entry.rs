//! Archive entry model.

use std::fmt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use kaniko_common::{KanikoError, KanikoResult};
use tar::EntryType;

/// The kind of an archive entry, with its kind-specific payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file whose content follows as a stream of `size` bytes.
    Regular {
        /// Content length in bytes.
        size: u64,
    },
    /// Directory.
    Directory,
    /// Symbolic link, target stored verbatim.
    Symlink {
        /// Link target.
        target: PathBuf,
    },
    /// Hard link to an entry materialized earlier in the archive.
    Hardlink {
        /// Archive name of the link source.
        target: PathBuf,
    },
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Regular { .. } => "regular file",
            Self::Directory => "directory",
            Self::Symlink { .. } => "symlink",
            Self::Hardlink { .. } => "hardlink",
        };
        f.write_str(name)
    }
}

/// One archive entry, detached from its content stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Entry name as stored in the archive, e.g. `./usr/bin/env`.
    pub name: PathBuf,
    /// Permission bits.
    pub mode: u32,
    /// Entry kind.
    pub kind: EntryKind,
}

impl ArchiveEntry {
    /// A regular file entry.
    pub fn regular(name: impl Into<PathBuf>, mode: u32, size: u64) -> Self {
        Self {
            name: name.into(),
            mode,
            kind: EntryKind::Regular { size },
        }
    }

    /// A directory entry.
    pub fn directory(name: impl Into<PathBuf>, mode: u32) -> Self {
        Self {
            name: name.into(),
            mode,
            kind: EntryKind::Directory,
        }
    }

    /// A symlink entry.
    pub fn symlink(name: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            mode: 0o777,
            kind: EntryKind::Symlink {
                target: target.into(),
            },
        }
    }

    /// A hardlink entry.
    pub fn hardlink(name: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            mode: 0,
            kind: EntryKind::Hardlink {
                target: target.into(),
            },
        }
    }

    /// Content length; zero for anything but regular files.
    #[must_use]
    pub fn size(&self) -> u64 {
        match self.kind {
            EntryKind::Regular { size } => size,
            _ => 0,
        }
    }

    /// Link target of symlinks and hardlinks.
    #[must_use]
    pub fn link_target(&self) -> Option<&Path> {
        match &self.kind {
            EntryKind::Symlink { target } | EntryKind::Hardlink { target } => Some(target),
            _ => None,
        }
    }

    /// Convert a tar entry header.
    ///
    /// # Errors
    ///
    /// Returns [`KanikoError::UnsupportedEntry`] for devices, fifos and
    /// other kinds the materializer does not handle, or an error if the
    /// header is corrupt.
    pub fn from_tar<R: Read>(entry: &tar::Entry<'_, R>) -> KanikoResult<Self> {
        let name = entry.path()?.into_owned();
        let header = entry.header();
        let mode = header.mode().map_err(|e| KanikoError::filesystem(&name, e))?;

        let kind = match header.entry_type() {
            EntryType::Regular | EntryType::Continuous => EntryKind::Regular { size: entry.size() },
            EntryType::Directory => EntryKind::Directory,
            EntryType::Symlink => EntryKind::Symlink {
                target: link_name(entry, &name)?,
            },
            EntryType::Link => EntryKind::Hardlink {
                target: link_name(entry, &name)?,
            },
            other => {
                return Err(KanikoError::UnsupportedEntry {
                    path: name,
                    kind: format!("{other:?}"),
                });
            }
        };

        Ok(Self { name, mode, kind })
    }

    /// Returns true for records that carry metadata for other entries
    /// rather than filesystem content.
    #[must_use]
    pub const fn is_metadata(entry_type: EntryType) -> bool {
        matches!(
            entry_type,
            EntryType::XGlobalHeader
                | EntryType::XHeader
                | EntryType::GNULongName
                | EntryType::GNULongLink
        )
    }
}

fn link_name<R: Read>(entry: &tar::Entry<'_, R>, name: &Path) -> KanikoResult<PathBuf> {
    entry
        .link_name()
        .map_err(|e| KanikoError::filesystem(name, e))?
        .map(std::borrow::Cow::into_owned)
        .ok_or_else(|| {
            KanikoError::filesystem(
                name,
                io::Error::new(io::ErrorKind::InvalidData, "link entry without a target"),
            )
        })
}

//! Common error types for the kaniko filesystem core.

use std::path::{Path, PathBuf};

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`KanikoError`].
pub type KanikoResult<T> = Result<T, KanikoError>;

/// Common errors across the kaniko crates.
#[derive(Error, Diagnostic, Debug)]
pub enum KanikoError {
    /// The mount table could not be read.
    #[error("Failed to read mount table {}: {source}", path.display())]
    #[diagnostic(
        code(kaniko::config),
        help("Check that procfs is mounted or point KANIKO_MOUNTINFO at a readable file")
    )]
    Config {
        /// The mount table path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A filesystem operation failed on a specific path.
    #[error("Filesystem error at {}: {source}", path.display())]
    #[diagnostic(code(kaniko::fs))]
    Filesystem {
        /// The offending path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// An archive entry resolves to a location outside the destination root.
    #[error("Path escapes destination root: {}", path.display())]
    #[diagnostic(
        code(kaniko::fs::escapes_root),
        help("Entry names and hardlink targets must stay below the extraction root")
    )]
    EscapesRoot {
        /// The offending entry path.
        path: PathBuf,
    },

    /// The archive contains an entry kind the materializer cannot apply.
    #[error("Unsupported archive entry {} of type {kind}", path.display())]
    #[diagnostic(
        code(kaniko::archive::unsupported),
        help("Only regular files, directories, symlinks and hardlinks are supported")
    )]
    UnsupportedEntry {
        /// The entry path.
        path: PathBuf,
        /// The raw entry type as reported by the archive.
        kind: String,
    },

    /// Best-effort extraction finished with failed entries.
    #[error("{failed} archive entries failed to extract, first: {first}")]
    #[diagnostic(code(kaniko::archive::incomplete))]
    Extraction {
        /// Number of failed entries.
        failed: usize,
        /// Message of the first failure.
        first: String,
    },

    /// Two parallel extraction jobs target overlapping roots.
    #[error("Extraction roots overlap: {} and {}", first.display(), second.display())]
    #[diagnostic(
        code(kaniko::archive::overlapping_roots),
        help("Parallel extraction requires disjoint destination roots")
    )]
    OverlappingRoots {
        /// The first root.
        first: PathBuf,
        /// The root nested in or equal to the first.
        second: PathBuf,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(kaniko::io))]
    Io(#[from] std::io::Error),

    /// Internal error (should not happen).
    #[error("Internal error: {message}")]
    #[diagnostic(code(kaniko::internal))]
    Internal {
        /// The error message.
        message: String,
    },
}

impl KanikoError {
    /// Build a [`KanikoError::Filesystem`] for `path`.
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// The path this error is attached to, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Config { path, .. }
            | Self::Filesystem { path, .. }
            | Self::EscapesRoot { path }
            | Self::UnsupportedEntry { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Attach a path to I/O results.
pub trait PathContext<T> {
    /// Convert an I/O error into [`KanikoError::Filesystem`] carrying `path`.
    fn at_path(self, path: &Path) -> KanikoResult<T>;
}

impl<T> PathContext<T> for std::io::Result<T> {
    fn at_path(self, path: &Path) -> KanikoResult<T> {
        self.map_err(|e| KanikoError::filesystem(path, e))
    }
}

//! Multi-layer unpacking.
//!
//! Rebuilds an image filesystem from its layers. Layers are visited newest
//! first, so a path materialized by a newer layer is never overwritten by an
//! older one, and whiteouts recorded by a layer hide matching content in
//! every layer below it.

use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};

use kaniko_common::{KanikoError, KanikoResult};
use kaniko_fs::path::{PathSet, WhiteoutSet, absolute, has_prefix, join_under};

use crate::archive::decompress;
use crate::entry::{ArchiveEntry, EntryKind};
use crate::layer;

/// Prefix marking a deleted sibling.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Marker hiding all lower-layer content of its directory.
pub const WHITEOUT_OPAQUE: &str = ".wh..wh..opq";

/// Counters from [`unpack_layers`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnpackSummary {
    /// Layers processed.
    pub layers: usize,
    /// Entries materialized.
    pub applied: usize,
    /// Entries skipped: whiteout markers, whited-out, shadowed or
    /// whitelisted paths.
    pub skipped: usize,
}

/// Why an entry is not materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Skip {
    WhitedOut,
    Opaque,
    Shadowed,
    Replaced,
    Whitelisted,
}

struct LayerState<'a> {
    whitelist: &'a PathSet,
    whiteouts: WhiteoutSet,
    opaque: PathSet,
    /// Paths a newer layer wrote as something other than a directory.
    replaced: PathSet,
    seen: HashSet<PathBuf>,
}

impl LayerState<'_> {
    fn skip_reason(&self, path: &Path, entry: &ArchiveEntry) -> Option<Skip> {
        if self.whiteouts.covers(path) {
            return Some(Skip::WhitedOut);
        }
        if self.opaque.iter().any(|dir| path != dir && has_prefix(path, dir)) {
            return Some(Skip::Opaque);
        }
        if self.seen.contains(path) {
            return Some(Skip::Shadowed);
        }
        if self.replaced.iter().any(|p| path != p && has_prefix(path, p)) {
            return Some(Skip::Replaced);
        }
        if self.whitelist.covers(path) {
            return Some(Skip::Whitelisted);
        }
        if let EntryKind::Symlink { target } = &entry.kind {
            if self.whitelist.covers(target) {
                return Some(Skip::Whitelisted);
            }
        }
        None
    }
}

/// Unpack image layers, given oldest first, onto `root`.
///
/// Whitelisted paths and symlinks pointing into the whitelist are never
/// written. Lower-layer content below a path that a newer layer turned into
/// a file or link is dropped. Hardlinks whose source comes from an older layer are applied
/// once every layer has been unpacked.
///
/// # Errors
///
/// Returns the first error reading a layer or applying an entry.
pub fn unpack_layers<R: Read>(
    root: &Path,
    layers: Vec<R>,
    whitelist: &PathSet,
) -> KanikoResult<UnpackSummary> {
    let mut state = LayerState {
        whitelist,
        whiteouts: WhiteoutSet::new(),
        opaque: PathSet::new(),
        replaced: PathSet::new(),
        seen: HashSet::new(),
    };
    let mut summary = UnpackSummary::default();
    let mut deferred = Vec::new();

    for (index, layer) in layers.into_iter().enumerate().rev() {
        tracing::info!(layer = index, "Unpacking layer");
        let mut layer_whiteouts = Vec::new();
        let mut layer_opaque = Vec::new();
        let mut layer_replaced = Vec::new();

        let mut archive = tar::Archive::new(decompress(layer)?);
        for entry in archive.entries()? {
            let mut entry = entry?;
            if ArchiveEntry::is_metadata(entry.header().entry_type()) {
                continue;
            }

            let archive_entry = match ArchiveEntry::from_tar(&entry) {
                Ok(archive_entry) => archive_entry,
                Err(err @ KanikoError::UnsupportedEntry { .. }) => {
                    tracing::warn!(error = %err, "Skipping unsupported entry");
                    summary.skipped += 1;
                    continue;
                }
                Err(err) => return Err(err),
            };
            let path = absolute(&archive_entry.name).ok_or_else(|| KanikoError::EscapesRoot {
                path: archive_entry.name.clone(),
            })?;

            if let (Some(base), Some(dir)) = (path.file_name().and_then(|b| b.to_str()), path.parent())
            {
                if base == WHITEOUT_OPAQUE {
                    tracing::debug!(dir = %dir.display(), "Opaque directory");
                    layer_opaque.push(dir.to_path_buf());
                    summary.skipped += 1;
                    continue;
                }
                if let Some(hidden) = base.strip_prefix(WHITEOUT_PREFIX) {
                    let hidden = dir.join(hidden);
                    tracing::debug!(path = %hidden.display(), "Whiting out");
                    layer_whiteouts.push(hidden);
                    summary.skipped += 1;
                    continue;
                }
            }

            if let Some(reason) = state.skip_reason(&path, &archive_entry) {
                tracing::debug!(path = %path.display(), ?reason, "Not adding");
                summary.skipped += 1;
                continue;
            }

            if let EntryKind::Hardlink { target } = &archive_entry.kind {
                let source_missing = join_under(root, target)
                    .is_some_and(|source| std::fs::symlink_metadata(source).is_err());
                if source_missing {
                    tracing::debug!(path = %path.display(), "Deferring hardlink to a lower layer");
                    state.seen.insert(path.clone());
                    layer_replaced.push(path);
                    deferred.push(archive_entry);
                    continue;
                }
            }

            layer::apply(root, &archive_entry, &mut entry)?;
            if !matches!(archive_entry.kind, EntryKind::Directory) {
                layer_replaced.push(path.clone());
            }
            state.seen.insert(path);
            summary.applied += 1;
        }

        // A layer's whiteouts only hide content of the layers below it.
        state.whiteouts.extend(layer_whiteouts);
        state.opaque.extend(layer_opaque);
        state.replaced.extend(layer_replaced);
        summary.layers += 1;
    }

    for link in deferred {
        layer::apply(root, &link, &mut std::io::empty())?;
        summary.applied += 1;
    }

    tracing::info!(
        root = %root.display(),
        layers = summary.layers,
        applied = summary.applied,
        skipped = summary.skipped,
        "Unpacked image filesystem"
    );
    Ok(summary)
}

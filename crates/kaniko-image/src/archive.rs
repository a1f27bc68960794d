//! Whole-archive extraction.
//!
//! Streams tar entries, in archive order, into the materializer. One
//! archive is always applied sequentially; independent archives targeting
//! disjoint roots may run in parallel with [`extract_parallel`].

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use futures::future::join_all;
use kaniko_common::error::PathContext;
use kaniko_common::{KanikoError, KanikoResult};
use kaniko_fs::path::has_prefix;

use crate::entry::ArchiveEntry;
use crate::layer;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// What to do when an entry fails to apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExtractPolicy {
    /// Stop at the first failing entry and return its error.
    #[default]
    HaltOnError,
    /// Log and record the failure, then continue with the next entry.
    BestEffort,
}

/// Outcome of extracting one archive.
#[derive(Debug, Default)]
pub struct ExtractReport {
    /// Entries applied successfully.
    pub applied: usize,
    /// Entries skipped under [`ExtractPolicy::BestEffort`].
    pub failures: Vec<KanikoError>,
}

impl ExtractReport {
    /// Returns true if every entry was applied.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Turn recorded failures into an error.
    ///
    /// # Errors
    ///
    /// Returns [`KanikoError::Extraction`] if any entry failed.
    pub fn ensure_complete(self) -> KanikoResult<Self> {
        match self.failures.first() {
            None => Ok(self),
            Some(first) => Err(KanikoError::Extraction {
                failed: self.failures.len(),
                first: first.to_string(),
            }),
        }
    }
}

/// Wrap `reader` in a decoder chosen by its magic bytes.
///
/// Gzip and zstd streams are decoded; anything else is passed through as a
/// plain tar stream.
///
/// # Errors
///
/// Returns an error if the stream cannot be read or the decoder fails to
/// initialize.
pub fn decompress<'a, R: Read + 'a>(reader: R) -> KanikoResult<Box<dyn Read + 'a>> {
    let mut reader = BufReader::new(reader);
    let magic = reader.fill_buf()?;

    let decoded: Box<dyn Read + 'a> = if magic.starts_with(&GZIP_MAGIC) {
        tracing::debug!("Detected gzip layer");
        Box::new(flate2::bufread::GzDecoder::new(reader))
    } else if magic.starts_with(&ZSTD_MAGIC) {
        tracing::debug!("Detected zstd layer");
        Box::new(zstd::stream::read::Decoder::with_buffer(reader)?)
    } else {
        Box::new(reader)
    };
    Ok(decoded)
}

/// Extract an uncompressed tar stream onto `root`.
///
/// # Errors
///
/// Errors reading the archive itself are always fatal. Entry failures are
/// fatal under [`ExtractPolicy::HaltOnError`] and recorded in the report
/// under [`ExtractPolicy::BestEffort`].
pub fn extract_archive<R: Read>(
    root: &Path,
    reader: R,
    policy: ExtractPolicy,
) -> KanikoResult<ExtractReport> {
    let mut archive = tar::Archive::new(reader);
    let mut report = ExtractReport::default();

    for entry in archive.entries()? {
        let mut entry = entry?;
        if ArchiveEntry::is_metadata(entry.header().entry_type()) {
            continue;
        }

        let result = ArchiveEntry::from_tar(&entry)
            .and_then(|archive_entry| layer::apply(root, &archive_entry, &mut entry));

        match (result, policy) {
            (Ok(()), _) => report.applied += 1,
            (Err(err), ExtractPolicy::HaltOnError) => return Err(err),
            (Err(err), ExtractPolicy::BestEffort) => {
                tracing::warn!(error = %err, "Skipping entry that failed to extract");
                report.failures.push(err);
            }
        }
    }

    tracing::info!(
        root = %root.display(),
        applied = report.applied,
        failed = report.failures.len(),
        "Extracted archive"
    );
    Ok(report)
}

/// Open a possibly compressed layer file and extract it onto `root`.
///
/// # Errors
///
/// See [`extract_archive`]; also fails if `layer` cannot be opened.
pub fn extract_layer_file(
    root: &Path,
    layer: &Path,
    policy: ExtractPolicy,
) -> KanikoResult<ExtractReport> {
    tracing::debug!(layer = %layer.display(), root = %root.display(), "Extracting layer");
    let file = File::open(layer).at_path(layer)?;
    extract_archive(root, decompress(file)?, policy)
}

/// One layer file to extract onto its own root.
#[derive(Debug, Clone)]
pub struct ExtractJob {
    /// Destination root.
    pub root: PathBuf,
    /// Layer tarball, optionally gzip or zstd compressed.
    pub layer: PathBuf,
    /// Failure policy for this layer.
    pub policy: ExtractPolicy,
}

/// Extract independent layers onto disjoint roots concurrently.
///
/// Each job runs on the blocking pool; results are returned in job order.
///
/// # Errors
///
/// Returns [`KanikoError::OverlappingRoots`] before starting any work if
/// two jobs share or nest their roots.
pub async fn extract_parallel(
    jobs: Vec<ExtractJob>,
) -> KanikoResult<Vec<KanikoResult<ExtractReport>>> {
    ensure_disjoint(&jobs)?;

    let handles = jobs.into_iter().map(|job| {
        tokio::task::spawn_blocking(move || extract_layer_file(&job.root, &job.layer, job.policy))
    });

    Ok(join_all(handles)
        .await
        .into_iter()
        .map(|joined| {
            joined.unwrap_or_else(|e| {
                Err(KanikoError::Internal {
                    message: format!("Extraction worker failed: {e}"),
                })
            })
        })
        .collect())
}

fn ensure_disjoint(jobs: &[ExtractJob]) -> KanikoResult<()> {
    for (i, first) in jobs.iter().enumerate() {
        for second in &jobs[i + 1..] {
            if has_prefix(&first.root, &second.root) || has_prefix(&second.root, &first.root) {
                return Err(KanikoError::OverlappingRoots {
                    first: first.root.clone(),
                    second: second.root.clone(),
                });
            }
        }
    }
    Ok(())
}

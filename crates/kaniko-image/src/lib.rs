//! # kaniko-image
//!
//! Image layer materialization for kaniko.
//!
//! This crate provides:
//! - A closed model of archive entries
//! - Order-independent, idempotent application of entries onto a root
//! - Whole-archive extraction with an explicit failure policy
//! - Multi-layer unpacking with whiteout handling

#![warn(missing_docs)]

pub mod archive;
pub mod entry;
pub mod layer;
pub mod unpack;

pub use archive::{ExtractJob, ExtractPolicy, ExtractReport, extract_archive, extract_parallel};
pub use entry::{ArchiveEntry, EntryKind};
pub use layer::{Materializer, apply};
pub use unpack::{UnpackSummary, unpack_layers};

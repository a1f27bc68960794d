//! # kaniko-fs
//!
//! Filesystem relations used while scanning a build root.
//!
//! This crate handles:
//! - Directory-boundary aware path containment
//! - Resolving the mount whitelist from a live mount table
//! - Enumerating files below a scan root

#![warn(missing_docs)]

pub mod mounts;
pub mod path;
pub mod walk;

pub use mounts::{MountEntry, resolve_configured_whitelist, resolve_whitelist};
pub use path::{PathSet, WhiteoutSet, covered_by, has_prefix, parent_directories};
pub use walk::relative_files;

//! # kaniko-common
//!
//! Shared utilities and types for the kaniko filesystem core.
//!
//! This crate provides:
//! - The common error type used by every kaniko crate
//! - Standard builder paths (working dir, runtime dir, mount table)

#![warn(missing_docs)]

pub mod error;
pub mod paths;

pub use error::{KanikoError, KanikoResult};
pub use paths::KanikoPaths;

//! Standard filesystem paths for kaniko.

use std::path::PathBuf;

use once_cell::sync::Lazy;

/// Default working-state directory of the builder.
pub static KANIKO_DIR: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("KANIKO_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/kaniko"))
});

/// Default runtime-state directory.
pub static KANIKO_RUNTIME_DIR: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("KANIKO_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/run"))
});

/// Default mount table consulted for the scan whitelist.
pub static KANIKO_MOUNTINFO: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("KANIKO_MOUNTINFO")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/proc/self/mountinfo"))
});

/// Standard paths used by the builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KanikoPaths {
    /// Builder working-state directory (default: /kaniko).
    pub work_dir: PathBuf,
    /// Runtime-state directory (default: /var/run).
    pub runtime_dir: PathBuf,
    /// Mount table (default: /proc/self/mountinfo).
    pub mountinfo: PathBuf,
}

impl KanikoPaths {
    /// Create paths with default locations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths with a custom working directory.
    #[must_use]
    pub fn with_work_dir(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            ..Self::default()
        }
    }

    /// Directories that are always excluded from content scans.
    #[must_use]
    pub fn always_excluded(&self) -> [PathBuf; 2] {
        [self.work_dir.clone(), self.runtime_dir.clone()]
    }
}

impl Default for KanikoPaths {
    fn default() -> Self {
        Self {
            work_dir: KANIKO_DIR.clone(),
            runtime_dir: KANIKO_RUNTIME_DIR.clone(),
            mountinfo: KANIKO_MOUNTINFO.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_work_dir() {
        let paths = KanikoPaths::with_work_dir("/tmp/kaniko-test");
        assert_eq!(paths.work_dir, PathBuf::from("/tmp/kaniko-test"));
        assert_eq!(paths.runtime_dir, *KANIKO_RUNTIME_DIR);
    }

    #[test]
    fn always_excluded_contains_work_and_runtime() {
        let paths = KanikoPaths {
            work_dir: PathBuf::from("/kaniko"),
            runtime_dir: PathBuf::from("/var/run"),
            mountinfo: PathBuf::from("/proc/self/mountinfo"),
        };
        assert_eq!(
            paths.always_excluded(),
            [PathBuf::from("/kaniko"), PathBuf::from("/var/run")]
        );
    }
}

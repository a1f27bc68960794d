//! Mount table parsing.
//!
//! Mount points found in the live mount table are transient kernel or
//! virtual filesystems and never count as image content. Together with the
//! builder's own directories they form the scan whitelist.

use std::ffi::OsString;
use std::fs;
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};

use kaniko_common::{KanikoError, KanikoPaths, KanikoResult};

use crate::path::PathSet;

/// Column of the mount point in a mountinfo record.
const MOUNT_POINT_FIELD: usize = 4;

/// One mount point parsed from a mount table line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Absolute mount point, with kernel octal escapes decoded.
    pub mount_point: PathBuf,
}

impl MountEntry {
    /// Parse a mountinfo line. Returns `None` for malformed lines.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let field = line.split_whitespace().nth(MOUNT_POINT_FIELD)?;
        let mount_point = PathBuf::from(unescape(field)?);
        mount_point
            .is_absolute()
            .then_some(Self { mount_point })
    }
}

/// Resolve the scan whitelist from `mountinfo` using the default paths.
///
/// # Errors
///
/// Returns [`KanikoError::Config`] if the mount table cannot be read.
pub fn resolve_whitelist(mountinfo: impl AsRef<Path>) -> KanikoResult<PathSet> {
    resolve_whitelist_with(mountinfo, &KanikoPaths::default())
}

/// Resolve the scan whitelist from the mount table configured in `paths`.
///
/// [`KanikoPaths::default`] reads `KANIKO_MOUNTINFO`, falling back to
/// `/proc/self/mountinfo`.
///
/// # Errors
///
/// Returns [`KanikoError::Config`] if the mount table cannot be read.
pub fn resolve_configured_whitelist(paths: &KanikoPaths) -> KanikoResult<PathSet> {
    resolve_whitelist_with(&paths.mountinfo, paths)
}

/// Resolve the scan whitelist from `mountinfo`, always including the
/// working and runtime directories from `paths`.
///
/// # Errors
///
/// Returns [`KanikoError::Config`] if the mount table cannot be read.
pub fn resolve_whitelist_with(
    mountinfo: impl AsRef<Path>,
    paths: &KanikoPaths,
) -> KanikoResult<PathSet> {
    let mountinfo = mountinfo.as_ref();
    let content = fs::read_to_string(mountinfo).map_err(|source| KanikoError::Config {
        path: mountinfo.to_path_buf(),
        source,
    })?;

    let whitelist = parse_mountinfo(&content, paths);
    tracing::debug!(
        mountinfo = %mountinfo.display(),
        entries = whitelist.len(),
        "Resolved mount whitelist"
    );
    Ok(whitelist)
}

/// Build a whitelist from mount table text.
///
/// The root mount is never whitelisted. Malformed lines are skipped.
#[must_use]
pub fn parse_mountinfo(content: &str, paths: &KanikoPaths) -> PathSet {
    let mut whitelist: PathSet = paths.always_excluded().into_iter().collect();

    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match MountEntry::parse(line) {
            Some(entry) if entry.mount_point == Path::new("/") => {}
            Some(entry) => {
                whitelist.insert(entry.mount_point);
            }
            None => tracing::debug!(line = index + 1, "Skipping malformed mount table line"),
        }
    }

    whitelist
}

/// Decode the `\ooo` octal escapes the kernel uses for whitespace and
/// backslashes in mount points.
fn unescape(field: &str) -> Option<OsString> {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let digits = bytes.get(i + 1..i + 4)?;
            if !digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                return None;
            }
            let value = digits
                .iter()
                .try_fold(0u8, |acc, d| acc.checked_mul(8)?.checked_add(d - b'0'))?;
            out.push(value);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    Some(OsString::from_vec(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> KanikoPaths {
        KanikoPaths {
            work_dir: PathBuf::from("/kaniko"),
            runtime_dir: PathBuf::from("/var/run"),
            mountinfo: PathBuf::from("/proc/self/mountinfo"),
        }
    }

    #[test]
    fn parse_mount_point_column() {
        let entry =
            MountEntry::parse("229 228 0:98 / /proc rw,nosuid,nodev,noexec,relatime - proc proc rw")
                .unwrap();
        assert_eq!(entry.mount_point, PathBuf::from("/proc"));
    }

    #[test]
    fn parse_decodes_octal_escapes() {
        let entry = MountEntry::parse("40 22 0:35 / /mnt/my\\040disk rw - ext4 /dev/sdb1 rw").unwrap();
        assert_eq!(entry.mount_point, PathBuf::from("/mnt/my disk"));
    }

    #[test]
    fn parse_rejects_malformed_lines() {
        assert_eq!(MountEntry::parse("229 228 0:98 /"), None);
        assert_eq!(MountEntry::parse("229 228 0:98 / proc rw - proc proc rw"), None);
        assert_eq!(MountEntry::parse("229 228 0:98 / /bad\\09 rw - proc proc rw"), None);
    }

    #[test]
    fn fixed_entries_always_present() {
        let whitelist = parse_mountinfo("", &paths());
        assert!(whitelist.contains("/kaniko"));
        assert!(whitelist.contains("/var/run"));
        assert_eq!(whitelist.len(), 2);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let content = "garbage\n230 228 0:99 / /dev rw,nosuid - tmpfs tmpfs rw\n1 2 3\n";
        let whitelist = parse_mountinfo(content, &paths());
        let members: Vec<_> = whitelist.iter().map(Path::to_path_buf).collect();
        assert_eq!(
            members,
            vec![
                PathBuf::from("/dev"),
                PathBuf::from("/kaniko"),
                PathBuf::from("/var/run"),
            ]
        );
    }

    #[test]
    fn missing_table_is_config_error() {
        let err = resolve_whitelist("/nonexistent/mountinfo").unwrap_err();
        assert!(matches!(err, KanikoError::Config { .. }));
        assert_eq!(err.path(), Some(Path::new("/nonexistent/mountinfo")));
    }

    #[test]
    fn configured_table_is_read() {
        let temp = tempfile::tempdir().unwrap();
        let table = temp.path().join("mountinfo");
        fs::write(&table, "230 228 0:99 / /sys ro - sysfs sysfs ro\n").unwrap();
        let configured = KanikoPaths {
            mountinfo: table.clone(),
            ..paths()
        };

        let whitelist = resolve_configured_whitelist(&configured).unwrap();
        assert!(whitelist.contains("/sys"));
        assert!(whitelist.contains("/kaniko"));

        let missing = KanikoPaths {
            mountinfo: temp.path().join("absent"),
            ..paths()
        };
        let err = resolve_configured_whitelist(&missing).unwrap_err();
        assert_eq!(err.path(), Some(temp.path().join("absent").as_path()));
    }
}

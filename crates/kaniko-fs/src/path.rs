//! Path relations shared by whitelist and whiteout checks.
//!
//! Containment is always decided on path components, never on raw string
//! prefixes: `/foo` covers `/foo/bar` but not `/foo2/bar`.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

/// Returns true if `path` equals `prefix` or lies below it.
///
/// An empty prefix covers nothing.
pub fn has_prefix(path: impl AsRef<Path>, prefix: impl AsRef<Path>) -> bool {
    let prefix = prefix.as_ref();
    !prefix.as_os_str().is_empty() && path.as_ref().starts_with(prefix)
}

/// Proper ancestors of `path`, shallowest first.
///
/// The filesystem root and `path` itself are never included, so a single
/// segment such as `.` or `foo` has no parent directories.
pub fn parent_directories(path: impl AsRef<Path>) -> Vec<PathBuf> {
    let mut parents: Vec<PathBuf> = path
        .as_ref()
        .ancestors()
        .skip(1)
        .filter(|p| !p.as_os_str().is_empty() && p.parent().is_some())
        .map(Path::to_path_buf)
        .collect();
    parents.reverse();
    parents
}

/// Returns true if some member of `prefixes` covers `path`.
///
/// This is the single containment predicate behind both the mount whitelist
/// and whiteout propagation.
pub fn covered_by<I>(path: impl AsRef<Path>, prefixes: I) -> bool
where
    I: IntoIterator,
    I::Item: AsRef<Path>,
{
    let path = path.as_ref();
    prefixes.into_iter().any(|prefix| has_prefix(path, prefix))
}

/// Lexically normalize an archive or scan name into a root-relative path.
///
/// Leading `/` and `./` are dropped and `..` is folded. Returns `None` when
/// the name climbs above the root.
pub fn normalize(name: impl AsRef<Path>) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in name.as_ref().components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                if !clean.pop() {
                    return None;
                }
            }
            Component::Normal(segment) => clean.push(segment),
        }
    }
    Some(clean)
}

/// Join `name` below `root`, refusing names that escape it.
pub fn join_under(root: impl AsRef<Path>, name: impl AsRef<Path>) -> Option<PathBuf> {
    let root = root.as_ref();
    normalize(name).map(|rel| {
        if rel.as_os_str().is_empty() {
            root.to_path_buf()
        } else {
            root.join(rel)
        }
    })
}

/// The absolute in-image form of `name` (`./foo/bar` becomes `/foo/bar`).
pub fn absolute(name: impl AsRef<Path>) -> Option<PathBuf> {
    join_under("/", name)
}

/// An ordered set of absolute path prefixes.
///
/// Built once per scan or build and read-only once shared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathSet(BTreeSet<PathBuf>);

/// Subtrees marked deleted by a layer; same containment rules as [`PathSet`].
pub type WhiteoutSet = PathSet;

impl PathSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a prefix while building the set.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.0.insert(path.into());
        self
    }

    /// Insert a prefix. Returns false if it was already present.
    pub fn insert(&mut self, path: impl Into<PathBuf>) -> bool {
        self.0.insert(path.into())
    }

    /// Exact membership, without prefix semantics.
    #[must_use]
    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.0.contains(path.as_ref())
    }

    /// Returns true if any member covers `path`.
    #[must_use]
    pub fn covers(&self, path: impl AsRef<Path>) -> bool {
        covered_by(path, &self.0)
    }

    /// Iterate over the members in order.
    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.0.iter().map(PathBuf::as_path)
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the set has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<P: Into<PathBuf>> FromIterator<P> for PathSet {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl<P: Into<PathBuf>> Extend<P> for PathSet {
    fn extend<I: IntoIterator<Item = P>>(&mut self, iter: I) {
        self.0.extend(iter.into_iter().map(Into::into));
    }
}

impl<'a> IntoIterator for &'a PathSet {
    type Item = &'a PathBuf;
    type IntoIter = std::collections::btree_set::Iter<'a, PathBuf>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

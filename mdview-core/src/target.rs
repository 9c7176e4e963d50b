use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// What shape of filesystem object a target observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// One Markdown document inside the content root.
    SingleFile,
    /// A session corpus directory watched recursively up to a depth bound.
    DirectorySubtree,
}

impl TargetKind {
    fn tag(self) -> &'static str {
        match self {
            TargetKind::SingleFile => "file",
            TargetKind::DirectorySubtree => "tree",
        }
    }
}

/// Identifies what is being observed. Constructed only from paths that
/// already passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchTarget {
    kind: TargetKind,
    root_path: PathBuf,
    max_depth: Option<usize>,
    label: String,
}

impl WatchTarget {
    /// `path` must be absolute; `label` is the client-facing relative path.
    pub fn single_file(path: PathBuf, label: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::SingleFile,
            root_path: path,
            max_depth: None,
            label: label.into(),
        }
    }

    pub fn subtree(root: PathBuf, max_depth: usize) -> Self {
        Self {
            kind: TargetKind::DirectorySubtree,
            root_path: root,
            max_depth: Some(max_depth.max(1)),
            label: String::new(),
        }
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn max_depth(&self) -> Option<usize> {
        self.max_depth
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Directory handed to the OS watcher. Single files are observed through
    /// their parent so editors that save by rename keep the watch alive.
    pub fn watch_root(&self) -> &Path {
        match self.kind {
            TargetKind::SingleFile => {
                self.root_path.parent().unwrap_or(&self.root_path)
            }
            TargetKind::DirectorySubtree => &self.root_path,
        }
    }

    pub fn is_recursive(&self) -> bool {
        matches!(self.kind, TargetKind::DirectorySubtree)
    }

    /// Whether a raw event on `path` concerns this target at all.
    pub fn covers(&self, path: &Path) -> bool {
        match self.kind {
            TargetKind::SingleFile => path == self.root_path,
            TargetKind::DirectorySubtree => {
                path != self.root_path && path.starts_with(&self.root_path)
            }
        }
    }

    /// Canonical registry key.
    pub fn key(&self) -> TargetKey {
        let key = match self.max_depth {
            Some(depth) => format!(
                "{}:{}:{}",
                self.kind.tag(),
                depth,
                self.root_path.display()
            ),
            None => format!("{}:{}", self.kind.tag(), self.root_path.display()),
        };
        TargetKey(key)
    }
}

/// Canonical string form of a [`WatchTarget`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TargetKey(String);

impl TargetKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_file_watches_parent_and_covers_only_itself() {
        let target =
            WatchTarget::single_file(PathBuf::from("/wiki/docs/a.md"), "docs/a.md");
        assert_eq!(target.watch_root(), Path::new("/wiki/docs"));
        assert!(!target.is_recursive());
        assert!(target.covers(Path::new("/wiki/docs/a.md")));
        assert!(!target.covers(Path::new("/wiki/docs/b.md")));
        assert!(!target.covers(Path::new("/wiki/docs/a.md.swp")));
    }

    #[test]
    fn subtree_covers_descendants_but_not_root() {
        let target = WatchTarget::subtree(PathBuf::from("/sessions"), 3);
        assert!(target.is_recursive());
        assert!(target.covers(Path::new("/sessions/abc/plan.md")));
        assert!(!target.covers(Path::new("/sessions")));
        assert!(!target.covers(Path::new("/sessions-old/abc/plan.md")));
    }

    #[test]
    fn keys_distinguish_kind_and_depth() {
        let file = WatchTarget::single_file(PathBuf::from("/a/b.md"), "b.md");
        let tree = WatchTarget::subtree(PathBuf::from("/a/b.md"), 2);
        let deeper = WatchTarget::subtree(PathBuf::from("/a/b.md"), 4);
        assert_ne!(file.key(), tree.key());
        assert_ne!(tree.key(), deeper.key());
        assert_eq!(file.key().as_str(), "file:/a/b.md");
        assert_eq!(tree.key().as_str(), "tree:2:/a/b.md");
    }

    #[test]
    fn same_path_yields_same_key() {
        let first = WatchTarget::single_file(PathBuf::from("/a/b.md"), "b.md");
        let second = WatchTarget::single_file(PathBuf::from("/a/b.md"), "./b.md");
        assert_eq!(first.key(), second.key());
    }
}

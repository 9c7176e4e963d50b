//! Request path validation.
//!
//! Clients address documents with a path relative to the content root. Every
//! such path is normalised lexically before it is allowed anywhere near the
//! filesystem or the watch registry.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Extension of the only documents this service will watch.
pub const MARKDOWN_EXTENSION: &str = "md";

/// Reason a requested path was refused.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathRejection {
    #[error("path is empty")]
    Empty,

    #[error("path resolves outside the content root")]
    OutsideRoot,

    #[error("only markdown (.md) files can be watched")]
    WrongExtension,
}

impl PathRejection {
    /// Stable machine-readable code for client-facing error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            PathRejection::Empty => "empty",
            PathRejection::OutsideRoot => "outside_root",
            PathRejection::WrongExtension => "wrong_extension",
        }
    }
}

/// Resolve `requested` against `root`, accepting only Markdown files nested
/// under the root.
///
/// `root` is expected to be absolute and already normalised (the config
/// loader canonicalises it). No filesystem access happens here.
pub fn validate(requested: &str, root: &Path) -> Result<PathBuf, PathRejection> {
    let relative = normalize_relative(requested)?;

    let resolved = root.join(&relative);
    if !is_within(&resolved, root) {
        return Err(PathRejection::OutsideRoot);
    }

    if !has_markdown_extension(&relative) {
        return Err(PathRejection::WrongExtension);
    }

    Ok(resolved)
}

/// Collapse `.` and `..` segments of a client-supplied relative path.
///
/// Absolute paths and any `..` that would climb above the starting point are
/// rejected as [`PathRejection::OutsideRoot`].
pub fn normalize_relative(requested: &str) -> Result<PathBuf, PathRejection> {
    let trimmed = requested.trim();
    if trimmed.is_empty() {
        return Err(PathRejection::Empty);
    }

    let mut clean = PathBuf::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(segment) => clean.push(segment),
            Component::CurDir => {}
            Component::ParentDir => {
                if !clean.pop() {
                    return Err(PathRejection::OutsideRoot);
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(PathRejection::OutsideRoot);
            }
        }
    }

    if clean.as_os_str().is_empty() {
        return Err(PathRejection::Empty);
    }

    Ok(clean)
}

/// Component-wise containment check: `/root-evil` is not within `/root`.
pub fn is_within(path: &Path, root: &Path) -> bool {
    path.starts_with(root)
}

pub fn has_markdown_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(MARKDOWN_EXTENSION))
}

/// Render `path` relative to `root` with forward slashes, as clients see it.
pub fn display_relative(path: &Path, root: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let segments: Vec<_> = rel
        .components()
        .filter_map(|component| match component {
            Component::Normal(seg) => Some(seg.to_string_lossy()),
            _ => None,
        })
        .collect();
    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}

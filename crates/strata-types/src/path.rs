use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Separator used by the display form of a [`TreePath`].
pub const SEPARATOR: char = '/';

/// Hierarchical address of a node in a tree.
///
/// A path is an ordered sequence of segment names. The empty sequence is the
/// root. Paths are the only addressing mechanism: there is no separate
/// identifier space, and a path carries no filesystem or URL semantics.
///
/// The display form is `/a/b/c`; the root displays as `/`.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TreePath(Vec<String>);

/// Check that `segment` can be used as a child name.
///
/// Names must be non-empty and must not contain the separator.
pub fn validate_segment(segment: &str) -> Result<(), TypeError> {
    if segment.is_empty() {
        return Err(TypeError::InvalidSegment {
            segment: segment.to_string(),
            reason: "segment must not be empty".into(),
        });
    }
    if segment.contains(SEPARATOR) {
        return Err(TypeError::InvalidSegment {
            segment: segment.to_string(),
            reason: format!("segment must not contain {SEPARATOR:?}"),
        });
    }
    Ok(())
}

impl TreePath {
    /// The root path (no segments).
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Build a path from segments, validating each one.
    pub fn new<I, S>(segments: I) -> Result<Self, TypeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        for segment in &segments {
            validate_segment(segment)?;
        }
        Ok(Self(segments))
    }

    /// Returns `true` for the root path.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn segment_count(&self) -> usize {
        self.0.len()
    }

    /// The final segment, or `None` for the root.
    pub fn last_segment(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// The path of the parent node, or `None` for the root.
    pub fn parent(&self) -> Option<TreePath> {
        if self.is_root() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// A new path with `name` appended.
    ///
    /// The name is taken as-is; callers that accept names from outside use
    /// [`validate_segment`] first.
    pub fn append(&self, name: &str) -> TreePath {
        let mut segments = Vec::with_capacity(self.0.len() + 1);
        segments.extend_from_slice(&self.0);
        segments.push(name.to_string());
        Self(segments)
    }

    /// Concatenate `relative` onto this path.
    pub fn join(&self, relative: &TreePath) -> TreePath {
        let mut segments = self.0.clone();
        segments.extend_from_slice(&relative.0);
        Self(segments)
    }

    /// Returns `true` if `prefix` is this path or one of its ancestors.
    pub fn starts_with(&self, prefix: &TreePath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// The segments remaining after `prefix`, if `prefix` is an ancestor.
    pub fn strip_prefix(&self, prefix: &TreePath) -> Option<&[String]> {
        self.0.strip_prefix(prefix.0.as_slice())
    }

    /// Iterate over this path and all of its ancestors, root first.
    pub fn prefixes(&self) -> impl Iterator<Item = TreePath> + '_ {
        (0..=self.0.len()).map(move |n| Self(self.0[..n].to_vec()))
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return write!(f, "{SEPARATOR}");
        }
        for segment in &self.0 {
            write!(f, "{SEPARATOR}{segment}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TreePath({self})")
    }
}

impl FromStr for TreePath {
    type Err = TypeError;

    /// Parse `/a/b`. A leading separator is optional; empty segments
    /// (`a//b`, trailing `/`) are rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.strip_prefix(SEPARATOR).unwrap_or(s);
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        Self::new(trimmed.split(SEPARATOR)).map_err(|e| TypeError::InvalidPath {
            path: s.to_string(),
            reason: e.to_string(),
        })
    }
}

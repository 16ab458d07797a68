//! Slash-delimited key paths and the reference marker convention.
//!
//! A key path addresses a location in a [`Node`](crate::Node) tree. Segments
//! are separated by [`SEPARATOR`]; empty segments are ignored, so `"/a/b"`,
//! `"a/b"` and `"a//b/"` all name the same location. The empty string and
//! `"/"` both denote the root.
//!
//! At the JSON boundary a reference is a string carrying the
//! [`REF_MARKER`] prefix followed by the target path.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Separator between path segments.
pub const SEPARATOR: char = '/';

/// Prefix that tags a string as a symbolic reference to another path.
pub const REF_MARKER: &str = "__ref:";

/// Reserved child key holding the expiry record of a cached entry.
pub const EXPIRY_KEY: &str = "__expiry";

/// A parsed key path: an ordered list of non-empty segments.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct KeyPath {
    segments: Vec<String>,
}

impl KeyPath {
    /// The root path (no segments).
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a path string. The reference marker is not interpreted here;
    /// use [`unreference`] first when the input may carry one.
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path
                .split(SEPARATOR)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Build a path from pre-split segments. Empty segments are dropped.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments
                .into_iter()
                .map(Into::into)
                .filter(|s: &String| !s.is_empty())
                .collect(),
        }
    }

    /// The segments of this path, root first.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns `true` if this is the root path.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns `true` if this path has no segments. Alias of [`Self::is_root`].
    pub fn is_empty(&self) -> bool {
        self.is_root()
    }

    /// The last segment, or `None` for the root.
    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// The path without its last segment. The parent of the root is the root.
    pub fn parent(&self) -> KeyPath {
        self.slice(0, self.segments.len().saturating_sub(1))
    }

    /// A sub-path over `[start, end)`, clamped to the available segments.
    pub fn slice(&self, start: usize, end: usize) -> KeyPath {
        let end = end.min(self.segments.len());
        let start = start.min(end);
        Self {
            segments: self.segments[start..end].to_vec(),
        }
    }

    /// Append one segment (which may itself contain separators).
    pub fn child(&self, segment: &str) -> KeyPath {
        self.join(&KeyPath::parse(segment))
    }

    /// Concatenate two paths.
    pub fn join(&self, other: &KeyPath) -> KeyPath {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Self { segments }
    }

    /// Returns `true` if `self` equals `prefix` or lies beneath it.
    pub fn starts_with(&self, prefix: &KeyPath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// Consume the path, returning its segments.
    pub fn into_segments(self) -> Vec<String> {
        self.segments
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "{SEPARATOR}")?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

impl From<&str> for KeyPath {
    fn from(path: &str) -> Self {
        KeyPath::parse(path)
    }
}

impl From<String> for KeyPath {
    fn from(path: String) -> Self {
        KeyPath::parse(&path)
    }
}

impl From<KeyPath> for String {
    fn from(path: KeyPath) -> Self {
        path.to_string()
    }
}

// ---------------------------------------------------------------------------
// Reference markers
// ---------------------------------------------------------------------------

/// Returns `true` if `path` carries the reference marker.
pub fn is_reference(path: &str) -> bool {
    path.starts_with(REF_MARKER)
}

/// Strip every leading reference marker from `path`.
///
/// ```
/// use keystone_types::{reference, unreference};
///
/// assert_eq!(unreference("__ref:users/1"), "users/1");
/// assert_eq!(unreference("users/1"), "users/1");
/// assert_eq!(unreference(&reference("users/1")), "users/1");
/// ```
pub fn unreference(path: &str) -> String {
    let mut rest = path;
    while let Some(stripped) = rest.strip_prefix(REF_MARKER) {
        rest = stripped;
    }
    rest.to_string()
}

/// Tag `path` with the reference marker. Idempotent: a path that already
/// carries the marker is returned in the same marker form.
pub fn reference(path: &str) -> String {
    format!("{REF_MARKER}{}", unreference(path))
}

/// Element-wise [`reference`], preserving order and length.
pub fn references<S: AsRef<str>>(paths: &[S]) -> Vec<String> {
    paths.iter().map(|p| reference(p.as_ref())).collect()
}

/// Element-wise [`unreference`], preserving order and length.
pub fn unreferences<S: AsRef<str>>(paths: &[S]) -> Vec<String> {
    paths.iter().map(|p| unreference(p.as_ref())).collect()
}

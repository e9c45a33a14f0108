//! Tree paths
//!
//! A path is an ordered list of key segments. The textual form joins
//! segments with `.`; keys that themselves contain dots must be given in
//! the explicit array form.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Display form of the empty path
pub const ROOT_DISPLAY: &str = "<root>";

/// Errors for path parsing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("empty segment in path '{0}'")]
    EmptySegment(String),
}

/// An ordered sequence of tree key segments
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreePath(Vec<String>);

impl TreePath {
    /// The root path (no segments)
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Parse a dotted path. The empty string is the root.
    pub fn parse(dotted: &str) -> Result<Self, PathError> {
        if dotted.is_empty() {
            return Ok(Self::root());
        }
        let mut segments = Vec::new();
        for part in dotted.split('.') {
            if part.is_empty() {
                return Err(PathError::EmptySegment(dotted.to_string()));
            }
            segments.push(part.to_string());
        }
        Ok(Self(segments))
    }

    /// Build a path from explicit segments
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Last segment, if any
    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Path without its last segment (root stays root)
    pub fn parent(&self) -> TreePath {
        let mut segments = self.0.clone();
        segments.pop();
        Self(segments)
    }

    /// Path extended by one segment
    pub fn child(&self, segment: impl Into<String>) -> TreePath {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    /// Path extended by a sequence index
    pub fn index(&self, index: usize) -> TreePath {
        self.child(index.to_string())
    }

    /// Path extended by every segment of `other`
    pub fn join(&self, other: &TreePath) -> TreePath {
        let mut segments = self.0.clone();
        segments.extend(other.0.iter().cloned());
        Self(segments)
    }

    /// The first `n` segments
    pub fn prefix(&self, n: usize) -> TreePath {
        Self(self.0.iter().take(n).cloned().collect())
    }

    /// True if `prefix` is this path or one of its ancestors
    pub fn starts_with(&self, prefix: &TreePath) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "{}", ROOT_DISPLAY)
        } else {
            write!(f, "{}", self.0.join("."))
        }
    }
}

impl FromStr for TreePath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for TreePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0.iter().any(|s| s.contains('.')) {
            self.0.serialize(serializer)
        } else {
            serializer.serialize_str(&self.0.join("."))
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PathRepr {
    Dotted(String),
    Segments(Vec<String>),
}

impl<'de> Deserialize<'de> for TreePath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match PathRepr::deserialize(deserializer)? {
            PathRepr::Dotted(s) => TreePath::parse(&s).map_err(serde::de::Error::custom),
            PathRepr::Segments(segments) => Ok(TreePath(segments)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dotted() {
        let path = TreePath::parse("services.web.image").unwrap();
        assert_eq!(path.segments(), ["services", "web", "image"]);
        assert_eq!(path.to_string(), "services.web.image");
    }

    #[test]
    fn test_empty_string_is_root() {
        let path = TreePath::parse("").unwrap();
        assert!(path.is_root());
        assert_eq!(path.to_string(), "<root>");
    }

    #[test]
    fn test_empty_segment_rejected() {
        assert_eq!(
            TreePath::parse("a..b"),
            Err(PathError::EmptySegment("a..b".to_string()))
        );
    }

    #[test]
    fn test_starts_with() {
        let path = TreePath::parse("a.b.c").unwrap();
        assert!(path.starts_with(&TreePath::parse("a.b").unwrap()));
        assert!(path.starts_with(&TreePath::root()));
        assert!(!path.starts_with(&TreePath::parse("a.c").unwrap()));
    }

    #[test]
    fn test_deserialize_both_forms() {
        let dotted: TreePath = serde_json::from_str(r#""a.b""#).unwrap();
        let explicit: TreePath = serde_json::from_str(r#"["a", "b"]"#).unwrap();
        assert_eq!(dotted, explicit);

        let dotted_key: TreePath = serde_json::from_str(r#"["labels", "com.example.dev"]"#).unwrap();
        assert_eq!(dotted_key.len(), 2);
        assert_eq!(
            serde_json::to_string(&dotted_key).unwrap(),
            r#"["labels","com.example.dev"]"#
        );
    }

    #[test]
    fn test_parent_and_child() {
        let path = TreePath::parse("a.b").unwrap();
        assert_eq!(path.parent(), TreePath::parse("a").unwrap());
        assert_eq!(path.child("c"), TreePath::parse("a.b.c").unwrap());
        assert_eq!(path.index(2).last(), Some("2"));
    }
}

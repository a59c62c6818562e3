//! Hierarchical paths identifying tracked items

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Slash-separated hierarchical path, e.g. `project/folder/file`.
///
/// Paths are plain segment sequences with no filesystem semantics: no
/// `.`/`..` resolution, no platform separators. The empty path is not a
/// valid node address; it is only accepted as a traversal origin meaning
/// "start at the roots".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncPath {
    segments: Vec<String>,
}

impl SyncPath {
    pub fn new(segments: Vec<String>) -> Self {
        SyncPath { segments }
    }

    /// Parse a slash-separated path. Empty segments (leading, trailing or
    /// doubled slashes) are dropped.
    pub fn parse(s: &str) -> Self {
        SyncPath {
            segments: s
                .split('/')
                .filter(|seg| !seg.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The path without its last segment, or `None` for the empty path
    /// and for single-segment paths (whose parent is the virtual root).
    pub fn parent(&self) -> Option<SyncPath> {
        if self.segments.len() < 2 {
            return None;
        }
        Some(SyncPath {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Append one segment.
    pub fn child(&self, segment: &str) -> SyncPath {
        let mut segments = self.segments.clone();
        segments.push(segment.to_owned());
        SyncPath { segments }
    }

    /// Proper ancestor prefixes, shortest first (`a/b/c` → `a`, `a/b`).
    pub fn ancestors(&self) -> impl Iterator<Item = SyncPath> + '_ {
        (1..self.segments.len()).map(|end| SyncPath {
            segments: self.segments[..end].to_vec(),
        })
    }

    /// True if `self` is a proper ancestor prefix of `other`.
    pub fn is_ancestor_of(&self, other: &SyncPath) -> bool {
        self.segments.len() < other.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }

    /// True if `other` equals `self` or extends it (ancestor-or-equal).
    pub fn contains(&self, other: &SyncPath) -> bool {
        self.segments.len() <= other.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }
}

impl fmt::Display for SyncPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

impl FromStr for SyncPath {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(SyncPath::parse(s))
    }
}

impl From<&str> for SyncPath {
    fn from(s: &str) -> Self {
        SyncPath::parse(s)
    }
}

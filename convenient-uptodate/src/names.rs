//! Case-insensitive keys: set names, kind names and path keys
//!
//! Project files are authored on case-insensitive filesystems, so every name
//! and path that takes part in a comparison goes through one of these types.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;

/// Name of an input/output set.
///
/// Items without a `Set` metadata value belong to the default set, which is
/// represented by the empty name and always sorts first.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct SetName(String);

impl SetName {
    /// Create a set name; surrounding whitespace is trimmed.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_string())
    }

    /// The reserved default set.
    #[must_use]
    pub fn default_set() -> Self {
        Self(String::new())
    }

    /// Whether this is the reserved default set.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.0.is_empty()
    }

    /// The name as written in the project file.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn folded(&self) -> String {
        self.0.to_lowercase()
    }
}

impl PartialEq for SetName {
    fn eq(&self, other: &Self) -> bool {
        self.folded() == other.folded()
    }
}

impl Eq for SetName {}

impl Hash for SetName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.folded().hash(state);
    }
}

impl PartialOrd for SetName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SetName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.folded().cmp(&other.folded())
    }
}

impl fmt::Display for SetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_default() {
            write!(f, "(default)")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Kind of an input/output item, used to exclude items per invocation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct KindName(String);

impl KindName {
    /// Create a kind name; surrounding whitespace is trimmed.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_string())
    }

    /// Items without a `Kind` metadata value.
    #[must_use]
    pub fn none() -> Self {
        Self(String::new())
    }

    /// Whether the item carried no kind.
    #[must_use]
    pub fn is_none(&self) -> bool {
        self.0.is_empty()
    }

    /// The kind as written in the project file.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for KindName {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_lowercase() == other.0.to_lowercase()
    }
}

impl Eq for KindName {}

impl Hash for KindName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_lowercase().hash(state);
    }
}

impl PartialOrd for KindName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KindName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.to_lowercase().cmp(&other.0.to_lowercase())
    }
}

impl fmt::Display for KindName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kinds excluded from a single check invocation.
///
/// Parsed from the `FastUpToDateCheckIgnoresKinds` global property.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreKinds(BTreeSet<KindName>);

impl IgnoreKinds {
    /// Global property carrying the semicolon-delimited kinds.
    pub const GLOBAL_PROPERTY: &'static str = "FastUpToDateCheckIgnoresKinds";

    /// Parse a semicolon-delimited list. Empty entries are dropped.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        Self(
            value
                .split(';')
                .map(str::trim)
                .filter(|kind| !kind.is_empty())
                .map(KindName::new)
                .collect(),
        )
    }

    /// Whether items of `kind` must be skipped. Unkinded items are never skipped.
    #[must_use]
    pub fn ignores(&self, kind: &KindName) -> bool {
        !kind.is_none() && self.0.contains(kind)
    }

    /// Number of ignored kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing is ignored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Ignored kinds in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &KindName> {
        self.0.iter()
    }
}

/// Case- and separator-insensitive key for a filesystem path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathKey(String);

impl PathKey {
    /// Normalise `path` into a comparison key.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::from_str_path(&path.as_ref().to_string_lossy())
    }

    /// Normalise a textual path into a comparison key.
    #[must_use]
    pub fn from_str_path(path: &str) -> Self {
        let mut key = path.replace('\\', "/").to_lowercase();
        while key.len() > 1 && key.ends_with('/') {
            let _ = key.pop();
        }
        Self(key)
    }

    /// The normalised form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

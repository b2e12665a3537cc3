//! Item classification: copy policies, source items and copy data

use crate::names::{KindName, PathKey, SetName};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Item types that are copied or packaged but never compiled.
pub const NON_COMPILATION_ITEM_TYPES: [&str; 2] = ["None", "Content"];

/// Whether items of `item_type` only take part in copy checks.
#[must_use]
pub fn is_non_compilation_item_type(item_type: &str) -> bool {
    NON_COMPILATION_ITEM_TYPES
        .iter()
        .any(|t| t.eq_ignore_ascii_case(item_type))
}

/// Convert an item spec written with either separator into a native path.
#[must_use]
pub fn native_path(spec: &str) -> PathBuf {
    if std::path::MAIN_SEPARATOR == '\\' {
        PathBuf::from(spec.replace('/', "\\"))
    } else {
        PathBuf::from(spec.replace('\\', "/"))
    }
}

/// Resolve an item spec against `base` unless it is already absolute.
#[must_use]
pub fn resolve_path(base: &Path, spec: &str) -> PathBuf {
    let path = native_path(spec);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

/// When an item is copied to the output directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CopyType {
    /// Not copied
    #[default]
    Never,
    /// Copied when the source is newer than the destination
    PreserveNewest,
    /// Copied on every build
    Always,
}

impl CopyType {
    /// Parse `CopyToOutputDirectory` metadata. Unknown values mean `Never`.
    #[must_use]
    pub fn from_metadata(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") => Self::Never,
            Some(v) if v.eq_ignore_ascii_case("Never") => Self::Never,
            Some(v) if v.eq_ignore_ascii_case("PreserveNewest") => Self::PreserveNewest,
            Some(v) if v.eq_ignore_ascii_case("Always") => Self::Always,
            Some(other) => {
                debug!("Unknown CopyToOutputDirectory value '{}', treating as Never", other);
                Self::Never
            }
        }
    }
}

impl fmt::Display for CopyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => write!(f, "Never"),
            Self::PreserveNewest => write!(f, "PreserveNewest"),
            Self::Always => write!(f, "Always"),
        }
    }
}

/// A project source item relevant to freshness.
///
/// Equality and hashing only consider the path, case-insensitively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputItem {
    /// Item spec, relative to the project directory or absolute
    pub path: String,
    /// `TargetPath` or `Link` override for the copy destination
    pub target_path: Option<String>,
    /// Copy policy
    pub copy_type: CopyType,
}

impl InputItem {
    /// Create an item that is never copied.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            target_path: None,
            copy_type: CopyType::Never,
        }
    }

    /// Classify an item from its metadata.
    #[must_use]
    pub fn from_metadata(path: &str, metadata: &crate::project_data::ItemMetadata) -> Self {
        use crate::project_data::metadata;

        let non_empty = |name: &str| {
            metadata
                .get(name)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        Self {
            path: path.to_string(),
            target_path: non_empty(metadata::TARGET_PATH).or_else(|| non_empty(metadata::LINK)),
            copy_type: CopyType::from_metadata(
                metadata.get(metadata::COPY_TO_OUTPUT_DIRECTORY).map(String::as_str),
            ),
        }
    }

    /// Builder-style copy policy.
    #[must_use]
    pub fn with_copy_type(mut self, copy_type: CopyType) -> Self {
        self.copy_type = copy_type;
        self
    }

    /// Path of the copy relative to the output directory.
    ///
    /// The explicit target path wins; otherwise the item's own relative path
    /// is kept when it stays inside the project, else only the file name.
    #[must_use]
    pub fn destination_relative_path(&self) -> PathBuf {
        if let Some(target) = &self.target_path {
            return native_path(target);
        }

        let path = native_path(&self.path);
        let escapes = path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));

        if escapes {
            path.file_name().map(PathBuf::from).unwrap_or(path)
        } else {
            path
        }
    }

    /// Comparison key of the item path.
    #[must_use]
    pub fn key(&self) -> PathKey {
        PathKey::from_str_path(&self.path)
    }
}

impl PartialEq for InputItem {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for InputItem {}

impl Hash for InputItem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

/// A custom `UpToDateCheckInput`/`Output`/`Built` item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetItem {
    /// Item path (absolute after derivation)
    pub path: PathBuf,
    /// Set the item belongs to
    pub set: SetName,
    /// Kind, used for per-invocation exclusion
    pub kind: KindName,
}

/// A file a project copies into its output directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyItem {
    /// Absolute source path
    pub source_path: PathBuf,
    /// Destination relative to an output directory
    pub relative_target_path: PathBuf,
    /// Copy policy
    pub copy_type: CopyType,
}

impl CopyItem {
    /// Derive the copy item for `item` of the project in `project_directory`.
    #[must_use]
    pub fn from_input_item(project_directory: &Path, item: &InputItem) -> Self {
        Self {
            source_path: resolve_path(project_directory, &item.path),
            relative_target_path: item.destination_relative_path(),
            copy_type: item.copy_type,
        }
    }
}

/// Copy data a project publishes for projects that reference it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectCopyData {
    /// Full path of the project file
    pub project_full_path: PathBuf,
    /// Full path of the project's primary output
    pub target_path: PathBuf,
    /// Items the project copies to its output directory
    pub copy_items: Vec<CopyItem>,
    /// Target paths of the projects this project references
    pub referenced_target_paths: Vec<PathBuf>,
}

impl ProjectCopyData {
    /// Whether the project publishes nothing worth registering.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.target_path.as_os_str().is_empty()
    }
}

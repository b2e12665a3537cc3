//! Project data published by the host
//!
//! The host evaluates the project and runs design-time builds; the results
//! arrive here as rule snapshots keyed by rule name. A [`ProjectUpdate`] pairs
//! each rule's before/after state with a structural difference so that state
//! derivation can skip rules that did not change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Rule names consumed by the check.
pub mod rules {
    /// General project properties
    pub const CONFIGURATION_GENERAL: &str = "ConfigurationGeneral";
    /// Analyzer assemblies passed to the compiler
    pub const RESOLVED_ANALYZER_REFERENCE: &str = "ResolvedAnalyzerReference";
    /// Assemblies passed to the compiler
    pub const RESOLVED_COMPILATION_REFERENCE: &str = "ResolvedCompilationReference";
    /// Custom inputs
    pub const UP_TO_DATE_CHECK_INPUT: &str = "UpToDateCheckInput";
    /// Custom outputs
    pub const UP_TO_DATE_CHECK_OUTPUT: &str = "UpToDateCheckOutput";
    /// Built outputs, optionally copied from an `Original`
    pub const UP_TO_DATE_CHECK_BUILT: &str = "UpToDateCheckBuilt";
    /// The project's own copy marker
    pub const COPY_UP_TO_DATE_MARKER: &str = "CopyUpToDateMarker";

    /// Rules whose items feed derived collections directly.
    pub const TRACKED: [&str; 6] = [
        RESOLVED_ANALYZER_REFERENCE,
        RESOLVED_COMPILATION_REFERENCE,
        UP_TO_DATE_CHECK_INPUT,
        UP_TO_DATE_CHECK_OUTPUT,
        UP_TO_DATE_CHECK_BUILT,
        COPY_UP_TO_DATE_MARKER,
    ];
}

/// `ConfigurationGeneral` property names.
pub mod properties {
    /// Full path of the project file
    pub const PROJECT_FULL_PATH: &str = "MSBuildProjectFullPath";
    /// Directory of the project file
    pub const PROJECT_DIRECTORY: &str = "MSBuildProjectDirectory";
    /// Output directory, relative to the project or absolute
    pub const OUT_DIR: &str = "OutDir";
    /// Legacy output directory property
    pub const OUTPUT_PATH: &str = "OutputPath";
    /// Full path of the primary build output
    pub const TARGET_PATH: &str = "TargetPath";
    /// Opt-out switch for the check
    pub const DISABLE_FAST_UP_TO_DATE_CHECK: &str = "DisableFastUpToDateCheck";
    /// Semicolon list of imports, newest first
    pub const ALL_PROJECTS: &str = "MSBuildAllProjects";
    /// Opt-in switch for copy acceleration
    pub const ACCELERATE_BUILDS: &str = "AccelerateBuildsInVisualStudio";
}

/// Item metadata names.
pub mod metadata {
    /// Copy policy of a source item
    pub const COPY_TO_OUTPUT_DIRECTORY: &str = "CopyToOutputDirectory";
    /// Display/destination path of a linked item
    pub const LINK: &str = "Link";
    /// Explicit destination path relative to the output directory
    pub const TARGET_PATH: &str = "TargetPath";
    /// Input/output set
    pub const SET: &str = "Set";
    /// Input/output kind
    pub const KIND: &str = "Kind";
    /// Source of a copied built item
    pub const ORIGINAL: &str = "Original";
    /// Resolved path of a reference
    pub const RESOLVED_PATH: &str = "ResolvedPath";
    /// Path of the referenced project's output
    pub const ORIGINAL_PATH: &str = "OriginalPath";
    /// Copy marker of the referenced project
    pub const COPY_UP_TO_DATE_MARKER: &str = "CopyUpToDateMarker";
    /// How the reference was produced
    pub const REFERENCE_SOURCE_TARGET: &str = "ReferenceSourceTarget";
}

/// Dimensions identifying one configuration, e.g. `Configuration=Debug`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectConfiguration(BTreeMap<String, String>);

impl ProjectConfiguration {
    /// Build from dimension pairs.
    pub fn new<I, K, V>(dimensions: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            dimensions
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Value of one dimension.
    #[must_use]
    pub fn dimension(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Dimension pairs in name order.
    pub fn dimensions(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for ProjectConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values: Vec<&str> = self.0.values().map(String::as_str).collect();
        write!(f, "{}", values.join("|"))
    }
}

/// Item metadata, name to value.
pub type ItemMetadata = BTreeMap<String, String>;

/// State of one rule at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSnapshot {
    /// Rule properties
    #[serde(default)]
    pub properties: BTreeMap<String, String>,

    /// Items by item spec (usually a path relative to the project)
    #[serde(default)]
    pub items: BTreeMap<String, ItemMetadata>,
}

impl RuleSnapshot {
    /// Property value, with empty strings treated as absent.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }
}

/// What changed in a rule between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDifference {
    /// Whether anything changed at all
    pub any_changes: bool,
    /// Items present only after
    #[serde(default)]
    pub added_items: BTreeSet<String>,
    /// Items present only before
    #[serde(default)]
    pub removed_items: BTreeSet<String>,
    /// Items present in both with different metadata
    #[serde(default)]
    pub changed_items: BTreeSet<String>,
    /// Properties whose value changed
    #[serde(default)]
    pub changed_properties: BTreeSet<String>,
}

/// Before/after pair for one rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleChange {
    /// State before the change
    #[serde(default)]
    pub before: RuleSnapshot,
    /// State after the change
    #[serde(default)]
    pub after: RuleSnapshot,
    /// Structural difference
    #[serde(default)]
    pub difference: RuleDifference,
}

impl RuleChange {
    /// Compute the change from `before` to `after`.
    #[must_use]
    pub fn between(before: &RuleSnapshot, after: &RuleSnapshot) -> Self {
        let mut difference = RuleDifference::default();

        for (spec, metadata) in &after.items {
            match before.items.get(spec) {
                None => {
                    let _ = difference.added_items.insert(spec.clone());
                }
                Some(previous) if previous != metadata => {
                    let _ = difference.changed_items.insert(spec.clone());
                }
                Some(_) => {}
            }
        }
        for spec in before.items.keys() {
            if !after.items.contains_key(spec) {
                let _ = difference.removed_items.insert(spec.clone());
            }
        }

        let names: BTreeSet<&String> = before
            .properties
            .keys()
            .chain(after.properties.keys())
            .collect();
        for name in names {
            if before.properties.get(name) != after.properties.get(name) {
                let _ = difference.changed_properties.insert(name.clone());
            }
        }

        difference.any_changes = !difference.added_items.is_empty()
            || !difference.removed_items.is_empty()
            || !difference.changed_items.is_empty()
            || !difference.changed_properties.is_empty();

        Self {
            before: before.clone(),
            after: after.clone(),
            difference,
        }
    }

    /// Whether the rule changed.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.difference.any_changes
    }
}

/// Complete project state for one configuration, as published by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    /// Monotonically increasing data version
    pub version: u64,

    /// Configuration this snapshot belongs to
    #[serde(default)]
    pub configuration: ProjectConfiguration,

    /// Rule snapshots by rule name
    #[serde(default)]
    pub rules: BTreeMap<String, RuleSnapshot>,

    /// Item types flagged by the item schema as up-to-date check inputs
    #[serde(default)]
    pub up_to_date_check_item_types: BTreeSet<String>,

    /// Rule name to item type
    #[serde(default)]
    pub catalog: BTreeMap<String, String>,

    /// Files evaluation depended on (global.json, .editorconfig, ...), with
    /// their last-write time or `None` when absent
    #[serde(default)]
    pub additional_dependent_files: BTreeMap<String, Option<DateTime<Utc>>>,
}

impl ProjectSnapshot {
    /// Parse a snapshot from JSON.
    ///
    /// # Errors
    ///
    /// Returns a JSON error when `json` is not a valid snapshot.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Rule state, or an empty rule when the host did not publish it.
    #[must_use]
    pub fn rule(&self, name: &str) -> RuleSnapshot {
        self.rules.get(name).cloned().unwrap_or_default()
    }
}

/// Incremental update derived from two consecutive snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectUpdate {
    /// Data version of the newer snapshot
    pub version: u64,
    /// Configuration
    pub configuration: ProjectConfiguration,
    /// Per-rule changes, for every rule present before or after
    pub changes: BTreeMap<String, RuleChange>,
    /// Up-to-date check item types after the change
    pub item_types: BTreeSet<String>,
    /// Rule name to item type after the change
    pub catalog: BTreeMap<String, String>,
    /// Additional dependent files after the change
    pub additional_dependent_files: BTreeMap<String, Option<DateTime<Utc>>>,
}

impl ProjectUpdate {
    /// Diff `next` against `previous` (or against nothing on first observation).
    #[must_use]
    pub fn diff(previous: Option<&ProjectSnapshot>, next: &ProjectSnapshot) -> Self {
        let empty = RuleSnapshot::default();
        let mut changes = BTreeMap::new();

        let mut names: BTreeSet<&String> = next.rules.keys().collect();
        if let Some(previous) = previous {
            names.extend(previous.rules.keys());
        }

        for name in names {
            let before = previous
                .and_then(|p| p.rules.get(name))
                .unwrap_or(&empty);
            let after = next.rules.get(name).unwrap_or(&empty);
            let _ = changes.insert(name.clone(), RuleChange::between(before, after));
        }

        Self {
            version: next.version,
            configuration: next.configuration.clone(),
            changes,
            item_types: next.up_to_date_check_item_types.clone(),
            catalog: next.catalog.clone(),
            additional_dependent_files: next.additional_dependent_files.clone(),
        }
    }

    /// Whether `rule` reported any difference.
    #[must_use]
    pub fn rule_changed(&self, rule: &str) -> bool {
        self.changes.get(rule).is_some_and(RuleChange::has_changes)
    }

    /// After-state of `rule`, empty when absent.
    #[must_use]
    pub fn after(&self, rule: &str) -> RuleSnapshot {
        self.changes
            .get(rule)
            .map(|change| change.after.clone())
            .unwrap_or_default()
    }
}

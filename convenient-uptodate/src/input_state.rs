//! Immutable per-configuration state consumed by the decision engine
//!
//! [`ImplicitConfiguredInput::update`] runs on every project mutation, so it
//! must be close to free when nothing relevant changed. Every derived
//! collection lives behind an `Arc`; a rule that reports no difference keeps
//! the previous `Arc`, and only rules with differences are re-derived from
//! their after-state.

use crate::items::{native_path, resolve_path, CopyItem, CopyType, InputItem, ProjectCopyData, SetItem};
use crate::names::{KindName, PathKey, SetName};
use crate::project_data::{metadata, properties, rules, ProjectConfiguration, ProjectUpdate, RuleSnapshot};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Paths grouped by set, then by kind.
pub type ItemsBySetAndKind = BTreeMap<SetName, BTreeMap<KindName, Vec<PathBuf>>>;

/// Everything one configuration needs to answer "am I up to date".
#[derive(Debug, Clone, Default)]
pub struct ImplicitConfiguredInput {
    /// Version of the project data this state was derived from (0 = never updated)
    pub version: u64,
    /// Configuration dimensions
    pub configuration: ProjectConfiguration,
    /// Full path of the project file
    pub project_full_path: Option<PathBuf>,
    /// Directory containing the project file
    pub project_directory: Option<PathBuf>,
    /// Absolute output directory
    pub output_directory: Option<PathBuf>,
    /// Primary build output
    pub target_path: Option<PathBuf>,
    /// Newest imported project file, a proxy for all imports
    pub newest_import_input: Option<PathBuf>,
    /// `DisableFastUpToDateCheck`
    pub is_disabled: bool,
    /// `AccelerateBuildsInVisualStudio`; `None` when unspecified
    pub is_build_acceleration_enabled: Option<bool>,
    /// When the set of source items last changed
    pub last_items_changed_at_utc: Option<DateTime<Utc>>,
    /// Up-to-date check item types reported by the item schema
    pub item_types: Arc<BTreeSet<String>>,
    /// Rule name to item type, as of the last update
    pub catalog: Arc<BTreeMap<String, String>>,
    /// Source items by item type; item types with no items are absent
    pub input_source_items_by_item_type: Arc<BTreeMap<String, Vec<InputItem>>>,
    /// Analyzer assemblies
    pub resolved_analyzer_reference_paths: Arc<Vec<PathBuf>>,
    /// Compilation references
    pub resolved_compilation_reference_paths: Arc<Vec<PathBuf>>,
    /// Copy markers and original outputs of referenced projects
    pub copy_reference_inputs: Arc<Vec<PathBuf>>,
    /// Target paths of referenced projects
    pub referenced_project_target_paths: Arc<Vec<PathBuf>>,
    /// This project's copy marker
    pub copy_up_to_date_marker: Option<PathBuf>,
    /// Built items copied from elsewhere, destination to source
    pub copied_output_files: Arc<BTreeMap<PathBuf, PathBuf>>,
    /// Custom inputs
    pub up_to_date_check_input_items: Arc<ItemsBySetAndKind>,
    /// Custom outputs
    pub up_to_date_check_output_items: Arc<ItemsBySetAndKind>,
    /// Built outputs that are not copies
    pub up_to_date_check_built_items: Arc<ItemsBySetAndKind>,
    /// Non-default set names, sorted
    pub set_names: Arc<BTreeSet<SetName>>,
    /// Existing additional dependent files and their last-write times
    pub additional_dependent_file_times: Arc<BTreeMap<PathBuf, DateTime<Utc>>>,
    /// When the set of existing additional dependent files last changed
    pub last_additional_dependent_files_changed_at_utc: Option<DateTime<Utc>>,
    /// Hash of the source item set, persisted across sessions
    pub item_hash: Option<String>,
    /// Whether item state was restored from a previous session
    pub was_state_restored: bool,
}

/// Persisted item state restored at first observation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RestoredState {
    /// Item hash recorded in the previous session
    pub item_hash: String,
    /// When items last changed, as recorded in the previous session
    pub last_items_changed_at_utc: DateTime<Utc>,
}

impl ImplicitConfiguredInput {
    /// Empty state for `configuration`, before any project data arrived.
    #[must_use]
    pub fn empty(configuration: ProjectConfiguration) -> Self {
        Self {
            configuration,
            ..Self::default()
        }
    }

    /// Seed an empty state with item state persisted by a previous session.
    #[must_use]
    pub fn with_restored_state(&self, restored: &RestoredState) -> Self {
        Self {
            item_hash: Some(restored.item_hash.clone()),
            last_items_changed_at_utc: Some(restored.last_items_changed_at_utc),
            was_state_restored: true,
            ..self.clone()
        }
    }

    /// Derive the next state from `update`, reusing everything that did not change.
    #[must_use]
    pub fn update(&self, update: &ProjectUpdate, now: DateTime<Utc>) -> Self {
        let general = update.after(rules::CONFIGURATION_GENERAL);

        let project_full_path = general.property(properties::PROJECT_FULL_PATH).map(native_path);
        let project_directory = general
            .property(properties::PROJECT_DIRECTORY)
            .map(native_path)
            .or_else(|| project_full_path.as_deref().and_then(Path::parent).map(Path::to_path_buf));
        let base = project_directory.clone().unwrap_or_default();

        let output_directory = general
            .property(properties::OUT_DIR)
            .or_else(|| general.property(properties::OUTPUT_PATH))
            .map(|dir| resolve_path(&base, dir));
        let target_path = general
            .property(properties::TARGET_PATH)
            .map(|path| resolve_path(&base, path));
        let newest_import_input = general
            .property(properties::ALL_PROJECTS)
            .and_then(|imports| imports.split(';').map(str::trim).find(|i| !i.is_empty()))
            .map(|import| resolve_path(&base, import));
        let is_disabled = general
            .property(properties::DISABLE_FAST_UP_TO_DATE_CHECK)
            .is_some_and(parse_bool);
        let is_build_acceleration_enabled = general
            .property(properties::ACCELERATE_BUILDS)
            .map(parse_bool);

        // Resolved paths depend on the directory; a move invalidates all of them.
        let directory_changed = project_directory != self.project_directory;
        let changed = |rule: &str| directory_changed || update.rule_changed(rule);

        let resolved_analyzer_reference_paths = if changed(rules::RESOLVED_ANALYZER_REFERENCE) {
            Arc::new(reference_paths(&base, &update.after(rules::RESOLVED_ANALYZER_REFERENCE)))
        } else {
            Arc::clone(&self.resolved_analyzer_reference_paths)
        };

        let (resolved_compilation_reference_paths, copy_reference_inputs, referenced_project_target_paths) =
            if changed(rules::RESOLVED_COMPILATION_REFERENCE) {
                let references = update.after(rules::RESOLVED_COMPILATION_REFERENCE);
                (
                    Arc::new(reference_paths(&base, &references)),
                    Arc::new(copy_reference_inputs(&base, &references)),
                    Arc::new(referenced_target_paths(&base, &references)),
                )
            } else {
                (
                    Arc::clone(&self.resolved_compilation_reference_paths),
                    Arc::clone(&self.copy_reference_inputs),
                    Arc::clone(&self.referenced_project_target_paths),
                )
            };

        let copy_up_to_date_marker = if changed(rules::COPY_UP_TO_DATE_MARKER) {
            update
                .after(rules::COPY_UP_TO_DATE_MARKER)
                .items
                .keys()
                .next()
                .map(|marker| resolve_path(&base, marker))
        } else {
            self.copy_up_to_date_marker.clone()
        };

        let up_to_date_check_input_items = if changed(rules::UP_TO_DATE_CHECK_INPUT) {
            Arc::new(items_by_set_and_kind(&base, &update.after(rules::UP_TO_DATE_CHECK_INPUT)))
        } else {
            Arc::clone(&self.up_to_date_check_input_items)
        };
        let up_to_date_check_output_items = if changed(rules::UP_TO_DATE_CHECK_OUTPUT) {
            Arc::new(items_by_set_and_kind(&base, &update.after(rules::UP_TO_DATE_CHECK_OUTPUT)))
        } else {
            Arc::clone(&self.up_to_date_check_output_items)
        };
        let (up_to_date_check_built_items, copied_output_files) = if changed(rules::UP_TO_DATE_CHECK_BUILT) {
            let (built, copied) = built_items(&base, &update.after(rules::UP_TO_DATE_CHECK_BUILT));
            (Arc::new(built), Arc::new(copied))
        } else {
            (
                Arc::clone(&self.up_to_date_check_built_items),
                Arc::clone(&self.copied_output_files),
            )
        };

        let sets_changed = changed(rules::UP_TO_DATE_CHECK_INPUT)
            || changed(rules::UP_TO_DATE_CHECK_OUTPUT)
            || changed(rules::UP_TO_DATE_CHECK_BUILT);
        let set_names = if sets_changed {
            let sets = [
                up_to_date_check_input_items.as_ref(),
                up_to_date_check_output_items.as_ref(),
                up_to_date_check_built_items.as_ref(),
            ]
            .iter()
            .flat_map(|items| items.keys())
            .filter(|set| !set.is_default())
            .cloned()
            .collect();
            Arc::new(sets)
        } else {
            Arc::clone(&self.set_names)
        };

        // Item types
        let item_types_changed =
            *self.item_types != update.item_types || *self.catalog != update.catalog;
        let item_types = if item_types_changed {
            Arc::new(update.item_types.clone())
        } else {
            Arc::clone(&self.item_types)
        };
        let catalog = if item_types_changed {
            Arc::new(update.catalog.clone())
        } else {
            Arc::clone(&self.catalog)
        };

        let input_source_items_by_item_type =
            self.derive_source_items(update, &item_types, &catalog, item_types_changed || directory_changed);

        let item_hash = compute_item_hash(&input_source_items_by_item_type);
        let last_items_changed_at_utc = match &self.item_hash {
            Some(previous) if *previous != item_hash => {
                debug!("Project items changed for {}", update.configuration);
                Some(now)
            }
            _ => self.last_items_changed_at_utc,
        };

        let additional_dependent_file_times: BTreeMap<PathBuf, DateTime<Utc>> = update
            .additional_dependent_files
            .iter()
            .filter_map(|(path, time)| time.map(|t| (resolve_path(&base, path), t)))
            .collect();
        let existing_changed = self.version != 0
            && !additional_dependent_file_times
                .keys()
                .map(PathKey::new)
                .eq(self.additional_dependent_file_times.keys().map(PathKey::new));
        let last_additional_dependent_files_changed_at_utc = if existing_changed {
            Some(now)
        } else {
            self.last_additional_dependent_files_changed_at_utc
        };
        let additional_dependent_file_times =
            if additional_dependent_file_times == *self.additional_dependent_file_times {
                Arc::clone(&self.additional_dependent_file_times)
            } else {
                Arc::new(additional_dependent_file_times)
            };

        Self {
            version: update.version,
            configuration: update.configuration.clone(),
            project_full_path,
            project_directory,
            output_directory,
            target_path,
            newest_import_input,
            is_disabled,
            is_build_acceleration_enabled,
            last_items_changed_at_utc,
            item_types,
            catalog,
            input_source_items_by_item_type,
            resolved_analyzer_reference_paths,
            resolved_compilation_reference_paths,
            copy_reference_inputs,
            referenced_project_target_paths,
            copy_up_to_date_marker,
            copied_output_files,
            up_to_date_check_input_items,
            up_to_date_check_output_items,
            up_to_date_check_built_items,
            set_names,
            additional_dependent_file_times,
            last_additional_dependent_files_changed_at_utc,
            item_hash: Some(item_hash),
            was_state_restored: self.was_state_restored,
        }
    }

    fn derive_source_items(
        &self,
        update: &ProjectUpdate,
        item_types: &BTreeSet<String>,
        catalog: &BTreeMap<String, String>,
        all_changed: bool,
    ) -> Arc<BTreeMap<String, Vec<InputItem>>> {
        // item type -> rules feeding it
        let mut rules_by_item_type: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (rule, item_type) in catalog {
            if item_types.contains(item_type) {
                rules_by_item_type
                    .entry(item_type.as_str())
                    .or_default()
                    .push(rule.as_str());
            }
        }

        let dirty: Vec<&str> = rules_by_item_type
            .iter()
            .filter(|(_, rules)| all_changed || rules.iter().any(|rule| update.rule_changed(rule)))
            .map(|(item_type, _)| *item_type)
            .collect();

        if dirty.is_empty() && !all_changed {
            return Arc::clone(&self.input_source_items_by_item_type);
        }

        let mut by_item_type = if all_changed {
            BTreeMap::new()
        } else {
            (*self.input_source_items_by_item_type).clone()
        };

        for item_type in dirty {
            let mut seen = BTreeSet::new();
            let items: Vec<InputItem> = rules_by_item_type[item_type]
                .iter()
                .flat_map(|rule| update.after(rule).items.into_iter())
                .map(|(spec, metadata)| InputItem::from_metadata(&spec, &metadata))
                .filter(|item| seen.insert(item.key()))
                .collect();

            // Empty item types count as absent.
            if items.is_empty() {
                let _ = by_item_type.remove(item_type);
            } else {
                let _ = by_item_type.insert(item_type.to_string(), items);
            }
        }

        Arc::new(by_item_type)
    }

    /// Source items that must be copied on every build.
    #[must_use]
    pub fn copy_always_items(&self) -> Vec<(&str, &InputItem)> {
        self.source_items_with_copy_type(CopyType::Always)
    }

    /// Source items with the given copy policy, with their item type.
    #[must_use]
    pub fn source_items_with_copy_type(&self, copy_type: CopyType) -> Vec<(&str, &InputItem)> {
        self.input_source_items_by_item_type
            .iter()
            .flat_map(|(item_type, items)| items.iter().map(move |item| (item_type.as_str(), item)))
            .filter(|(_, item)| item.copy_type == copy_type)
            .collect()
    }

    /// Copy data this configuration publishes for referencing projects.
    #[must_use]
    pub fn project_copy_data(&self) -> ProjectCopyData {
        let Some(target_path) = self.target_path.clone() else {
            return ProjectCopyData::default();
        };
        let base = self.project_directory.clone().unwrap_or_default();

        ProjectCopyData {
            project_full_path: self.project_full_path.clone().unwrap_or_default(),
            target_path,
            copy_items: self
                .input_source_items_by_item_type
                .values()
                .flatten()
                .filter(|item| item.copy_type != CopyType::Never)
                .map(|item| CopyItem::from_input_item(&base, item))
                .collect(),
            referenced_target_paths: self.referenced_project_target_paths.as_ref().clone(),
        }
    }

    /// Custom items of `set`, across all kinds.
    #[must_use]
    pub fn set_items(items: &ItemsBySetAndKind, set: &SetName) -> Vec<SetItem> {
        items
            .get(set)
            .into_iter()
            .flat_map(|by_kind| {
                by_kind.iter().flat_map(|(kind, paths)| {
                    paths.iter().map(move |path| SetItem {
                        path: path.clone(),
                        set: set.clone(),
                        kind: kind.clone(),
                    })
                })
            })
            .collect()
    }
}

/// All implicitly active configurations of a project, checked as a unit.
#[derive(Debug, Clone, Default)]
pub struct UpToDateCheckConfiguredInput {
    /// One state per configuration, in stable order
    pub implicit_inputs: Vec<Arc<ImplicitConfiguredInput>>,
}

impl UpToDateCheckConfiguredInput {
    /// Aggregate of the given states.
    #[must_use]
    pub fn new(implicit_inputs: Vec<Arc<ImplicitConfiguredInput>>) -> Self {
        Self { implicit_inputs }
    }
}

fn parse_bool(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

fn non_empty<'a>(metadata: &'a crate::project_data::ItemMetadata, name: &str) -> Option<&'a str> {
    metadata
        .get(name)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn reference_paths(base: &Path, rule: &RuleSnapshot) -> Vec<PathBuf> {
    rule.items
        .iter()
        .map(|(spec, metadata)| {
            let path = non_empty(metadata, metadata::RESOLVED_PATH).unwrap_or(spec);
            resolve_path(base, path)
        })
        .collect()
}

fn copy_reference_inputs(base: &Path, rule: &RuleSnapshot) -> Vec<PathBuf> {
    let mut inputs = Vec::new();
    for item_metadata in rule.items.values() {
        for name in [metadata::COPY_UP_TO_DATE_MARKER, metadata::ORIGINAL_PATH] {
            if let Some(path) = non_empty(item_metadata, name) {
                inputs.push(resolve_path(base, path));
            }
        }
    }
    inputs
}

fn referenced_target_paths(base: &Path, rule: &RuleSnapshot) -> Vec<PathBuf> {
    rule.items
        .iter()
        .filter(|(_, metadata)| {
            non_empty(metadata, metadata::REFERENCE_SOURCE_TARGET)
                .is_some_and(|target| target.eq_ignore_ascii_case("ProjectReference"))
        })
        .map(|(spec, metadata)| {
            let path = non_empty(metadata, metadata::ORIGINAL_PATH)
                .or_else(|| non_empty(metadata, metadata::RESOLVED_PATH))
                .unwrap_or(spec);
            resolve_path(base, path)
        })
        .collect()
}

fn kind_of(item_metadata: &crate::project_data::ItemMetadata) -> KindName {
    non_empty(item_metadata, metadata::KIND).map_or_else(KindName::none, KindName::new)
}

fn items_by_set_and_kind(base: &Path, rule: &RuleSnapshot) -> ItemsBySetAndKind {
    let mut items = ItemsBySetAndKind::new();
    for (spec, item_metadata) in &rule.items {
        // A semicolon-delimited Set puts the item in several sets.
        let kind = kind_of(item_metadata);
        let sets: Vec<SetName> = match non_empty(item_metadata, metadata::SET) {
            Some(value) => value
                .split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(SetName::new)
                .collect(),
            None => vec![SetName::default_set()],
        };
        for set in sets {
            items
                .entry(set)
                .or_default()
                .entry(kind.clone())
                .or_default()
                .push(resolve_path(base, spec));
        }
    }
    items
}

fn built_items(base: &Path, rule: &RuleSnapshot) -> (ItemsBySetAndKind, BTreeMap<PathBuf, PathBuf>) {
    let mut copied = BTreeMap::new();
    let mut built = RuleSnapshot::default();

    for (spec, item_metadata) in &rule.items {
        match non_empty(item_metadata, metadata::ORIGINAL) {
            Some(original) => {
                let _ = copied.insert(resolve_path(base, spec), resolve_path(base, original));
            }
            None => {
                let _ = built.items.insert(spec.clone(), item_metadata.clone());
            }
        }
    }

    (items_by_set_and_kind(base, &built), copied)
}

/// SHA-256 over the sorted `(item type, path)` pairs of all source items.
#[must_use]
pub fn compute_item_hash(items: &BTreeMap<String, Vec<InputItem>>) -> String {
    let mut keys: Vec<(String, PathKey)> = items
        .iter()
        .flat_map(|(item_type, items)| {
            items
                .iter()
                .map(move |item| (item_type.to_lowercase(), item.key()))
        })
        .collect();
    keys.sort();

    let mut hasher = Sha256::new();
    for (item_type, key) in keys {
        hasher.update(item_type.as_bytes());
        hasher.update(b"|");
        hasher.update(key.as_str().as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project_data::{ItemMetadata, ProjectSnapshot};
    use chrono::TimeZone;

    fn t(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).single().unwrap()
    }

    fn items(specs: &[&str]) -> RuleSnapshot {
        RuleSnapshot {
            properties: BTreeMap::new(),
            items: specs
                .iter()
                .map(|s| ((*s).to_string(), ItemMetadata::new()))
                .collect(),
        }
    }

    fn snapshot(version: u64, compile: &[&str]) -> ProjectSnapshot {
        let mut general = RuleSnapshot::default();
        let _ = general
            .properties
            .insert("MSBuildProjectFullPath".into(), "/repo/App/App.csproj".into());
        let _ = general.properties.insert("OutDir".into(), "bin/Debug/".into());
        let _ = general
            .properties
            .insert("TargetPath".into(), "/repo/App/bin/Debug/App.dll".into());
        let _ = general
            .properties
            .insert("MSBuildAllProjects".into(), "/sdk/newest.props;/sdk/older.props".into());

        let mut snapshot = ProjectSnapshot {
            version,
            ..ProjectSnapshot::default()
        };
        let _ = snapshot.rules.insert("ConfigurationGeneral".into(), general);
        let _ = snapshot.rules.insert("Compile".into(), items(compile));
        let _ = snapshot.up_to_date_check_item_types.insert("Compile".into());
        let _ = snapshot.catalog.insert("Compile".into(), "Compile".into());
        snapshot
    }

    fn apply(
        state: &ImplicitConfiguredInput,
        previous: Option<&ProjectSnapshot>,
        next: &ProjectSnapshot,
        now: DateTime<Utc>,
    ) -> ImplicitConfiguredInput {
        state.update(&ProjectUpdate::diff(previous, next), now)
    }

    #[test]
    fn test_scalar_properties() {
        let s = snapshot(1, &["Program.cs"]);
        let state = apply(&ImplicitConfiguredInput::default(), None, &s, t(100));

        assert_eq!(state.version, 1);
        assert_eq!(state.project_directory, Some(PathBuf::from("/repo/App")));
        assert_eq!(state.output_directory, Some(PathBuf::from("/repo/App/bin/Debug/")));
        assert_eq!(state.newest_import_input, Some(PathBuf::from("/sdk/newest.props")));
        assert!(!state.is_disabled);
        assert_eq!(state.is_build_acceleration_enabled, None);
        assert_eq!(state.input_source_items_by_item_type["Compile"].len(), 1);
    }

    #[test]
    fn test_bootstrap_does_not_set_items_changed() {
        let s = snapshot(1, &["Program.cs"]);
        let state = apply(&ImplicitConfiguredInput::default(), None, &s, t(100));
        assert!(state.item_hash.is_some());
        assert_eq!(state.last_items_changed_at_utc, None);
    }

    #[test]
    fn test_adding_an_item_moves_items_changed_time() {
        let s1 = snapshot(1, &["Program.cs"]);
        let s2 = snapshot(2, &["Program.cs", "Helper.cs"]);
        let state1 = apply(&ImplicitConfiguredInput::default(), None, &s1, t(100));
        let state2 = apply(&state1, Some(&s1), &s2, t(200));
        assert_eq!(state2.last_items_changed_at_utc, Some(t(200)));
    }

    #[test]
    fn test_metadata_change_does_not_move_items_changed_time() {
        let s1 = snapshot(1, &["Program.cs"]);
        let mut s2 = snapshot(2, &["Program.cs"]);
        let _ = s2
            .rules
            .get_mut("Compile")
            .unwrap()
            .items
            .get_mut("Program.cs")
            .unwrap()
            .insert("Link".into(), "Linked.cs".into());

        let state1 = apply(&ImplicitConfiguredInput::default(), None, &s1, t(100));
        let state2 = apply(&state1, Some(&s1), &s2, t(200));
        assert_eq!(state2.last_items_changed_at_utc, None);
        assert_eq!(
            state2.input_source_items_by_item_type["Compile"][0].target_path.as_deref(),
            Some("Linked.cs")
        );
    }

    #[test]
    fn test_unchanged_rules_share_collections() {
        let s1 = snapshot(1, &["Program.cs"]);
        let mut s2 = snapshot(2, &["Program.cs"]);
        let _ = s2
            .rules
            .insert("UpToDateCheckInput".into(), items(&["schema.json"]));

        let state1 = apply(&ImplicitConfiguredInput::default(), None, &s1, t(100));
        let state2 = apply(&state1, Some(&s1), &s2, t(200));

        assert!(Arc::ptr_eq(
            &state1.input_source_items_by_item_type,
            &state2.input_source_items_by_item_type
        ));
        assert!(Arc::ptr_eq(
            &state1.resolved_compilation_reference_paths,
            &state2.resolved_compilation_reference_paths
        ));
        assert!(!Arc::ptr_eq(
            &state1.up_to_date_check_input_items,
            &state2.up_to_date_check_input_items
        ));
    }

    #[test]
    fn test_empty_item_types_are_absent() {
        let mut s = snapshot(1, &[]);
        let _ = s.up_to_date_check_item_types.insert("Content".into());
        let _ = s.catalog.insert("Content".into(), "Content".into());
        let _ = s.rules.insert("Content".into(), items(&[]));

        let state = apply(&ImplicitConfiguredInput::default(), None, &s, t(100));
        assert!(state.input_source_items_by_item_type.is_empty());
    }

    #[test]
    fn test_restored_hash_mismatch_marks_items_changed() {
        let restored = RestoredState {
            item_hash: "stale".into(),
            last_items_changed_at_utc: t(50),
        };
        let state = ImplicitConfiguredInput::default().with_restored_state(&restored);
        let s = snapshot(1, &["Program.cs"]);
        let state = apply(&state, None, &s, t(100));
        assert!(state.was_state_restored);
        assert_eq!(state.last_items_changed_at_utc, Some(t(100)));
    }

    #[test]
    fn test_restored_hash_match_keeps_time() {
        let s = snapshot(1, &["Program.cs"]);
        let fresh = apply(&ImplicitConfiguredInput::default(), None, &s, t(100));
        let restored = RestoredState {
            item_hash: fresh.item_hash.clone().unwrap(),
            last_items_changed_at_utc: t(50),
        };
        let state = ImplicitConfiguredInput::default().with_restored_state(&restored);
        let state = apply(&state, None, &s, t(100));
        assert_eq!(state.last_items_changed_at_utc, Some(t(50)));
    }

    #[test]
    fn test_custom_items_grouped_by_set_and_kind() {
        let mut s = snapshot(1, &["Program.cs"]);
        let mut custom = RuleSnapshot::default();
        let mut docs = ItemMetadata::new();
        let _ = docs.insert("Set".into(), "Docs;Site".into());
        let _ = docs.insert("Kind".into(), "Markdown".into());
        let _ = custom.items.insert("README.md".into(), docs);
        let _ = custom.items.insert("schema.json".into(), ItemMetadata::new());
        let _ = s.rules.insert("UpToDateCheckInput".into(), custom);

        let state = apply(&ImplicitConfiguredInput::default(), None, &s, t(100));
        assert_eq!(state.set_names.len(), 2);
        let site_items = &state.up_to_date_check_input_items[&SetName::new("site")];
        assert!(site_items.contains_key(&KindName::new("markdown")));
        let default_items =
            ImplicitConfiguredInput::set_items(&state.up_to_date_check_input_items, &SetName::default_set());
        assert_eq!(default_items.len(), 1);
        let docs_items =
            ImplicitConfiguredInput::set_items(&state.up_to_date_check_input_items, &SetName::new("docs"));
        assert_eq!(docs_items[0].path, PathBuf::from("/repo/App/README.md"));
    }

    #[test]
    fn test_built_items_with_original_are_copies() {
        let mut s = snapshot(1, &["Program.cs"]);
        let mut built = RuleSnapshot::default();
        let mut copy = ItemMetadata::new();
        let _ = copy.insert("Original".into(), "/repo/Lib/bin/Lib.dll".into());
        let _ = built.items.insert("bin/Debug/Lib.dll".into(), copy);
        let _ = built.items.insert("bin/Debug/App.dll".into(), ItemMetadata::new());
        let _ = s.rules.insert("UpToDateCheckBuilt".into(), built);

        let state = apply(&ImplicitConfiguredInput::default(), None, &s, t(100));
        assert_eq!(
            state.copied_output_files.get(Path::new("/repo/App/bin/Debug/Lib.dll")),
            Some(&PathBuf::from("/repo/Lib/bin/Lib.dll"))
        );
        let outputs =
            ImplicitConfiguredInput::set_items(&state.up_to_date_check_built_items, &SetName::default_set());
        assert_eq!(outputs.len(), 1);
    }

    #[test]
    fn test_additional_dependent_files_set_change() {
        let mut s1 = snapshot(1, &["Program.cs"]);
        let _ = s1.additional_dependent_files.insert("/repo/global.json".into(), Some(t(10)));
        let _ = s1.additional_dependent_files.insert("/repo/.editorconfig".into(), None);
        let mut s2 = s1.clone();
        s2.version = 2;
        let _ = s2.additional_dependent_files.insert("/repo/.editorconfig".into(), Some(t(20)));

        let state1 = apply(&ImplicitConfiguredInput::default(), None, &s1, t(100));
        assert_eq!(state1.last_additional_dependent_files_changed_at_utc, None);
        assert_eq!(state1.additional_dependent_file_times.len(), 1);

        let state2 = apply(&state1, Some(&s1), &s2, t(200));
        assert_eq!(state2.last_additional_dependent_files_changed_at_utc, Some(t(200)));
    }

    #[test]
    fn test_project_references_and_markers() {
        let mut s = snapshot(1, &["Program.cs"]);
        let mut references = RuleSnapshot::default();
        let mut lib = ItemMetadata::new();
        let _ = lib.insert("ResolvedPath".into(), "/repo/Lib/obj/ref/Lib.dll".into());
        let _ = lib.insert("OriginalPath".into(), "/repo/Lib/bin/Lib.dll".into());
        let _ = lib.insert("CopyUpToDateMarker".into(), "/repo/Lib/obj/Lib.CopyComplete".into());
        let _ = lib.insert("ReferenceSourceTarget".into(), "ProjectReference".into());
        let _ = references.items.insert("Lib.dll".into(), lib);
        let _ = s.rules.insert("ResolvedCompilationReference".into(), references);

        let state = apply(&ImplicitConfiguredInput::default(), None, &s, t(100));
        assert_eq!(
            state.resolved_compilation_reference_paths.as_ref(),
            &vec![PathBuf::from("/repo/Lib/obj/ref/Lib.dll")]
        );
        assert_eq!(state.copy_reference_inputs.len(), 2);
        assert_eq!(
            state.project_copy_data().referenced_target_paths,
            vec![PathBuf::from("/repo/Lib/bin/Lib.dll")]
        );
    }
}

//! Snapshots of expansion and logging state, independent of tree identity.
//!
//! A [`RuleModelState`] is a nested map keyed by node label. It is merged
//! with the live tree rather than replaced by it: entries for nodes missing
//! from the current compile are kept, so an import that is temporarily not
//! compiled gets its choices back once it returns.
//!
//! ## File Structure
//!
//! ```text
//! <snapshot dir>/
//! ├── session-main-1f3a09c2e5d7b846.json   # Autosaved state, one per project
//! ├── greeting.json     # Named snapshots
//! └── farewell.json
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::SnapshotError;
use crate::model::{NodeId, RuleModel};
use crate::state::LoggingState;

/// Current snapshot file format version.
const FORMAT_VERSION: u32 = 1;

/// Number of entries kept in the recently-used list.
pub const MAX_RECENT: usize = 10;

/// Prefix of the autosaved session snapshots.
pub const SESSION_PREFIX: &str = "session";

const SNAPSHOT_EXTENSION: &str = "json";

/// Saved properties of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    #[serde(default)]
    pub expanded: bool,
    pub state: LoggingState,
    #[serde(default)]
    pub is_import: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, SnapshotEntry>,
}

impl SnapshotEntry {
    fn new(state: LoggingState, is_import: bool) -> Self {
        Self {
            expanded: false,
            state,
            is_import,
            children: BTreeMap::new(),
        }
    }

    /// Union of both trees; values from `newer` win, entries only in `self` stay.
    fn merge_from(&mut self, newer: &SnapshotEntry) {
        self.expanded = newer.expanded;
        self.state = newer.state;
        self.is_import = newer.is_import;
        for (label, child) in &newer.children {
            match self.children.get_mut(label) {
                Some(existing) => existing.merge_from(child),
                None => {
                    self.children.insert(label.clone(), child.clone());
                }
            }
        }
    }

    /// Number of entries in this subtree, including `self`.
    pub fn entry_count(&self) -> usize {
        1 + self.children.values().map(|c| c.entry_count()).sum::<usize>()
    }
}

/// Label-indexed snapshot of a rule tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleModelState {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    root_label: Option<String>,
    #[serde(default)]
    root: Option<SnapshotEntry>,
}

impl RuleModelState {
    /// An empty snapshot.
    pub fn new() -> Self {
        Self {
            version: FORMAT_VERSION,
            ..Default::default()
        }
    }

    /// A fresh snapshot of `model`.
    pub fn capture(model: &RuleModel) -> Self {
        let mut state = Self::new();
        state.retrieve(model);
        state
    }

    pub fn root_label(&self) -> Option<&str> {
        self.root_label.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn entry_count(&self) -> usize {
        self.root.as_ref().map(SnapshotEntry::entry_count).unwrap_or(0)
    }

    /// Entry at a label path below the root, e.g. `["sub", "greet"]`.
    pub fn entry<S: AsRef<str>>(&self, labels: &[S]) -> Option<&SnapshotEntry> {
        labels
            .iter()
            .try_fold(self.root.as_ref()?, |entry, label| {
                entry.children.get(label.as_ref())
            })
    }

    /// Record the live values of `model`, keeping entries for absent nodes.
    ///
    /// A model with a different root label belongs to another project; the
    /// snapshot then starts over.
    pub fn retrieve(&mut self, model: &RuleModel) {
        let root_label = model.root_label();
        if self.root_label.as_deref() != Some(root_label) {
            if self.root_label.is_some() {
                debug!(
                    old = ?self.root_label,
                    new = root_label,
                    "Root label changed, discarding snapshot"
                );
            }
            self.root_label = Some(root_label.to_string());
            self.root = None;
        }

        let root_id = model.root();
        let root_node = model.node(root_id);
        let entry = self
            .root
            .get_or_insert_with(|| SnapshotEntry::new(root_node.state(), root_node.is_import()));
        record(entry, model, root_id);
    }

    /// Merge a newer snapshot of the same project into this one.
    pub fn merge_from(&mut self, newer: &RuleModelState) {
        let Some(newer_root) = newer.root.as_ref() else {
            return;
        };
        if self.root_label != newer.root_label {
            *self = newer.clone();
            return;
        }
        match self.root.as_mut() {
            Some(root) => root.merge_from(newer_root),
            None => self.root = Some(newer_root.clone()),
        }
    }

    /// Restore expansion and rule states onto `model`.
    ///
    /// Only nodes with an entry at the same label path are touched. Import
    /// states follow from their rules through aggregation. Afterwards the
    /// snapshot is refreshed from the live tree. Returns `false` without
    /// touching anything when the root labels differ.
    pub fn apply(&mut self, model: &mut RuleModel) -> bool {
        if self.root_label.as_deref() != Some(model.root_label()) {
            debug!(
                snapshot = ?self.root_label,
                model = model.root_label(),
                "Snapshot does not apply to this model"
            );
            return false;
        }
        let Some(root) = self.root.as_ref() else {
            return false;
        };

        let mut updates = Vec::new();
        collect_updates(root, model, model.root(), &mut updates);

        let mut restored = 0usize;
        for (node, expanded, state) in updates {
            model.set_expanded(node, expanded);
            if let Some(state) = state {
                match model.set_state(node, state) {
                    Ok(()) => restored += 1,
                    Err(e) => warn!(?node, error = %e, "Could not restore logging state"),
                }
            }
        }

        self.retrieve(model);
        debug!(restored, "Applied snapshot");
        true
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Write the snapshot as JSON.
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), entries = self.entry_count(), "Saved snapshot");
        Ok(())
    }

    /// Read a snapshot written by [`RuleModelState::save`].
    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        if !path.exists() {
            return Err(SnapshotError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let json = std::fs::read_to_string(path)?;
        let state: Self = serde_json::from_str(&json).map_err(|source| SnapshotError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), entries = state.entry_count(), "Loaded snapshot");
        Ok(state)
    }
}

fn record(entry: &mut SnapshotEntry, model: &RuleModel, id: NodeId) {
    let node = model.node(id);
    entry.expanded = node.expanded;
    entry.state = node.state();
    entry.is_import = node.is_import();
    for child in &node.children {
        let child_node = model.node(*child);
        let child_entry = entry
            .children
            .entry(child_node.label.clone())
            .or_insert_with(|| SnapshotEntry::new(child_node.state(), child_node.is_import()));
        record(child_entry, model, *child);
    }
}

fn collect_updates(
    entry: &SnapshotEntry,
    model: &RuleModel,
    id: NodeId,
    out: &mut Vec<(NodeId, bool, Option<LoggingState>)>,
) {
    let node = model.node(id);
    let state = (node.is_rule() && !entry.is_import && !entry.state.is_derived())
        .then_some(entry.state);
    out.push((id, entry.expanded, state));

    for child in &node.children {
        let label = &model.node(*child).label;
        if let Some(child_entry) = entry.children.get(label) {
            collect_updates(child_entry, model, *child, out);
        }
    }
}

/// Metadata about a snapshot file on disk.
#[derive(Debug, Clone)]
pub struct SnapshotInfo {
    pub name: String,
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// Directory of named snapshot files.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the snapshot called `name`.
    ///
    /// Names are plain file names; anything that could leave the snapshot
    /// directory is rejected.
    pub fn path_for(&self, name: &str) -> Result<PathBuf, SnapshotError> {
        let stem = name.strip_suffix(".json").unwrap_or(name);
        if stem.is_empty()
            || stem == "."
            || stem == ".."
            || stem.contains(['/', '\\'])
            || Path::new(stem).is_absolute()
        {
            return Err(SnapshotError::InvalidName {
                name: name.to_string(),
            });
        }
        Ok(self.dir.join(format!("{stem}.{SNAPSHOT_EXTENSION}")))
    }

    pub fn save_named(&self, name: &str, state: &RuleModelState) -> Result<PathBuf, SnapshotError> {
        let path = self.path_for(name)?;
        state.save(&path)?;
        Ok(path)
    }

    pub fn load_named(&self, name: &str) -> Result<RuleModelState, SnapshotError> {
        RuleModelState::load(&self.path_for(name)?)
    }

    /// Save the state of the session working on `source_root`.
    pub fn save_session(
        &self,
        source_root: &Path,
        state: &RuleModelState,
    ) -> Result<PathBuf, SnapshotError> {
        self.save_named(&session_name(source_root), state)
    }

    /// Load the last session of `source_root`; a missing or unreadable
    /// file yields `None`.
    pub fn load_session(&self, source_root: &Path) -> Option<RuleModelState> {
        match self.load_named(&session_name(source_root)) {
            Ok(state) => Some(state),
            Err(SnapshotError::NotFound { .. }) => None,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable session snapshot");
                None
            }
        }
    }

    /// The most recently modified snapshots, newest first.
    ///
    /// Built by scanning the directory on every call.
    pub fn recent(&self) -> Result<Vec<SnapshotInfo>, SnapshotError> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }

        let mut snapshots: Vec<SnapshotInfo> = std::fs::read_dir(&self.dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == SNAPSHOT_EXTENSION)
                    .unwrap_or(false)
            })
            .filter_map(|e| {
                let path = e.path();
                let name = path.file_stem()?.to_str()?.to_string();
                let modified = e.metadata().ok()?.modified().ok()?;
                Some(SnapshotInfo {
                    name,
                    path,
                    modified,
                })
            })
            .collect();

        snapshots.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
        snapshots.truncate(MAX_RECENT);
        Ok(snapshots)
    }
}

/// Snapshot name of the autosaved session for `source_root`.
///
/// The directory name keeps the file recognizable; the FNV-1a hash of the
/// full path keeps two projects with the same directory name apart.
pub fn session_name(source_root: &Path) -> String {
    let dir_name: String = source_root
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();

    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in source_root.to_string_lossy().bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }

    if dir_name.is_empty() {
        format!("{SESSION_PREFIX}-{hash:016x}")
    } else {
        format!("{SESSION_PREFIX}-{dir_name}-{hash:016x}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::parse_location_str;
    use crate::model::RuleId;

    fn build(text: &str) -> RuleModel {
        RuleModel::build(&parse_location_str(text).unwrap(), Path::new("/p")).unwrap()
    }

    const T1: &str = r#"
label: main
children:
  - { label: r1, id: 1 }
  - label: sub
    kind: import
    children:
      - { label: r2, id: 2 }
  - label: extra
    kind: import
    children:
      - { label: r9, id: 9 }
"#;

    const T2: &str = r#"
label: main
children:
  - { label: r1, id: 11 }
  - label: sub
    kind: import
    children:
      - { label: r2, id: 12 }
      - { label: fresh, id: 13 }
"#;

    #[test]
    fn test_capture_then_apply_changes_nothing() {
        let mut model = build(T1);
        model.set_rule_state(RuleId(2), LoggingState::IfTrue).unwrap();
        model.set_expanded(model.root(), true);

        let before: Vec<(LoggingState, bool)> = model
            .node_ids()
            .map(|n| (model.state(n), model.node(n).expanded))
            .collect();
        let mut snapshot = RuleModelState::capture(&model);
        let captured = snapshot.clone();

        assert!(snapshot.apply(&mut model));
        let after: Vec<(LoggingState, bool)> = model
            .node_ids()
            .map(|n| (model.state(n), model.node(n).expanded))
            .collect();
        assert_eq!(before, after);
        assert_eq!(snapshot, captured);
    }

    #[test]
    fn test_apply_to_different_shape_uses_shared_labels() {
        let mut t1 = build(T1);
        t1.set_rule_state(RuleId(1), LoggingState::Always).unwrap();
        t1.set_rule_state(RuleId(2), LoggingState::IfFalse).unwrap();
        t1.set_rule_state(RuleId(9), LoggingState::IfTrue).unwrap();
        let mut s1 = RuleModelState::capture(&t1);

        let mut t2 = build(T2);
        assert!(s1.apply(&mut t2));
        assert_eq!(t2.state(t2.rule(RuleId(11)).unwrap()), LoggingState::Always);
        assert_eq!(t2.state(t2.rule(RuleId(12)).unwrap()), LoggingState::IfFalse);
        assert_eq!(t2.state(t2.rule(RuleId(13)).unwrap()), LoggingState::Never);

        // Entries for nodes missing from t2 survive.
        let r9 = s1.entry(&["extra", "r9"]).unwrap();
        assert_eq!(r9.state, LoggingState::IfTrue);
        assert!(s1.entry(&["sub", "fresh"]).is_some());
    }

    #[test]
    fn test_merge_keeps_absent_entries() {
        let mut t1 = build(T1);
        t1.set_rule_state(RuleId(9), LoggingState::Always).unwrap();
        let mut s1 = RuleModelState::capture(&t1);

        let mut t2 = build(T2);
        t2.set_rule_state(RuleId(11), LoggingState::IfTrue).unwrap();
        s1.merge_from(&RuleModelState::capture(&t2));

        assert_eq!(s1.entry(&["extra", "r9"]).unwrap().state, LoggingState::Always);
        assert_eq!(s1.entry(&["r1"]).unwrap().state, LoggingState::IfTrue);
        assert!(s1.entry(&["sub", "fresh"]).is_some());
    }

    #[test]
    fn test_apply_with_other_root_is_noop() {
        let t1 = build(T1);
        let mut snapshot = RuleModelState::capture(&t1);
        let mut other = build("label: other\nchildren:\n  - { label: r1, id: 1 }\n");
        other.set_rule_state(RuleId(1), LoggingState::Always).unwrap();

        assert!(!snapshot.apply(&mut other));
        assert_eq!(other.state(other.rule(RuleId(1)).unwrap()), LoggingState::Always);
        assert_eq!(snapshot.root_label(), Some("main"));
    }

    #[test]
    fn test_save_load_apply_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());

        let mut model = build(T1);
        model.set_rule_state(RuleId(9), LoggingState::IfFalse).unwrap();
        let sub = model.find_by_labels(&["sub"]).unwrap();
        model.set_expanded(sub, true);
        store
            .save_named("debugging", &RuleModelState::capture(&model))
            .unwrap();

        let mut fresh = build(T1);
        let mut loaded = store.load_named("debugging").unwrap();
        assert!(loaded.apply(&mut fresh));
        assert_eq!(fresh.state(fresh.rule(RuleId(9)).unwrap()), LoggingState::IfFalse);
        assert!(fresh.node(sub).expanded);
    }

    #[test]
    fn test_load_failures_do_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        assert!(matches!(
            store.load_named("missing"),
            Err(SnapshotError::NotFound { .. })
        ));

        std::fs::write(store.path_for("broken").unwrap(), "{ not json").unwrap();
        assert!(matches!(
            store.load_named("broken"),
            Err(SnapshotError::Corrupt { .. })
        ));
        assert!(store.load_session(Path::new("/p")).is_none());
        std::fs::write(
            store.path_for(&session_name(Path::new("/p"))).unwrap(),
            "{ not json",
        )
        .unwrap();
        assert!(store.load_session(Path::new("/p")).is_none());
    }

    #[test]
    fn test_names_cannot_leave_the_snapshot_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshots"));
        let state = RuleModelState::capture(&build(T1));

        for name in ["../x", "a/b", "a\\b", "..", ".", "", ".json", "/etc/x"] {
            assert!(
                matches!(store.path_for(name), Err(SnapshotError::InvalidName { .. })),
                "{name:?} accepted"
            );
        }
        assert!(store.save_named("../escaped", &state).is_err());
        assert!(!dir.path().join("escaped.json").exists());

        assert_eq!(
            store.path_for("debugging").unwrap(),
            dir.path().join("snapshots").join("debugging.json")
        );
        assert_eq!(
            store.path_for("debugging.json").unwrap(),
            store.path_for("debugging").unwrap()
        );
    }

    #[test]
    fn test_sessions_are_kept_per_project() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let a = Path::new("/work/a/rules");
        let b = Path::new("/work/b/rules");
        assert_ne!(session_name(a), session_name(b));
        assert!(session_name(a).starts_with("session-rules-"));

        let mut model = build(T1);
        model.set_rule_state(RuleId(1), LoggingState::Always).unwrap();
        store.save_session(a, &RuleModelState::capture(&model)).unwrap();
        let other = build("label: other\nchildren:\n  - { label: r1, id: 1 }\n");
        store.save_session(b, &RuleModelState::capture(&other)).unwrap();

        let loaded = store.load_session(a).unwrap();
        assert_eq!(loaded.root_label(), Some("main"));
        assert_eq!(loaded.entry(&["r1"]).unwrap().state, LoggingState::Always);
        assert_eq!(store.load_session(b).unwrap().root_label(), Some("other"));
    }

    #[test]
    fn test_recent_is_bounded_and_ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let state = RuleModelState::capture(&build(T1));
        for i in 0..12 {
            store.save_named(&format!("snap{i:02}"), &state).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let recent = store.recent().unwrap();
        assert_eq!(recent.len(), MAX_RECENT);
        assert!(recent.iter().all(|s| s.name.starts_with("snap")));
    }
}

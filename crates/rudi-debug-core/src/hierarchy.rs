//! Mirror of the rule source directory, kept in step with filesystem events.
//!
//! Every rule source file and directory below the source root gets a
//! [`FileNode`]. A file is flagged as modified when it is newer than the last
//! compiled location file; any flagged file puts the whole project
//! [`SyncStatus::OutOfSync`] until the next compile is observed.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::model::{normalize_path, NodeId, RuleModel, RULE_SOURCE_EXTENSION};

/// Role of a file in the last compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileUsage {
    /// Root import of the compile.
    Main,
    /// Source of the configured wrapper class.
    Wrapper,
    /// Part of the import set.
    Used,
    /// Rule source not reached by the compile.
    NotUsed,
    IsFolder,
}

impl FileUsage {
    /// Get a short symbol for the usage.
    pub fn symbol(&self) -> &'static str {
        match self {
            FileUsage::Main => "M",
            FileUsage::Wrapper => "W",
            FileUsage::Used => "U",
            FileUsage::NotUsed => "?",
            FileUsage::IsFolder => "/",
        }
    }
}

/// Whether the compiled model reflects the sources on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Nothing has been compiled yet.
    Unknown,
    Synced,
    OutOfSync,
}

/// One file or folder of the source hierarchy.
#[derive(Debug, Clone)]
pub struct FileNode {
    pub path: PathBuf,
    pub usage: FileUsage,
    pub modified: bool,
    /// Import of the current model compiled from this file.
    pub linked_import: Option<NodeId>,
    pub parent: Option<PathBuf>,
    pub children: BTreeSet<PathBuf>,
}

impl FileNode {
    fn new(path: PathBuf, usage: FileUsage, parent: Option<PathBuf>) -> Self {
        Self {
            path,
            usage,
            modified: false,
            linked_import: None,
            parent,
            children: BTreeSet::new(),
        }
    }

    pub fn is_folder(&self) -> bool {
        self.usage == FileUsage::IsFolder
    }

    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Whether `path` names a rule source file.
pub fn is_rule_source(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext == RULE_SOURCE_EXTENSION)
        .unwrap_or(false)
}

/// `path → FileNode` map mirrored as a tree below the source root.
#[derive(Debug)]
pub struct FileHierarchy {
    root: PathBuf,
    location_file: PathBuf,
    location_mtime: Option<SystemTime>,
    nodes: HashMap<PathBuf, FileNode>,
    status: SyncStatus,
}

impl FileHierarchy {
    /// Create a hierarchy for `root`; the tree is populated by
    /// [`FileHierarchy::add_directory`].
    pub fn new(root: &Path, location_file: &Path) -> Self {
        let root = normalize_path(root);
        let location_file = normalize_path(location_file);
        let location_mtime = mtime(&location_file);
        let status = if location_mtime.is_some() {
            SyncStatus::Synced
        } else {
            SyncStatus::Unknown
        };

        let mut nodes = HashMap::new();
        nodes.insert(
            root.clone(),
            FileNode::new(root.clone(), FileUsage::IsFolder, None),
        );

        Self {
            root,
            location_file,
            location_mtime,
            nodes,
            status,
        }
    }

    /// Create a hierarchy and scan the whole source root.
    pub fn scan(root: &Path, location_file: &Path) -> Self {
        let mut hierarchy = Self::new(root, location_file);
        let root = hierarchy.root.clone();
        hierarchy.add_directory(&root);
        hierarchy
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn location_file(&self) -> &Path {
        &self.location_file
    }

    pub fn location_mtime(&self) -> Option<SystemTime> {
        self.location_mtime
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn get(&self, path: &Path) -> Option<&FileNode> {
        self.nodes.get(&normalize_path(path))
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.get(path).is_some()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileNode> {
        self.nodes.values()
    }

    /// Children of a folder in path order.
    pub fn children(&self, path: &Path) -> Vec<&FileNode> {
        self.get(path)
            .map(|node| {
                node.children
                    .iter()
                    .filter_map(|c| self.nodes.get(c))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Files flagged as modified, sorted by path.
    pub fn modified_files(&self) -> Vec<&Path> {
        let mut files: Vec<&Path> = self
            .nodes
            .values()
            .filter(|n| n.modified)
            .map(|n| n.path.as_path())
            .collect();
        files.sort();
        files
    }

    /// Whether `path` is the location file this hierarchy compares against.
    pub fn is_location_file(&self, path: &Path) -> bool {
        normalize_path(path) == self.location_file
    }

    /// Walk `dir` recursively and add every rule source and folder in it.
    pub fn add_directory(&mut self, dir: &Path) {
        let dir = normalize_path(dir);
        if !dir.starts_with(&self.root) {
            debug!(path = %dir.display(), "Ignoring directory outside the source root");
            return;
        }

        for entry in WalkDir::new(&dir).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if entry.file_type().is_dir() {
                self.ensure_folder(&normalize_path(path));
            } else if entry.file_type().is_file()
                && is_rule_source(path)
                && !self.nodes.contains_key(&normalize_path(path))
            {
                self.file_changed(path);
            }
        }
    }

    /// Record a created or modified path.
    ///
    /// An unseen file is flagged when it is newer than the location file; a
    /// file seen before is always flagged, a second event means it was
    /// touched again.
    pub fn file_changed(&mut self, path: &Path) {
        let path = normalize_path(path);
        if path.is_dir() {
            self.add_directory(&path);
            return;
        }
        if !is_rule_source(&path) || !path.starts_with(&self.root) {
            return;
        }

        let modified = match self.nodes.get_mut(&path) {
            Some(node) => {
                node.modified = true;
                true
            }
            None => {
                let modified = match (mtime(&path), self.location_mtime) {
                    (Some(file), Some(location)) => file > location,
                    (_, None) => true,
                    (None, Some(_)) => false,
                };
                let parent = path.parent().map(Path::to_path_buf);
                if let Some(parent) = &parent {
                    self.ensure_folder(parent);
                }
                let mut node = FileNode::new(path.clone(), FileUsage::NotUsed, parent.clone());
                node.modified = modified;
                self.nodes.insert(path.clone(), node);
                if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(&p)) {
                    parent.children.insert(path.clone());
                }
                trace!(path = %path.display(), modified, "Added rule source");
                modified
            }
        };

        if modified {
            self.status = SyncStatus::OutOfSync;
        }
    }

    /// Drop `path` and everything below it; unknown paths are ignored.
    pub fn remove(&mut self, path: &Path) -> bool {
        let path = normalize_path(path);
        if path == self.root {
            return false;
        }
        let Some(node) = self.nodes.remove(&path) else {
            return false;
        };
        if let Some(parent) = node.parent.as_ref().and_then(|p| self.nodes.get_mut(p)) {
            parent.children.remove(&path);
        }

        let mut pending: Vec<PathBuf> = node.children.into_iter().collect();
        while let Some(child) = pending.pop() {
            if let Some(removed) = self.nodes.remove(&child) {
                pending.extend(removed.children);
            }
        }
        debug!(path = %path.display(), "Removed from source hierarchy");
        true
    }

    /// A fresh location file was produced at `mtime`.
    pub fn location_compiled(&mut self, mtime: Option<SystemTime>) {
        self.location_mtime = mtime;
        self.mark_all_up_to_date();
    }

    /// Clear every modified flag and declare the project synced.
    pub fn mark_all_up_to_date(&mut self) {
        for node in self.nodes.values_mut() {
            node.modified = false;
        }
        self.status = SyncStatus::Synced;
    }

    /// Re-derive usage and import links from the current model.
    pub fn link_model(&mut self, model: &RuleModel, wrapper: Option<&Path>) {
        let wrapper = wrapper.map(normalize_path);
        let main = model
            .node(model.root())
            .as_import()
            .map(|i| i.absolute_path.clone());

        for node in self.nodes.values_mut() {
            if node.is_folder() {
                continue;
            }
            node.linked_import = model.import_for_path(&node.path);
            node.usage = if main.as_deref() == Some(node.path.as_path()) {
                FileUsage::Main
            } else if wrapper.as_deref() == Some(node.path.as_path()) {
                FileUsage::Wrapper
            } else if node.linked_import.is_some() {
                FileUsage::Used
            } else {
                FileUsage::NotUsed
            };
        }
    }

    /// Forget all import links, e.g. when the model could not be rebuilt.
    pub fn unlink_model(&mut self) {
        for node in self.nodes.values_mut().filter(|n| !n.is_folder()) {
            node.linked_import = None;
            node.usage = FileUsage::NotUsed;
        }
    }

    fn ensure_folder(&mut self, path: &Path) {
        if self.nodes.contains_key(path) || !path.starts_with(&self.root) {
            return;
        }
        let parent = path.parent().map(Path::to_path_buf);
        if let Some(parent) = &parent {
            self.ensure_folder(parent);
        }
        self.nodes.insert(
            path.to_path_buf(),
            FileNode::new(path.to_path_buf(), FileUsage::IsFolder, parent.clone()),
        );
        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.insert(path.to_path_buf());
        }
    }
}

fn mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use super::*;

    fn set_mtime(path: &Path, time: SystemTime) {
        let file = fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(time).unwrap();
    }

    #[test]
    fn test_scan_builds_tree_with_folders() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("dialogue/nested")).unwrap();
        fs::write(root.join("main.rudi"), "").unwrap();
        fs::write(root.join("dialogue/nested/deep.rudi"), "").unwrap();
        fs::write(root.join("dialogue/readme.txt"), "").unwrap();

        let hierarchy = FileHierarchy::scan(root, &root.join("RuleLoc.yml"));
        assert!(hierarchy.contains(&root.join("main.rudi")));
        assert!(hierarchy.contains(&root.join("dialogue/nested/deep.rudi")));
        assert!(!hierarchy.contains(&root.join("dialogue/readme.txt")));
        assert!(hierarchy.get(&root.join("dialogue")).unwrap().is_folder());

        let nested = hierarchy.children(&root.join("dialogue/nested"));
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].name(), "deep.rudi");
        assert_eq!(hierarchy.status(), SyncStatus::OutOfSync);
    }

    #[test]
    fn test_out_of_sync_detection() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let location = root.join("RuleLoc.yml");
        fs::write(&location, "label: main").unwrap();
        let compiled = SystemTime::now() - Duration::from_secs(60);
        set_mtime(&location, compiled);

        let mut hierarchy = FileHierarchy::new(root, &location);
        assert_eq!(hierarchy.status(), SyncStatus::Synced);

        let main = root.join("main.rudi");
        fs::write(&main, "").unwrap();
        hierarchy.file_changed(&main);
        assert!(hierarchy.get(&main).unwrap().modified);
        assert_eq!(hierarchy.status(), SyncStatus::OutOfSync);

        hierarchy.mark_all_up_to_date();
        assert!(!hierarchy.get(&main).unwrap().modified);
        assert_eq!(hierarchy.status(), SyncStatus::Synced);
    }

    #[test]
    fn test_old_file_is_not_modified_until_touched_again() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let location = root.join("RuleLoc.yml");
        let old = root.join("old.rudi");
        fs::write(&old, "").unwrap();
        set_mtime(&old, SystemTime::now() - Duration::from_secs(120));
        fs::write(&location, "label: main").unwrap();

        let mut hierarchy = FileHierarchy::new(root, &location);
        hierarchy.file_changed(&old);
        assert!(!hierarchy.get(&old).unwrap().modified);
        assert_eq!(hierarchy.status(), SyncStatus::Synced);

        hierarchy.file_changed(&old);
        assert!(hierarchy.get(&old).unwrap().modified);
        assert_eq!(hierarchy.status(), SyncStatus::OutOfSync);
    }

    #[test]
    fn test_remove_detaches_subtree() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("a/b")).unwrap();
        fs::write(root.join("a/b/x.rudi"), "").unwrap();

        let mut hierarchy = FileHierarchy::scan(root, &root.join("RuleLoc.yml"));
        let before = hierarchy.len();
        assert!(hierarchy.remove(&root.join("a")));
        assert_eq!(hierarchy.len(), before - 3);
        assert!(hierarchy.children(root).is_empty());
        assert!(!hierarchy.remove(&root.join("never/seen.rudi")));
    }

    #[test]
    fn test_link_model_sets_usage() {
        use crate::location::parse_location_str;

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for file in ["main.rudi", "sub.rudi", "Wrapper.rudi", "stale.rudi"] {
            fs::write(root.join(file), "").unwrap();
        }
        let loc = parse_location_str(
            "label: main\nchildren:\n  - { label: sub, kind: import }\n  - { label: Wrapper, kind: import }\n",
        )
        .unwrap();
        let model = RuleModel::build(&loc, root).unwrap();

        let mut hierarchy = FileHierarchy::scan(root, &root.join("RuleLoc.yml"));
        hierarchy.link_model(&model, Some(&root.join("Wrapper.rudi")));

        let usage = |name: &str| hierarchy.get(&root.join(name)).unwrap().usage;
        assert_eq!(usage("main.rudi"), FileUsage::Main);
        assert_eq!(usage("sub.rudi"), FileUsage::Used);
        assert_eq!(usage("Wrapper.rudi"), FileUsage::Wrapper);
        assert_eq!(usage("stale.rudi"), FileUsage::NotUsed);
        assert!(hierarchy.get(&root.join("sub.rudi")).unwrap().linked_import.is_some());

        hierarchy.unlink_model();
        let main = hierarchy.get(&root.join("main.rudi")).unwrap();
        assert_eq!(main.usage, FileUsage::NotUsed);
        assert!(main.linked_import.is_none());
    }
}

//! The typed rule tree built from a location file.
//!
//! Nodes live in an arena owned by [`RuleModel`] and are addressed by
//! [`NodeId`]. Parent links are plain ids, children vectors hold the ids of
//! the nodes they own. A model is never patched in place: every successful
//! re-parse of the location file builds a fresh one.

use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::aggregation::Subscriptions;
use crate::error::{ModelError, ModelResult};
use crate::location::{parse_location_file, Diagnostic, DiagnosticKind, LocationKind, LocationNode};
use crate::state::LoggingState;

/// Extension of rule source files.
pub const RULE_SOURCE_EXTENSION: &str = "rudi";

/// Slot of a node in the model arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

/// Stable rule identifier assigned by the compiler; the join key with the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleId(pub i32);

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Import-specific node data.
#[derive(Debug, Clone)]
pub struct ImportData {
    /// Normalized absolute path of the source file.
    pub absolute_path: PathBuf,
    pub diagnostics: Vec<Diagnostic>,
    /// Sticky: true once any rule was found in this subtree.
    pub contains_rules: bool,
}

/// Rule-specific node data.
#[derive(Debug, Clone)]
pub struct RuleData {
    pub id: RuleId,
    pub expression: String,
    pub base_terms: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum NodeData {
    Import(ImportData),
    Rule(RuleData),
}

/// A node of the rule tree.
#[derive(Debug, Clone)]
pub struct Node {
    pub label: String,
    pub line: usize,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub expanded: bool,
    pub(crate) state: LoggingState,
    pub data: NodeData,
}

impl Node {
    pub fn state(&self) -> LoggingState {
        self.state
    }

    pub fn is_import(&self) -> bool {
        matches!(self.data, NodeData::Import(_))
    }

    pub fn is_rule(&self) -> bool {
        matches!(self.data, NodeData::Rule(_))
    }

    pub fn rule_id(&self) -> Option<RuleId> {
        match &self.data {
            NodeData::Rule(rule) => Some(rule.id),
            NodeData::Import(_) => None,
        }
    }

    pub fn as_import(&self) -> Option<&ImportData> {
        match &self.data {
            NodeData::Import(import) => Some(import),
            NodeData::Rule(_) => None,
        }
    }

    pub fn as_rule(&self) -> Option<&RuleData> {
        match &self.data {
            NodeData::Rule(rule) => Some(rule),
            NodeData::Import(_) => None,
        }
    }
}

/// Overall result of the last compile, derived from the diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompilationOutcome {
    /// No location file has been read yet.
    Unknown,
    Perfect,
    WithWarnings,
    WithErrors,
    Failed,
}

impl std::fmt::Display for CompilationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            CompilationOutcome::Unknown => "unknown",
            CompilationOutcome::Perfect => "perfect",
            CompilationOutcome::WithWarnings => "with warnings",
            CompilationOutcome::WithErrors => "with errors",
            CompilationOutcome::Failed => "failed",
        };
        f.write_str(text)
    }
}

/// Diagnostics of one class, keyed by the import they originate from.
pub type DiagnosticMap = BTreeMap<NodeId, Vec<Diagnostic>>;

/// The rule tree of one compile, plus its indices.
#[derive(Debug)]
pub struct RuleModel {
    nodes: Vec<Node>,
    root: NodeId,
    source_root: PathBuf,
    imports: HashMap<PathBuf, NodeId>,
    rules: HashMap<RuleId, NodeId>,
    errors: DiagnosticMap,
    warnings: DiagnosticMap,
    parse_failures: DiagnosticMap,
    pub(crate) subscriptions: Subscriptions,
}

impl RuleModel {
    /// Parse `location_file` and build a model from it.
    ///
    /// Returns `Ok(None)` while the project has never been compiled.
    pub fn load(location_file: &Path, source_root: &Path) -> ModelResult<Option<Self>> {
        match parse_location_file(location_file)? {
            Some(root) => Self::build(&root, source_root).map(Some),
            None => Ok(None),
        }
    }

    /// Build a model from a decoded location tree in one depth-first pass.
    pub fn build(root: &LocationNode, source_root: &Path) -> ModelResult<Self> {
        if !root.is_import() {
            return Err(ModelError::RootNotImport {
                label: root.label.clone(),
            });
        }

        let mut model = Self {
            nodes: Vec::with_capacity(root.node_count()),
            root: NodeId(0),
            source_root: normalize_path(source_root),
            imports: HashMap::new(),
            rules: HashMap::new(),
            errors: BTreeMap::new(),
            warnings: BTreeMap::new(),
            parse_failures: BTreeMap::new(),
            subscriptions: Subscriptions::default(),
        };

        model.root = model.add_node(root, None)?;
        model.seed_import_states(model.root);

        info!(
            root = %root.label,
            imports = model.imports.len(),
            rules = model.rules.len(),
            outcome = %model.compilation_outcome(),
            "Built rule model"
        );
        Ok(model)
    }

    fn add_node(&mut self, loc: &LocationNode, parent: Option<NodeId>) -> ModelResult<NodeId> {
        let id = NodeId(self.nodes.len());

        let data = match &loc.kind {
            LocationKind::Import { path, diagnostics } => {
                let relative = path
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(format!("{}.{}", loc.label, RULE_SOURCE_EXTENSION)));
                let absolute_path = normalize_path(&self.source_root.join(relative));

                if let Some(previous) = self.imports.insert(absolute_path.clone(), id) {
                    debug!(path = %absolute_path.display(), ?previous, "Import listed twice, keeping the last one");
                }

                for diagnostic in diagnostics {
                    let map = match diagnostic.kind {
                        DiagnosticKind::Error => &mut self.errors,
                        DiagnosticKind::Warning => &mut self.warnings,
                        DiagnosticKind::ParseFailure => &mut self.parse_failures,
                    };
                    map.entry(id).or_default().push(diagnostic.clone());
                }

                NodeData::Import(ImportData {
                    absolute_path,
                    diagnostics: diagnostics.clone(),
                    contains_rules: false,
                })
            }
            LocationKind::Rule {
                id: rule_id,
                expression,
                base_terms,
            } => {
                if self.rules.insert(*rule_id, id).is_some() {
                    return Err(ModelError::DuplicateRuleId { id: *rule_id });
                }
                NodeData::Rule(RuleData {
                    id: *rule_id,
                    expression: expression.clone(),
                    base_terms: base_terms.clone(),
                })
            }
        };

        let is_rule = matches!(data, NodeData::Rule(_));
        self.nodes.push(Node {
            label: loc.label.clone(),
            line: loc.line,
            parent,
            children: Vec::with_capacity(loc.children.len()),
            expanded: false,
            state: LoggingState::Never,
            data,
        });

        if is_rule {
            self.mark_contains_rules(parent);
        }

        for child in &loc.children {
            let child_id = self.add_node(child, Some(id))?;
            self.nodes[id.0].children.push(child_id);
        }

        if let Some(parent) = parent {
            if self.nodes[parent.0].is_import() {
                self.add_aggregation(parent, id);
            }
        }

        Ok(id)
    }

    /// Flag every import from `start` upwards, stopping at the first one that
    /// already carries the flag.
    fn mark_contains_rules(&mut self, start: Option<NodeId>) {
        let mut current = start;
        while let Some(id) = current {
            let node = &mut self.nodes[id.0];
            if let NodeData::Import(import) = &mut node.data {
                if import.contains_rules {
                    break;
                }
                import.contains_rules = true;
            }
            current = node.parent;
        }
    }

    fn seed_import_states(&mut self, id: NodeId) {
        let children = self.nodes[id.0].children.clone();
        for child in children {
            self.seed_import_states(child);
        }
        if let NodeData::Import(import) = &self.nodes[id.0].data {
            let state = if import.contains_rules {
                self.aggregate(id).unwrap_or(LoggingState::Never)
            } else {
                LoggingState::RuleLess
            };
            self.nodes[id.0].state = state;
        }
    }

    // =========================================================================
    // Tree access
    // =========================================================================

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn root_label(&self) -> &str {
        &self.nodes[self.root.0].label
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    /// Get a node by id.
    ///
    /// Panics if the id does not belong to this model.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }

    pub fn state(&self, id: NodeId) -> LoggingState {
        self.nodes[id.0].state
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    /// Find a child of `parent` by label.
    pub fn child_by_label(&self, parent: NodeId, label: &str) -> Option<NodeId> {
        self.children(parent)
            .iter()
            .copied()
            .find(|c| self.nodes[c.0].label == label)
    }

    /// Resolve a label path starting below the root, e.g. `["sub", "greet"]`.
    pub fn find_by_labels<S: AsRef<str>>(&self, labels: &[S]) -> Option<NodeId> {
        labels
            .iter()
            .try_fold(self.root, |current, label| self.child_by_label(current, label.as_ref()))
    }

    /// Labels from the root down to `id`, root label included.
    pub fn label_path(&self, id: NodeId) -> Vec<&str> {
        let mut labels = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current {
            labels.push(self.nodes[node.0].label.as_str());
            current = self.nodes[node.0].parent;
        }
        labels.reverse();
        labels
    }

    /// All ids of the subtree rooted at `id` in post-order.
    pub fn descendants_post_order(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![(id, false)];
        while let Some((node, visited)) = stack.pop() {
            if visited {
                out.push(node);
                continue;
            }
            stack.push((node, true));
            for child in self.nodes[node.0].children.iter().rev() {
                stack.push((*child, false));
            }
        }
        out
    }

    pub fn set_expanded(&mut self, id: NodeId, expanded: bool) {
        self.nodes[id.0].expanded = expanded;
    }

    /// Overwrite a state cell without aggregation or notification.
    pub(crate) fn set_raw_state(&mut self, id: NodeId, state: LoggingState) {
        self.nodes[id.0].state = state;
    }

    // =========================================================================
    // Indices
    // =========================================================================

    pub fn rule(&self, id: RuleId) -> Option<NodeId> {
        self.rules.get(&id).copied()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Node ids of every rule, ordered by rule id.
    pub fn rule_nodes(&self) -> Vec<NodeId> {
        let mut ids: Vec<(RuleId, NodeId)> = self.rules.iter().map(|(r, n)| (*r, *n)).collect();
        ids.sort();
        ids.into_iter().map(|(_, n)| n).collect()
    }

    /// Current `(rule id, state)` pairs, ordered by rule id.
    pub fn rule_states(&self) -> Vec<(RuleId, LoggingState)> {
        let mut states: Vec<(RuleId, LoggingState)> = self
            .rules
            .iter()
            .map(|(rule, node)| (*rule, self.nodes[node.0].state))
            .collect();
        states.sort_by_key(|(rule, _)| *rule);
        states
    }

    /// Look up an import by source path; the path is normalized first.
    pub fn import_for_path(&self, path: &Path) -> Option<NodeId> {
        self.imports.get(&normalize_path(path)).copied()
    }

    /// The import set of this compile.
    pub fn import_paths(&self) -> impl Iterator<Item = (&Path, NodeId)> {
        self.imports.iter().map(|(p, id)| (p.as_path(), *id))
    }

    /// Nearest import at or above `id`.
    pub fn enclosing_import(&self, id: NodeId) -> Option<NodeId> {
        let mut current = Some(id);
        while let Some(node) = current {
            if self.nodes[node.0].is_import() {
                return Some(node);
            }
            current = self.nodes[node.0].parent;
        }
        None
    }

    /// Source file a node is defined in.
    pub fn source_file(&self, id: NodeId) -> Option<&Path> {
        self.enclosing_import(id)
            .and_then(|import| self.nodes[import.0].as_import())
            .map(|import| import.absolute_path.as_path())
    }

    /// File and line of a rule, for jumping to its definition.
    pub fn open_rule(&self, id: RuleId) -> ModelResult<(PathBuf, usize)> {
        let node = self.rule(id).ok_or(ModelError::RuleNotFound { id })?;
        let file = self
            .source_file(node)
            .map(Path::to_path_buf)
            .ok_or(ModelError::RuleNotFound { id })?;
        Ok((file, self.nodes[node.0].line))
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    pub fn error_infos(&self) -> &DiagnosticMap {
        &self.errors
    }

    pub fn warn_infos(&self) -> &DiagnosticMap {
        &self.warnings
    }

    pub fn parsing_failures(&self) -> &DiagnosticMap {
        &self.parse_failures
    }

    pub fn compilation_outcome(&self) -> CompilationOutcome {
        if !self.parse_failures.is_empty() {
            CompilationOutcome::Failed
        } else if !self.errors.is_empty() {
            CompilationOutcome::WithErrors
        } else if !self.warnings.is_empty() {
            CompilationOutcome::WithWarnings
        } else {
            CompilationOutcome::Perfect
        }
    }
}

/// Make a path absolute and lexically clean; symlinks are resolved when the
/// path exists.
pub fn normalize_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }

    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

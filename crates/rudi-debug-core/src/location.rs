//! Parser for the location file written by the rule compiler.
//!
//! The location file describes every import and rule found by the last
//! successful compile. It is decoded into a generic [`LocationNode`] tree which
//! the model builder then turns into a typed [`crate::RuleModel`].
//!
//! ## Format
//!
//! ```yaml
//! kind: import
//! label: main
//! line: 0
//! path: main.rudi
//! errors:
//!   - type: WARNING
//!     message: unused variable
//!     location: { line: 3, column: 7 }
//! children:
//!   - kind: rule
//!     label: greet
//!     line: 4
//!     id: 1
//!     expression: "user.said(hello)"
//!     baseTerms: ["user.said(hello)"]
//! ```
//!
//! JSON documents are accepted as well.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::{debug, warn};

use crate::error::{ModelError, ModelResult};
use crate::model::RuleId;

/// Class of a compiler diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticKind {
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "WARNING")]
    Warning,
    /// The compiler, or this parser, could not make sense of the input.
    #[serde(rename = "PARSE_ERROR")]
    ParseFailure,
}

impl DiagnosticKind {
    /// Get a display label for the diagnostic kind.
    pub fn label(&self) -> &'static str {
        match self {
            DiagnosticKind::Error => "error",
            DiagnosticKind::Warning => "warning",
            DiagnosticKind::ParseFailure => "parse failure",
        }
    }
}

/// A diagnostic attached to an import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl Diagnostic {
    pub fn parse_failure(message: impl Into<String>, line: usize) -> Self {
        Self {
            kind: DiagnosticKind::ParseFailure,
            message: message.into(),
            line,
            column: 0,
        }
    }
}

/// Kind-specific payload of a location node.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationKind {
    Import {
        /// Source path as written by the compiler, if any.
        path: Option<PathBuf>,
        diagnostics: Vec<Diagnostic>,
    },
    Rule {
        id: RuleId,
        expression: String,
        base_terms: Vec<String>,
    },
}

/// Generic node of the decoded location document.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationNode {
    pub label: String,
    pub line: usize,
    pub kind: LocationKind,
    pub children: Vec<LocationNode>,
}

impl LocationNode {
    pub fn is_import(&self) -> bool {
        matches!(self.kind, LocationKind::Import { .. })
    }

    /// Total number of nodes in this subtree, including `self`.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(|c| c.node_count()).sum::<usize>()
    }
}

#[derive(Debug, Deserialize)]
struct RawLocation {
    #[serde(default)]
    line: usize,
    #[serde(default)]
    column: usize,
}

#[derive(Debug, Deserialize)]
struct RawDiagnostic {
    #[serde(rename = "type")]
    kind: DiagnosticKind,
    #[serde(default)]
    message: String,
    #[serde(default)]
    location: Option<RawLocation>,
}

impl From<RawDiagnostic> for Diagnostic {
    fn from(raw: RawDiagnostic) -> Self {
        let (line, column) = raw
            .location
            .map(|l| (l.line, l.column))
            .unwrap_or_default();
        Self {
            kind: raw.kind,
            message: raw.message,
            line,
            column,
        }
    }
}

/// Read and decode the location file at `path`.
///
/// A missing file means "never compiled yet" and yields `Ok(None)`. A file
/// that cannot be decoded at all is reported as
/// [`ModelError::MalformedLocationFile`].
pub fn parse_location_file(path: &Path) -> ModelResult<Option<LocationNode>> {
    if !path.exists() {
        debug!(path = %path.display(), "No location file yet");
        return Ok(None);
    }

    let text = std::fs::read_to_string(path)?;
    let root = parse_location_str(&text).map_err(|message| ModelError::MalformedLocationFile {
        path: path.to_path_buf(),
        message,
    })?;

    debug!(
        path = %path.display(),
        nodes = root.node_count(),
        "Parsed location file"
    );
    Ok(Some(root))
}

/// Decode a location document from text.
///
/// Only problems with the document as a whole are returned as errors.
/// Malformed children are skipped and reported as a parse failure on the
/// enclosing import.
pub fn parse_location_str(text: &str) -> Result<LocationNode, String> {
    let value: Value = serde_yaml::from_str(text).map_err(|e| e.to_string())?;
    if !value.is_mapping() {
        return Err("document root is not a mapping".to_string());
    }
    convert_node(&value)
}

fn convert_node(value: &Value) -> Result<LocationNode, String> {
    if !value.is_mapping() {
        return Err("node is not a mapping".to_string());
    }

    let label = match value.get("label") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(_) => return Err("field 'label' is not a string".to_string()),
        None => return Err("missing field 'label'".to_string()),
    };
    let line = optional_usize(value, "line")?.unwrap_or(0);

    let is_import = match value.get("kind").and_then(Value::as_str) {
        Some("import") => true,
        Some("rule") => false,
        Some(other) => return Err(format!("unknown node kind '{other}' for {label:?}")),
        None => value.get("id").is_none(),
    };

    if is_import {
        convert_import(value, label, line)
    } else {
        convert_rule(value, label, line)
    }
}

fn convert_import(value: &Value, label: String, line: usize) -> Result<LocationNode, String> {
    let path = match value.get("path") {
        Some(Value::String(s)) => Some(PathBuf::from(s)),
        Some(Value::Null) | None => None,
        Some(_) => return Err(format!("field 'path' of import {label:?} is not a string")),
    };

    let mut diagnostics = Vec::new();
    if let Some(errors) = value.get("errors") {
        match errors.as_sequence() {
            Some(items) => {
                for item in items {
                    match serde_yaml::from_value::<RawDiagnostic>(item.clone()) {
                        Ok(raw) => diagnostics.push(raw.into()),
                        Err(e) => diagnostics.push(Diagnostic::parse_failure(
                            format!("unreadable diagnostic: {e}"),
                            line,
                        )),
                    }
                }
            }
            None if errors.is_null() => {}
            None => diagnostics.push(Diagnostic::parse_failure(
                "field 'errors' is not a list",
                line,
            )),
        }
    }

    let mut children = Vec::new();
    if let Some(raw_children) = value.get("children") {
        match raw_children.as_sequence() {
            Some(items) => {
                for item in items {
                    match convert_node(item) {
                        Ok(child) => children.push(child),
                        Err(message) => {
                            let child_line = optional_usize(item, "line").ok().flatten();
                            warn!(import = %label, %message, "Skipping malformed location node");
                            diagnostics.push(Diagnostic::parse_failure(
                                message,
                                child_line.unwrap_or(line),
                            ));
                        }
                    }
                }
            }
            None if raw_children.is_null() => {}
            None => diagnostics.push(Diagnostic::parse_failure(
                "field 'children' is not a list",
                line,
            )),
        }
    }

    Ok(LocationNode {
        label,
        line,
        kind: LocationKind::Import { path, diagnostics },
        children,
    })
}

fn convert_rule(value: &Value, label: String, line: usize) -> Result<LocationNode, String> {
    let id = value
        .get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| format!("rule {label:?} has no integer 'id'"))?;
    let id = i32::try_from(id).map_err(|_| format!("rule id {id} of {label:?} is out of range"))?;

    let expression = value
        .get("expression")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let base_terms = match value.get("baseTerms") {
        Some(Value::Sequence(items)) => items
            .iter()
            .map(|t| {
                t.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| format!("base term of rule {label:?} is not a string"))
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(Value::Null) | None => Vec::new(),
        Some(_) => return Err(format!("field 'baseTerms' of rule {label:?} is not a list")),
    };

    // Rules may contain nested rules (sub-clauses), but never imports.
    let mut children = Vec::new();
    if let Some(Value::Sequence(items)) = value.get("children") {
        for item in items {
            let child = convert_node(item)?;
            if child.is_import() {
                return Err(format!("rule {label:?} contains import {:?}", child.label));
            }
            children.push(child);
        }
    }

    Ok(LocationNode {
        label,
        line,
        kind: LocationKind::Rule {
            id: RuleId(id),
            expression,
            base_terms,
        },
        children,
    })
}

fn optional_usize(value: &Value, key: &str) -> Result<Option<usize>, String> {
    match value.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| format!("field '{key}' is not a non-negative integer")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
kind: import
label: main
line: 0
children:
  - kind: rule
    label: greet
    line: 3
    id: 1
    expression: "user.said(hello)"
    baseTerms: ["user.said(hello)"]
  - kind: import
    label: sub
    line: 10
    errors:
      - type: ERROR
        message: unknown type Foo
        location: { line: 2, column: 5 }
    children:
      - { kind: rule, label: bye, line: 4, id: 2 }
"#;

    #[test]
    fn test_parse_sample_tree() {
        let root = parse_location_str(SAMPLE).unwrap();
        assert_eq!(root.label, "main");
        assert!(root.is_import());
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.node_count(), 4);

        match &root.children[0].kind {
            LocationKind::Rule { id, base_terms, .. } => {
                assert_eq!(*id, RuleId(1));
                assert_eq!(base_terms, &vec!["user.said(hello)".to_string()]);
            }
            other => panic!("expected rule, got {other:?}"),
        }

        match &root.children[1].kind {
            LocationKind::Import { diagnostics, .. } => {
                assert_eq!(diagnostics.len(), 1);
                assert_eq!(diagnostics[0].kind, DiagnosticKind::Error);
                assert_eq!((diagnostics[0].line, diagnostics[0].column), (2, 5));
            }
            other => panic!("expected import, got {other:?}"),
        }
    }

    #[test]
    fn test_kind_inferred_from_id() {
        let root = parse_location_str(
            r#"{"label": "main", "children": [{"label": "r", "id": 7}]}"#,
        )
        .unwrap();
        assert!(root.is_import());
        assert!(!root.children[0].is_import());
    }

    #[test]
    fn test_malformed_child_becomes_parse_failure() {
        let root = parse_location_str(
            r#"
label: main
children:
  - { kind: rule, label: broken, line: 9 }
  - { kind: rule, label: fine, id: 3 }
"#,
        )
        .unwrap();

        assert_eq!(root.children.len(), 1);
        match &root.kind {
            LocationKind::Import { diagnostics, .. } => {
                assert_eq!(diagnostics.len(), 1);
                assert_eq!(diagnostics[0].kind, DiagnosticKind::ParseFailure);
                assert_eq!(diagnostics[0].line, 9);
            }
            other => panic!("expected import, got {other:?}"),
        }
    }

    #[test]
    fn test_non_mapping_root_is_malformed() {
        assert!(parse_location_str("- a\n- b\n").is_err());
        assert!(parse_location_str("label: [unclosed").is_err());
    }

    #[test]
    fn test_missing_file_is_absence() {
        let dir = tempfile::tempdir().unwrap();
        let result = parse_location_file(&dir.path().join("RuleLoc.yml")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("RuleLoc.yml");
        std::fs::write(&path, "just a string").unwrap();
        assert!(matches!(
            parse_location_file(&path),
            Err(ModelError::MalformedLocationFile { .. })
        ));
    }
}

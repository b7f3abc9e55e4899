//! Rule model synchronization core of the rudi debugger.
//!
//! The crate turns the location file written by the rule compiler into a
//! typed tree of imports and rules, keeps the logging state of that tree
//! consistent, snapshots it across sessions and mirrors the rule source
//! directory so stale compiles can be detected.
//!
//! ## Core Concepts
//!
//! - **RuleModel**: arena of import and rule nodes built from one compile
//! - **LoggingState**: per-node mode deciding which rule evaluations are reported
//! - **Aggregation**: import states derived bottom-up from their children
//! - **RuleModelState**: label-indexed snapshot that never forgets absent nodes
//! - **FileHierarchy**: the watched source tree with modified flags
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::path::Path;
//! use rudi_debug_core::{LoggingState, RuleId, RuleModel};
//!
//! fn main() -> anyhow::Result<()> {
//!     let source_root = Path::new("src/main/rudi");
//!     if let Some(mut model) = RuleModel::load(&source_root.join("RuleLoc.yml"), source_root)? {
//!         model.set_rule_state(RuleId(1), LoggingState::Always)?;
//!         println!("{}: {}", model.root_label(), model.compilation_outcome());
//!     }
//!     Ok(())
//! }
//! ```

mod aggregation;
mod error;
pub mod hierarchy;
pub mod location;
mod model;
pub mod snapshot;
mod state;
pub mod watch;

pub use aggregation::{ObserverId, StateChange, StateObserver};
pub use error::{ModelError, ModelResult, SnapshotError, WatchError};
pub use hierarchy::{FileHierarchy, FileNode, FileUsage, SyncStatus};
pub use location::{parse_location_file, Diagnostic, DiagnosticKind, LocationKind, LocationNode};
pub use model::{
    normalize_path, CompilationOutcome, DiagnosticMap, ImportData, Node, NodeData, NodeId,
    RuleData, RuleId, RuleModel, RULE_SOURCE_EXTENSION,
};
pub use snapshot::{
    session_name, RuleModelState, SnapshotEntry, SnapshotInfo, SnapshotStore, MAX_RECENT,
};
pub use state::LoggingState;
pub use watch::{ProjectWatcher, WatchBatch, WatchEvent};

//! Error types for the rule model core.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::RuleId;
use crate::state::LoggingState;

/// Result type alias for rule model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors that can occur while loading or mutating a rule model.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The location file exists but is not a usable document.
    #[error("malformed location file {path}: {message}")]
    MalformedLocationFile { path: PathBuf, message: String },

    /// Two rules in one location file share the same id.
    #[error("duplicate rule id {id} in location file")]
    DuplicateRuleId { id: RuleId },

    /// The root of the location file is a rule instead of an import.
    #[error("location file root must be an import, found rule {label:?}")]
    RootNotImport { label: String },

    /// A derived state was passed where a user-selectable one is required.
    #[error("{state:?} cannot be set directly")]
    DerivedState { state: LoggingState },

    /// A rule referenced by id does not exist in the current model.
    #[error("rule not found: {id}")]
    RuleNotFound { id: RuleId },

    /// I/O error while reading the location file.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by snapshot persistence.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// No snapshot exists at the requested location.
    #[error("could not load snapshot {path}: file not found")]
    NotFound { path: PathBuf },

    /// The snapshot file could not be decoded.
    #[error("could not load snapshot {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The snapshot name is not a plain file name.
    #[error("invalid snapshot name {name:?}")]
    InvalidName { name: String },

    /// Snapshot serialization error.
    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error (file operations).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while setting up filesystem watching.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The underlying notify backend failed.
    #[error("watcher error: {0}")]
    Notify(#[from] notify::Error),

    /// The directory to watch does not exist.
    #[error("cannot watch {path}: directory does not exist")]
    MissingRoot { path: PathBuf },

    /// The watch thread could not be started.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

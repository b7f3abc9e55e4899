//! Error types for the runtime connection.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while talking to the runtime.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The runtime refused or dropped the connection attempt.
    #[error("could not connect to runtime at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The runtime did not answer within the connect timeout.
    #[error("connecting to runtime at {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    /// A message was sent while no connection is open.
    #[error("not connected to a runtime")]
    NotConnected,

    /// A line on the wire could not be decoded.
    #[error("invalid message {line:?}: {message}")]
    InvalidMessage { line: String, message: String },

    /// Message serialization error.
    #[error("message serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error on the socket.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

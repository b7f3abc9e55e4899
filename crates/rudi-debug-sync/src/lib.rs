//! Connection between the rudi debugger and a running dialogue runtime.
//!
//! The debugger pushes per-rule logging states to the runtime and receives
//! rule evaluation reports in return. Messages are newline-delimited JSON
//! over TCP (see [`protocol`]).
//!
//! ```no_run
//! use std::time::Duration;
//! use rudi_debug_core::RuleModel;
//! use rudi_debug_sync::RuntimeClient;
//!
//! # async fn run(model: &mut RuleModel) -> anyhow::Result<()> {
//! let mut client = RuntimeClient::new(Duration::from_secs(2));
//! client.connect("127.0.0.1:9777", model).await?;
//! // ... model changes are now forwarded ...
//! client.disconnect(model);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod client;
mod error;
pub mod protocol;
pub mod server;

pub use batch::{LogBatch, LogBatcher, RuleLogs, DEFAULT_BATCH_WINDOW};
pub use client::{ConnectionState, RuntimeClient, DEFAULT_CONNECT_TIMEOUT};
pub use error::{SyncError, SyncResult};
pub use protocol::{LogRule, Message, SetLoggingState};
pub use server::RuntimeServer;

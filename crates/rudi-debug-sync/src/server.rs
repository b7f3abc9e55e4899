//! Runtime side of the connection.
//!
//! A small acceptor that serves one debugger at a time. It keeps the logging
//! state table the debugger pushes and reports rule evaluations back,
//! filtered by that table. Runtimes embed it; the tests drive it directly.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use rudi_debug_core::{LoggingState, RuleId};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::protocol::{self, LogRule, Message, SetLoggingState};

type StateTable = Arc<Mutex<HashMap<RuleId, LoggingState>>>;

/// Accepts debugger connections and records their logging states.
pub struct RuntimeServer {
    local_addr: SocketAddr,
    table: StateTable,
    received: mpsc::UnboundedReceiver<SetLoggingState>,
    outbound: mpsc::UnboundedSender<LogRule>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl RuntimeServer {
    /// Bind and start accepting in the background.
    pub async fn bind(addr: &str) -> SyncResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "Runtime endpoint listening");

        let table = StateTable::default();
        let (received_tx, received) = mpsc::unbounded_channel();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&table),
            received_tx,
            outbound_rx,
            cancel.clone(),
        ));

        Ok(Self {
            local_addr,
            table,
            received,
            outbound,
            cancel,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Logging state last pushed for `rule`; `Never` when unknown.
    pub fn logging_state(&self, rule: RuleId) -> LoggingState {
        self.table
            .lock()
            .map(|t| t.get(&rule).copied().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Number of rules with a recorded state.
    pub fn known_rules(&self) -> usize {
        self.table.lock().map(|t| t.len()).unwrap_or(0)
    }

    /// Wait for the next `setLoggingState` from the debugger.
    pub async fn next_state(&mut self) -> Option<SetLoggingState> {
        self.received.recv().await
    }

    /// Next already-received `setLoggingState`, without waiting.
    pub fn try_next_state(&mut self) -> Option<SetLoggingState> {
        self.received.try_recv().ok()
    }

    /// Report evaluations of `rule` unconditionally.
    pub fn log_rule(&self, rule: RuleId, results: Vec<bool>) -> SyncResult<()> {
        self.outbound
            .send(LogRule { rule, results })
            .map_err(|_| SyncError::NotConnected)
    }

    /// Report one evaluation of `rule` if the debugger asked to see it.
    ///
    /// `results[0]` is the rule outcome and decides visibility; the rest are
    /// base-term values sent along unchanged. Returns whether it was sent.
    pub fn evaluated(&self, rule: RuleId, results: &[bool]) -> SyncResult<bool> {
        let Some(&outcome) = results.first() else {
            return Ok(false);
        };
        if !self.logging_state(rule).shows(outcome) {
            return Ok(false);
        }
        self.log_rule(rule, results.to_vec())?;
        Ok(true)
    }

    /// Stop accepting and drop the current connection.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Runtime endpoint task failed");
        }
    }
}

impl std::fmt::Debug for RuntimeServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeServer")
            .field("local_addr", &self.local_addr)
            .field("known_rules", &self.known_rules())
            .finish()
    }
}

async fn accept_loop(
    listener: TcpListener,
    table: StateTable,
    received: mpsc::UnboundedSender<SetLoggingState>,
    mut outbound: mpsc::UnboundedReceiver<LogRule>,
    cancel: CancellationToken,
) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    continue;
                }
            }
        };
        info!(peer = %peer, "Debugger connected");
        if let Err(e) = serve(stream, &table, &received, &mut outbound, &cancel).await {
            warn!(peer = %peer, error = %e, "Debugger connection failed");
        }
        info!(peer = %peer, "Debugger disconnected");
    }
    debug!("Runtime endpoint stopped");
}

async fn serve(
    stream: TcpStream,
    table: &StateTable,
    received: &mpsc::UnboundedSender<SetLoggingState>,
    outbound: &mut mpsc::UnboundedReceiver<LogRule>,
    cancel: &CancellationToken,
) -> SyncResult<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            line = lines.next_line() => {
                let Some(line) = line? else { return Ok(()) };
                match protocol::decode(&line) {
                    Ok(Some(Message::SetLoggingState(msg))) => {
                        if let Ok(mut t) = table.lock() {
                            t.insert(msg.rule, msg.state);
                        }
                        // Nobody listening is fine; the table is the record.
                        let _ = received.send(msg);
                    }
                    Ok(Some(other)) => debug!(message = ?other, "Ignoring message"),
                    Ok(None) => debug!(line = %line, "Ignoring unknown method"),
                    Err(e) => warn!(error = %e, "Ignoring malformed message"),
                }
            }
            log = outbound.recv() => {
                let Some(log) = log else { return Ok(()) };
                let mut line = protocol::encode(&Message::LogRule(log))?;
                line.push('\n');
                write_half.write_all(line.as_bytes()).await?;
                write_half.flush().await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_evaluated_filters_by_state() {
        let server = RuntimeServer::bind("127.0.0.1:0").await.unwrap();
        server
            .table
            .lock()
            .unwrap()
            .insert(RuleId(1), LoggingState::IfFalse);

        assert!(server.evaluated(RuleId(1), &[false, true, true]).unwrap());
        assert!(!server.evaluated(RuleId(1), &[true, false, false]).unwrap());
        assert!(!server.evaluated(RuleId(1), &[]).unwrap());
        assert!(!server.evaluated(RuleId(2), &[true]).unwrap());
        server.shutdown().await;
    }
}

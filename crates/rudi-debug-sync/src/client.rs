//! Debugger side of the runtime connection.
//!
//! The client pushes the full rule-state table on connect and then forwards
//! every rule state change through one observer registered on the model.
//! Messages from the runtime are read by a background task and delivered on
//! an unbounded channel, one message per item.

use std::sync::Arc;
use std::time::Duration;

use rudi_debug_core::{ObserverId, RuleModel, StateChange};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::protocol::{self, Message, SetLoggingState};

/// Default time allowed for the TCP handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection lifecycle as seen by the debugger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}

struct Connection {
    addr: String,
    outbound: mpsc::UnboundedSender<Message>,
    cancel: CancellationToken,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

/// Forwards rule state changes of the model to the writer task.
struct RuleForwarder {
    outbound: mpsc::UnboundedSender<Message>,
}

impl rudi_debug_core::StateObserver for RuleForwarder {
    fn on_state_changed(&mut self, change: &StateChange) {
        let Some(rule) = change.rule else {
            return;
        };
        let msg = SetLoggingState {
            rule,
            state: change.new,
        };
        if self.outbound.send(msg.into()).is_err() {
            debug!(rule = %rule, "Runtime connection closed, state change dropped");
        }
    }
}

/// TCP client for one runtime at a time.
pub struct RuntimeClient {
    connect_timeout: Duration,
    state: Arc<watch::Sender<ConnectionState>>,
    connection: Option<Connection>,
    observer: Option<ObserverId>,
    inbound_tx: mpsc::UnboundedSender<Message>,
    inbound_rx: Option<mpsc::UnboundedReceiver<Message>>,
}

impl Default for RuntimeClient {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl RuntimeClient {
    pub fn new(connect_timeout: Duration) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            connect_timeout,
            state: Arc::new(state),
            connection: None,
            observer: None,
            inbound_tx,
            inbound_rx: Some(inbound_rx),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Address of the open connection, if any.
    pub fn peer(&self) -> Option<&str> {
        self.connection.as_ref().map(|c| c.addr.as_str())
    }

    /// Whether an observer is registered on the current model.
    pub fn is_attached(&self) -> bool {
        self.observer.is_some()
    }

    /// Messages received from the runtime.
    ///
    /// The receiver outlives individual connections and can be taken once.
    pub fn take_inbound(&mut self) -> Option<mpsc::UnboundedReceiver<Message>> {
        self.inbound_rx.take()
    }

    /// Connect to the runtime and attach to `model`.
    ///
    /// An existing connection is closed first. On failure or timeout the
    /// client ends up `Disconnected`; there is no retry.
    pub async fn connect(&mut self, addr: &str, model: &mut RuleModel) -> SyncResult<()> {
        self.disconnect(model);
        set_state(&self.state, ConnectionState::Connecting);
        info!(addr, "Connecting to runtime");

        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                set_state(&self.state, ConnectionState::Disconnected);
                warn!(addr, error = %source, "Runtime connection failed");
                return Err(SyncError::Connect {
                    addr: addr.to_string(),
                    source,
                });
            }
            Err(_) => {
                set_state(&self.state, ConnectionState::Disconnected);
                warn!(addr, timeout = ?self.connect_timeout, "Runtime connection timed out");
                return Err(SyncError::ConnectTimeout {
                    addr: addr.to_string(),
                    timeout: self.connect_timeout,
                });
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Could not disable Nagle");
        }

        let (read_half, write_half) = stream.into_split();
        let cancel = CancellationToken::new();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let writer = tokio::spawn(write_loop(
            write_half,
            outbound_rx,
            cancel.clone(),
            Arc::clone(&self.state),
        ));
        let reader = tokio::spawn(read_loop(
            read_half,
            self.inbound_tx.clone(),
            cancel.clone(),
            Arc::clone(&self.state),
        ));

        self.connection = Some(Connection {
            addr: addr.to_string(),
            outbound,
            cancel,
            writer,
            reader,
        });
        set_state(&self.state, ConnectionState::Connected);
        info!(addr, "Connected to runtime");

        self.attach(model)
    }

    /// Push every rule state of `model` and follow its changes.
    pub fn attach(&mut self, model: &mut RuleModel) -> SyncResult<()> {
        self.detach(model);
        let outbound = match &self.connection {
            Some(conn) => conn.outbound.clone(),
            None => return Err(SyncError::NotConnected),
        };

        let states = model.rule_states();
        for (rule, state) in &states {
            self.send(SetLoggingState {
                rule: *rule,
                state: *state,
            })?;
        }
        self.observer = Some(model.subscribe_rules(Box::new(RuleForwarder { outbound })));
        debug!(rules = states.len(), "Attached to rule model");
        Ok(())
    }

    /// Stop following `model`.
    pub fn detach(&mut self, model: &mut RuleModel) {
        if let Some(id) = self.observer.take() {
            let removed = model.unsubscribe(id);
            debug!(subscriptions = removed, "Detached from rule model");
        }
    }

    /// The model was rebuilt; the old one is gone along with its observer.
    ///
    /// Attaches to the new model when connected.
    pub fn model_replaced(&mut self, model: &mut RuleModel) -> SyncResult<()> {
        self.observer = None;
        if self.is_connected() {
            self.attach(model)?;
        }
        Ok(())
    }

    /// Detach from `model` and close the connection.
    ///
    /// Safe to call in any state, any number of times.
    pub fn disconnect(&mut self, model: &mut RuleModel) {
        self.detach(model);
        self.close();
    }

    /// Close the connection without touching a model.
    ///
    /// Use when the model the client was attached to no longer exists.
    pub fn close(&mut self) {
        self.observer = None;
        if let Some(conn) = self.connection.take() {
            conn.cancel.cancel();
            // The reader has nothing left to flush.
            conn.reader.abort();
            drop(conn.writer);
            info!(addr = %conn.addr, "Disconnected from runtime");
        }
        set_state(&self.state, ConnectionState::Disconnected);
    }

    /// Queue a logging state for the runtime.
    pub fn send(&self, msg: SetLoggingState) -> SyncResult<()> {
        let conn = self.connection.as_ref().ok_or(SyncError::NotConnected)?;
        if msg.state.is_derived() {
            return Err(SyncError::InvalidMessage {
                line: String::new(),
                message: format!("{} cannot be sent to the runtime", msg.state),
            });
        }
        conn.outbound
            .send(msg.into())
            .map_err(|_| SyncError::NotConnected)
    }
}

impl Drop for RuntimeClient {
    fn drop(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for RuntimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeClient")
            .field("state", &self.state())
            .field("peer", &self.peer())
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Publish `new`, notifying watchers only on an actual transition.
fn set_state(sender: &watch::Sender<ConnectionState>, new: ConnectionState) {
    sender.send_if_modified(|current| {
        let changed = *current != new;
        *current = new;
        changed
    });
}

async fn write_loop(
    mut socket: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    cancel: CancellationToken,
    state: Arc<watch::Sender<ConnectionState>>,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = outbound.recv() => {
                let Some(msg) = msg else { break };
                let line = match protocol::encode(&msg) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(error = %e, "Dropping unencodable message");
                        continue;
                    }
                };
                if let Err(e) = write_line(&mut socket, &line).await {
                    warn!(error = %e, "Failed to send to runtime");
                    set_state(&state, ConnectionState::Disconnected);
                    return;
                }
            }
        }
    }
    // Flush what was queued before the close, best effort.
    while let Ok(msg) = outbound.try_recv() {
        if let Ok(line) = protocol::encode(&msg) {
            if write_line(&mut socket, &line).await.is_err() {
                break;
            }
        }
    }
    if let Err(e) = socket.shutdown().await {
        debug!(error = %e, "Socket shutdown failed");
    }
}

async fn write_line(socket: &mut OwnedWriteHalf, line: &str) -> std::io::Result<()> {
    socket.write_all(line.as_bytes()).await?;
    socket.write_all(b"\n").await?;
    socket.flush().await
}

async fn read_loop(
    socket: OwnedReadHalf,
    inbound: mpsc::UnboundedSender<Message>,
    cancel: CancellationToken,
    state: Arc<watch::Sender<ConnectionState>>,
) {
    let mut lines = BufReader::new(socket).lines();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match protocol::decode(&line) {
                        Ok(Some(msg)) => {
                            if inbound.send(msg).is_err() {
                                debug!("Inbound receiver dropped");
                            }
                        }
                        Ok(None) => debug!(line = %line, "Ignoring unknown runtime message"),
                        Err(e) => warn!(error = %e, "Ignoring malformed runtime message"),
                    }
                }
                Ok(None) => {
                    info!("Runtime closed the connection");
                    set_state(&state, ConnectionState::Disconnected);
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Runtime connection lost");
                    set_state(&state, ConnectionState::Disconnected);
                    break;
                }
            }
        }
    }
}

//! The store-client capability and its lifecycle events.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::debug;

use crate::{ClientOverrides, ClientResult};

/// Which construction path produced a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientKind {
    /// A single node.
    Standalone,
    /// A replica set reached through sentinels.
    Sentinel,
    /// A sharded cluster.
    Cluster,
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standalone => write!(f, "standalone"),
            Self::Sentinel => write!(f, "sentinel"),
            Self::Cluster => write!(f, "cluster"),
        }
    }
}

/// Connection lifecycle events emitted by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The transport connected.
    Connect,
    /// The client can accept commands.
    Ready,
    /// A connection-level error occurred.
    Error(String),
    /// The transport closed.
    Close,
    /// The client is re-establishing a lost connection.
    Reconnecting,
    /// The client was shut down and will not reconnect.
    End,
}

impl ClientEvent {
    /// Event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Ready => "ready",
            Self::Error(_) => "error",
            Self::Close => "close",
            Self::Reconnecting => "reconnecting",
            Self::End => "end",
        }
    }
}

/// Operations the session store needs from a backing-store client.
///
/// Every method is a single round trip. Clients do their own queueing; the
/// session store adds no locking on top.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Topology the client talks to.
    fn kind(&self) -> ClientKind;

    /// Subscribe to lifecycle events. Events sent before subscribing are not replayed.
    fn subscribe(&self) -> broadcast::Receiver<ClientEvent>;

    /// Whether the transport is open.
    fn is_open(&self) -> bool;

    /// Whether the client is ready to accept commands.
    fn is_ready(&self) -> bool;

    /// Open the connection.
    async fn connect(&self) -> ClientResult<()>;

    /// `PING`
    async fn ping(&self) -> ClientResult<String>;

    /// `INFO <section>` as raw text.
    async fn info(&self, section: &str) -> ClientResult<String>;

    /// `SELECT <db>`
    async fn select(&self, database: i64) -> ClientResult<()>;

    /// `GET <key>`
    async fn get(&self, key: &str) -> ClientResult<Option<String>>;

    /// `SET <key> <value> [EX <seconds>]`
    async fn set(&self, key: &str, value: &str, expire_secs: Option<u64>) -> ClientResult<()>;

    /// `DEL <key>`, returning the number of keys removed.
    async fn del(&self, key: &str) -> ClientResult<u64>;

    /// `TTL <key>`: seconds remaining, `-1` without expiry, `-2` when missing.
    async fn ttl(&self, key: &str) -> ClientResult<i64>;

    /// `EXPIRE <key> <seconds>`
    async fn expire(&self, key: &str, seconds: u64) -> ClientResult<bool>;

    /// `JSON.GET <key>`
    async fn json_get(&self, key: &str) -> ClientResult<Option<Value>>;

    /// `JSON.SET <key> <path> <document>`
    async fn json_set(&self, key: &str, path: &str, document: &Value) -> ClientResult<()>;

    /// Graceful `QUIT`.
    async fn quit(&self) -> ClientResult<()>;

    /// Graceful, topology-aware close.
    async fn close(&self) -> ClientResult<()>;

    /// Create an independent, unconnected client for the same topology.
    fn duplicate(&self, overrides: &ClientOverrides) -> ClientResult<Arc<dyn StoreClient>>;
}

/// Shared open/ready flags and event sender for client implementations.
#[derive(Debug)]
pub struct ClientState {
    events: broadcast::Sender<ClientEvent>,
    open: AtomicBool,
    ready: AtomicBool,
}

impl Default for ClientState {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientState {
    /// Create a closed, not-ready state.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            events,
            open: AtomicBool::new(false),
            ready: AtomicBool::new(false),
        }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Emit an event. Events without subscribers are dropped.
    pub fn emit(&self, event: ClientEvent) {
        debug!(event = event.name(), "client event");
        let _ = self.events.send(event);
    }

    /// Whether the transport is open.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Whether the client is ready.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Mark connected and emit `connect`.
    pub fn connected(&self) {
        self.open.store(true, Ordering::SeqCst);
        self.emit(ClientEvent::Connect);
    }

    /// Mark ready and emit `ready`.
    pub fn ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
        self.emit(ClientEvent::Ready);
    }

    /// Mark the connection as lost and emit `error` + `reconnecting`.
    ///
    /// Returns `false` if a reconnect was already in progress.
    pub fn lost(&self, reason: &str) -> bool {
        if !self.ready.swap(false, Ordering::SeqCst) {
            return false;
        }
        self.emit(ClientEvent::Error(reason.to_string()));
        self.emit(ClientEvent::Reconnecting);
        true
    }

    /// Mark the connection as recovered after `lost`, emitting `connect` + `ready`.
    pub fn recovered(&self) {
        if self.is_open() && !self.ready.swap(true, Ordering::SeqCst) {
            self.emit(ClientEvent::Connect);
            self.emit(ClientEvent::Ready);
        }
    }

    /// Mark shut down and emit `close` + `end`.
    pub fn ended(&self) {
        self.ready.store(false, Ordering::SeqCst);
        if self.open.swap(false, Ordering::SeqCst) {
            self.emit(ClientEvent::Close);
            self.emit(ClientEvent::End);
        }
    }
}

//! Connection lifecycle: opening, event relay and readiness.

use redstore_client::{ClientEvent, StoreClient};
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::StoreResult;
use crate::topology::Initialized;

/// Capacity of the store event channel.
pub const EVENT_CAPACITY: usize = 64;

/// Lifecycle events re-emitted by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
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
    /// The client was shut down.
    End,
    /// Legacy alias, sent after every `End`.
    Disconnect,
}

impl StoreEvent {
    /// Event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Ready => "ready",
            Self::Error(_) => "error",
            Self::Close => "close",
            Self::Reconnecting => "reconnecting",
            Self::End => "end",
            Self::Disconnect => "disconnect",
        }
    }
}

impl From<ClientEvent> for StoreEvent {
    fn from(event: ClientEvent) -> Self {
        match event {
            ClientEvent::Connect => Self::Connect,
            ClientEvent::Ready => Self::Ready,
            ClientEvent::Error(message) => Self::Error(message),
            ClientEvent::Close => Self::Close,
            ClientEvent::Reconnecting => Self::Reconnecting,
            ClientEvent::End => Self::End,
        }
    }
}

/// Connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The transport is open.
    Open,
    /// Ready but not reported open.
    Ready,
    /// Neither.
    Waiting,
}

impl Status {
    /// `open` is checked before `ready`, so a connected client reports `Open`.
    pub fn of(client: &dyn StoreClient) -> Self {
        if client.is_open() {
            Self::Open
        } else if client.is_ready() {
            Self::Ready
        } else {
            Self::Waiting
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Ready => write!(f, "ready"),
            Self::Waiting => write!(f, "waiting"),
        }
    }
}

/// Bring a constructed client up.
///
/// Subscribes to the client before opening it so the initial `connect` and
/// `ready` reach `events`, opens owned clients, and selects `db` (re-selected
/// on every later `connect`). Returns the relay task.
pub(crate) async fn start(
    init: &Initialized,
    db: Option<i64>,
    events: broadcast::Sender<StoreEvent>,
) -> StoreResult<JoinHandle<()>> {
    // database 0 is the default on every connection
    let db = db.filter(|db| *db != 0);

    let relay = tokio::spawn(relay(
        init.client.subscribe(),
        Arc::downgrade(&init.client),
        db,
        events,
        init.owned,
    ));

    if init.owned
        && let Err(err) = init.client.connect().await
    {
        relay.abort();
        return Err(err.into());
    }

    if let Some(db) = db {
        debug!(db, "selecting db");
        if let Err(err) = init.client.select(db).await {
            warn!(db, error = %err, "failed to select db");
        }
    }

    Ok(relay)
}

async fn relay(
    mut rx: broadcast::Receiver<ClientEvent>,
    client: Weak<dyn StoreClient>,
    db: Option<i64>,
    events: broadcast::Sender<StoreEvent>,
    mut skip_first_connect: bool,
) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "client events dropped");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        debug!("redis {}", event.name());

        if event == ClientEvent::Connect {
            if skip_first_connect {
                // the initial select is issued by `start`
                skip_first_connect = false;
            } else if let (Some(db), Some(client)) = (db, client.upgrade()) {
                tokio::spawn(async move {
                    if let Err(err) = client.select(db).await {
                        warn!(db, error = %err, "failed to re-select db after reconnect");
                    }
                });
            }
        }

        let ended = event == ClientEvent::End;
        let _ = events.send(event.into());
        if ended {
            let _ = events.send(StoreEvent::Disconnect);
        }
    }
}

/// Extract module names from an `INFO modules` reply.
pub fn parse_modules(info: &str) -> Vec<String> {
    info.lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix("module:name="))
        .map(|rest| rest.split(',').next().unwrap_or(rest).to_string())
        .collect()
}

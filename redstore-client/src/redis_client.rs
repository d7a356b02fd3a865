//! Redis-backed store client for the standalone, sentinel and cluster topologies.

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::aio::ConnectionManager;
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::{Cmd, FromRedisValue};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::client::{ClientEvent, ClientKind, ClientState, StoreClient};
use crate::error::is_connection_failure;
use crate::{
    ClientError, ClientOverrides, ClientResult, ClusterConfig, ConnectionSettings,
    SentinelConfig, StandaloneConfig, sentinel,
};

/// Topology a [`RedisClient`] connects to.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientTarget {
    /// A single node.
    Standalone(StandaloneConfig),
    /// A replica set behind sentinels.
    Sentinel(SentinelConfig),
    /// A sharded cluster.
    Cluster(ClusterConfig),
}

impl ClientTarget {
    /// The client kind this target produces.
    pub fn kind(&self) -> ClientKind {
        match self {
            Self::Standalone(_) => ClientKind::Standalone,
            Self::Sentinel(_) => ClientKind::Sentinel,
            Self::Cluster(_) => ClientKind::Cluster,
        }
    }

    /// Timeouts for this target.
    pub fn settings(&self) -> &ConnectionSettings {
        match self {
            Self::Standalone(config) => &config.settings,
            Self::Sentinel(config) => &config.settings,
            Self::Cluster(config) => &config.settings,
        }
    }

    /// Copy of this target with `overrides` applied.
    pub fn with_overrides(&self, overrides: &ClientOverrides) -> Self {
        let mut target = self.clone();
        match &mut target {
            Self::Standalone(config) => {
                if overrides.database.is_some() {
                    config.database = overrides.database;
                }
                if overrides.username.is_some() {
                    config.username = overrides.username.clone();
                }
                if overrides.password.is_some() {
                    config.password = overrides.password.clone();
                }
            }
            Self::Sentinel(config) => {
                if overrides.database.is_some() {
                    config.database = overrides.database;
                }
                if overrides.username.is_some() {
                    config.node_client.username = overrides.username.clone();
                }
                if overrides.password.is_some() {
                    config.node_client.password = overrides.password.clone();
                }
            }
            Self::Cluster(config) => {
                if overrides.username.is_some() {
                    config.defaults.username = overrides.username.clone();
                }
                if overrides.password.is_some() {
                    config.defaults.password = overrides.password.clone();
                }
            }
        }

        if let Some(settings) = &overrides.settings {
            match &mut target {
                Self::Standalone(config) => config.settings = settings.clone(),
                Self::Sentinel(config) => config.settings = settings.clone(),
                Self::Cluster(config) => config.settings = settings.clone(),
            }
        }
        target
    }
}

/// Sentinel re-resolution state.
///
/// One attempt runs at a time, and attempts repeat on every connection
/// failure until the client is ready again.
#[derive(Debug, Default)]
struct Resolution {
    running: AtomicBool,
    attempts: AtomicU32,
}

impl Resolution {
    fn begin(&self, state: &ClientState) -> Option<ResolutionGuard<'_>> {
        if state.is_ready() {
            return None;
        }
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        Some(ResolutionGuard {
            resolution: self,
            attempt,
        })
    }

    #[cfg(test)]
    fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

struct ResolutionGuard<'a> {
    resolution: &'a Resolution,
    attempt: u32,
}

impl ResolutionGuard<'_> {
    fn succeeded(self) {
        self.resolution.attempts.store(0, Ordering::SeqCst);
    }
}

impl Drop for ResolutionGuard<'_> {
    fn drop(&mut self) {
        self.resolution.running.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
enum Connection {
    Single(ConnectionManager),
    Cluster(ClusterConnection),
}

impl Connection {
    async fn query<T: FromRedisValue + Send>(&mut self, cmd: &Cmd) -> redis::RedisResult<T> {
        match self {
            Self::Single(conn) => cmd.query_async(conn).await,
            Self::Cluster(conn) => cmd.query_async(conn).await,
        }
    }
}

/// Store client backed by the `redis` crate.
///
/// Standalone and sentinel targets use a [`ConnectionManager`], which
/// reconnects on its own; sentinel targets additionally re-resolve the node
/// through the sentinels when the connection drops. Cluster targets use the
/// async cluster connection.
///
/// # Examples
///
/// ```no_run
/// use redstore_client::{ClientTarget, RedisClient, StandaloneConfig, StoreClient};
///
/// # async fn example() -> redstore_client::ClientResult<()> {
/// let client = RedisClient::new(ClientTarget::Standalone(StandaloneConfig::default()));
/// client.connect().await?;
/// assert_eq!(client.ping().await?, "PONG");
/// client.quit().await?;
/// # Ok(())
/// # }
/// ```
pub struct RedisClient {
    target: ClientTarget,
    connection: RwLock<Option<Connection>>,
    state: ClientState,
    resolution: Resolution,
}

impl RedisClient {
    /// Create an unconnected client.
    pub fn new(target: ClientTarget) -> Self {
        Self {
            target,
            connection: RwLock::new(None),
            state: ClientState::new(),
            resolution: Resolution::default(),
        }
    }

    /// Get the target.
    pub fn target(&self) -> &ClientTarget {
        &self.target
    }

    async fn open_connection(&self) -> ClientResult<Connection> {
        match &self.target {
            ClientTarget::Standalone(config) => {
                debug!("Initializing standalone Redis");
                open_single(&config.connection_url()?).await
            }
            ClientTarget::Sentinel(config) => {
                debug!(
                    master = %config.master_name,
                    "Initializing Redis replica set with sentinels"
                );
                open_sentinel(config).await
            }
            ClientTarget::Cluster(config) => {
                debug!(nodes = config.root_nodes.len(), "Initializing Redis cluster");
                let client = ClusterClient::new(config.node_urls()?)
                    .map_err(|e| ClientError::Connection(e.to_string()))?;
                let conn = client
                    .get_async_connection()
                    .await
                    .map_err(|e| ClientError::Connection(e.to_string()))?;
                Ok(Connection::Cluster(conn))
            }
        }
    }

    async fn run<T: FromRedisValue + Send>(&self, cmd: &Cmd) -> ClientResult<T> {
        let mut conn = self
            .connection
            .read()
            .clone()
            .ok_or(ClientError::NotConnected)?;

        let result = match self.target.settings().command_timeout {
            Some(limit) => tokio::time::timeout(limit, conn.query::<T>(cmd))
                .await
                .map_err(|_| ClientError::Timeout)?,
            None => conn.query::<T>(cmd).await,
        };

        match result {
            Ok(value) => {
                self.state.recovered();
                Ok(value)
            }
            Err(err) => {
                if is_connection_failure(&err) {
                    self.connection_lost(&err).await;
                }
                Err(err.into())
            }
        }
    }

    async fn connection_lost(&self, err: &redis::RedisError) {
        if self.state.lost(&err.to_string()) {
            warn!(kind = %self.kind(), error = %err, "Redis connection lost");
        }

        // retried on every failure until a resolved node answers
        if let ClientTarget::Sentinel(config) = &self.target
            && let Some(guard) = self.resolution.begin(&self.state)
        {
            let attempt = guard.attempt;
            match open_sentinel(config).await {
                Ok(conn) => {
                    *self.connection.write() = Some(conn);
                    guard.succeeded();
                    self.state.recovered();
                    info!(
                        master = %config.master_name,
                        attempt,
                        "Re-resolved node through sentinels"
                    );
                }
                Err(e) => warn!(error = %e, attempt, "Sentinel re-resolution failed"),
            }
        }
    }

    fn shutdown(&self) -> Option<Connection> {
        let conn = self.connection.write().take();
        self.state.ended();
        conn
    }
}

async fn open_single(url: &str) -> ClientResult<Connection> {
    let client = redis::Client::open(url).map_err(|e| ClientError::Connection(e.to_string()))?;
    let conn = ConnectionManager::new(client)
        .await
        .map_err(|e| ClientError::Connection(e.to_string()))?;
    Ok(Connection::Single(conn))
}

async fn open_sentinel(config: &SentinelConfig) -> ClientResult<Connection> {
    let url = sentinel::resolve_node(config).await?;
    open_single(&url).await
}

fn info_text(value: redis::Value) -> ClientResult<String> {
    match value {
        redis::Value::BulkString(bytes) => String::from_utf8(bytes)
            .map_err(|e| ClientError::Command(format!("INFO reply is not UTF-8: {}", e))),
        redis::Value::SimpleString(text) => Ok(text),
        redis::Value::VerbatimString { text, .. } => Ok(text),
        // cluster replies are keyed by node; every node runs the same modules
        redis::Value::Map(entries) => match entries.into_iter().next() {
            Some((_, reply)) => info_text(reply),
            None => Ok(String::new()),
        },
        other => Err(ClientError::Command(format!("unexpected INFO reply: {:?}", other))),
    }
}

#[async_trait]
impl StoreClient for RedisClient {
    fn kind(&self) -> ClientKind {
        self.target.kind()
    }

    fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.state.subscribe()
    }

    fn is_open(&self) -> bool {
        self.state.is_open()
    }

    fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    async fn connect(&self) -> ClientResult<()> {
        let limit = self.target.settings().connect_timeout;
        let opened = tokio::time::timeout(limit, self.open_connection())
            .await
            .unwrap_or(Err(ClientError::Timeout));

        let conn = match opened {
            Ok(conn) => conn,
            Err(err) => {
                self.state.emit(ClientEvent::Error(err.to_string()));
                return Err(err);
            }
        };

        let mut probe = conn.clone();
        *self.connection.write() = Some(conn);
        self.state.connected();

        let pong: String = probe
            .query(&redis::cmd("PING"))
            .await
            .map_err(|e| ClientError::Connection(e.to_string()))?;
        debug!(reply = %pong, "Redis handshake");

        self.state.ready();
        info!(kind = %self.kind(), "Redis client connected");
        Ok(())
    }

    async fn ping(&self) -> ClientResult<String> {
        self.run(&redis::cmd("PING")).await
    }

    async fn info(&self, section: &str) -> ClientResult<String> {
        let reply: redis::Value = self.run(redis::cmd("INFO").arg(section)).await?;
        info_text(reply)
    }

    async fn select(&self, database: i64) -> ClientResult<()> {
        self.run(redis::cmd("SELECT").arg(database)).await
    }

    async fn get(&self, key: &str) -> ClientResult<Option<String>> {
        self.run(redis::cmd("GET").arg(key)).await
    }

    async fn set(&self, key: &str, value: &str, expire_secs: Option<u64>) -> ClientResult<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(seconds) = expire_secs {
            cmd.arg("EX").arg(seconds);
        }
        self.run(&cmd).await
    }

    async fn del(&self, key: &str) -> ClientResult<u64> {
        self.run(redis::cmd("DEL").arg(key)).await
    }

    async fn ttl(&self, key: &str) -> ClientResult<i64> {
        self.run(redis::cmd("TTL").arg(key)).await
    }

    async fn expire(&self, key: &str, seconds: u64) -> ClientResult<bool> {
        self.run(redis::cmd("EXPIRE").arg(key).arg(seconds)).await
    }

    async fn json_get(&self, key: &str) -> ClientResult<Option<Value>> {
        let raw: Option<String> = self.run(redis::cmd("JSON.GET").arg(key)).await?;
        Ok(raw.map(|doc| serde_json::from_str(&doc)).transpose()?)
    }

    async fn json_set(&self, key: &str, path: &str, document: &Value) -> ClientResult<()> {
        let document = serde_json::to_string(document)?;
        self.run(redis::cmd("JSON.SET").arg(key).arg(path).arg(document))
            .await
    }

    async fn quit(&self) -> ClientResult<()> {
        if let Some(Connection::Single(mut conn)) = self.shutdown() {
            let reply: redis::RedisResult<()> = redis::cmd("QUIT").query_async(&mut conn).await;
            if let Err(err) = reply {
                debug!(error = %err, "QUIT ended with error");
            }
        }
        debug!(kind = %self.kind(), "Redis client quit");
        Ok(())
    }

    async fn close(&self) -> ClientResult<()> {
        drop(self.shutdown());
        debug!(kind = %self.kind(), "Redis client closed");
        Ok(())
    }

    fn duplicate(&self, overrides: &ClientOverrides) -> ClientResult<Arc<dyn StoreClient>> {
        Ok(Arc::new(Self::new(self.target.with_overrides(overrides))))
    }
}

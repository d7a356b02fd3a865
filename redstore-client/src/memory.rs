//! In-memory store client.
//!
//! Mirrors the observable behavior of a Redis node closely enough for tests
//! and local development: per-database keyspaces, whole-second TTLs with the
//! `-1`/`-2` conventions, JSON documents, an `INFO modules` section and the
//! lifecycle events. Expiry uses `tokio::time`, so a paused test clock
//! drives it.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::client::{ClientEvent, ClientKind, ClientState, StoreClient};
use crate::{ClientError, ClientOverrides, ClientResult};

/// How a client was shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// `quit()`
    Quit,
    /// `close()`
    Close,
}

#[derive(Debug, Clone)]
enum Stored {
    Text(String),
    Document(Value),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Stored,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|exp| exp > now)
    }
}

#[derive(Debug, Default)]
struct Keyspace {
    data: RwLock<HashMap<(i64, String), Entry>>,
    modules: Vec<String>,
}

/// In-memory [`StoreClient`].
///
/// Duplicates share the keyspace, like a second connection to the same node.
///
/// # Examples
///
/// ```
/// use redstore_client::{MemoryClient, StoreClient};
///
/// # #[tokio::main]
/// # async fn main() -> redstore_client::ClientResult<()> {
/// let client = MemoryClient::new();
/// client.connect().await?;
/// client.set("greeting", "hello", Some(60)).await?;
/// assert_eq!(client.get("greeting").await?, Some("hello".to_string()));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MemoryClient {
    keyspace: Arc<Keyspace>,
    kind: ClientKind,
    database: AtomicI64,
    unreachable: bool,
    state: ClientState,
    shutdown: Mutex<Option<Shutdown>>,
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryClient {
    /// Create a standalone client with no server modules.
    pub fn new() -> Self {
        Self::with_keyspace(Arc::new(Keyspace::default()), ClientKind::Standalone, 0)
    }

    fn with_keyspace(keyspace: Arc<Keyspace>, kind: ClientKind, database: i64) -> Self {
        Self {
            keyspace,
            kind,
            database: AtomicI64::new(database),
            unreachable: false,
            state: ClientState::new(),
            shutdown: Mutex::new(None),
        }
    }

    /// Advertise server modules in `INFO modules`.
    pub fn with_modules<I, S>(self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keyspace = Keyspace {
            data: RwLock::new(self.keyspace.data.read().clone()),
            modules: modules.into_iter().map(Into::into).collect(),
        };
        Self {
            keyspace: Arc::new(keyspace),
            ..self
        }
    }

    /// Report a different client kind.
    pub fn with_kind(self, kind: ClientKind) -> Self {
        Self { kind, ..self }
    }

    /// A client whose `connect` always fails.
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::new()
        }
    }

    /// Currently selected database.
    pub fn database(&self) -> i64 {
        self.database.load(Ordering::SeqCst)
    }

    /// How the client was shut down, if it was.
    pub fn shutdown(&self) -> Option<Shutdown> {
        *self.shutdown.lock()
    }

    /// Simulate a dropped connection that is re-established, emitting
    /// `error`, `reconnecting`, `connect` and `ready`.
    pub fn simulate_reconnect(&self) {
        if self.state.lost("connection reset by peer") {
            self.state.recovered();
        }
    }

    /// Store a raw string value, bypassing any session encoding.
    pub fn insert_raw(&self, key: &str, value: &str) {
        self.write(key, Stored::Text(value.to_string()), None);
    }

    fn ensure_ready(&self) -> ClientResult<()> {
        if self.state.is_open() {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }

    fn slot(&self, key: &str) -> (i64, String) {
        (self.database(), key.to_string())
    }

    fn read(&self, key: &str) -> Option<Entry> {
        let data = self.keyspace.data.read();
        data.get(&self.slot(key))
            .filter(|entry| entry.is_live(Instant::now()))
            .cloned()
    }

    fn write(&self, key: &str, value: Stored, expires_at: Option<Instant>) {
        self.keyspace
            .data
            .write()
            .insert(self.slot(key), Entry { value, expires_at });
    }

    fn finish(&self, how: Shutdown) {
        *self.shutdown.lock() = Some(how);
        self.state.ended();
    }
}

#[async_trait]
impl StoreClient for MemoryClient {
    fn kind(&self) -> ClientKind {
        self.kind
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
        if self.unreachable {
            let err = ClientError::Connection("connection refused".to_string());
            self.state.emit(ClientEvent::Error(err.to_string()));
            return Err(err);
        }
        self.state.connected();
        self.state.ready();
        Ok(())
    }

    async fn ping(&self) -> ClientResult<String> {
        self.ensure_ready()?;
        Ok("PONG".to_string())
    }

    async fn info(&self, section: &str) -> ClientResult<String> {
        self.ensure_ready()?;
        if !section.eq_ignore_ascii_case("modules") {
            return Ok(String::new());
        }

        let mut info = String::from("# Modules\r\n");
        for module in &self.keyspace.modules {
            info.push_str(&format!(
                "module:name={},ver=10000,api=1,filters=0,usedby=[],using=[],options=[]\r\n",
                module
            ));
        }
        Ok(info)
    }

    async fn select(&self, database: i64) -> ClientResult<()> {
        self.ensure_ready()?;
        if !(0..16).contains(&database) {
            return Err(ClientError::Command("ERR DB index is out of range".to_string()));
        }
        self.database.store(database, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, key: &str) -> ClientResult<Option<String>> {
        self.ensure_ready()?;
        match self.read(key).map(|entry| entry.value) {
            None => Ok(None),
            Some(Stored::Text(text)) => Ok(Some(text)),
            Some(Stored::Document(_)) => Err(ClientError::Command(
                "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
            )),
        }
    }

    async fn set(&self, key: &str, value: &str, expire_secs: Option<u64>) -> ClientResult<()> {
        self.ensure_ready()?;
        let expires_at =
            expire_secs.map(|secs| Instant::now() + std::time::Duration::from_secs(secs));
        self.write(key, Stored::Text(value.to_string()), expires_at);
        Ok(())
    }

    async fn del(&self, key: &str) -> ClientResult<u64> {
        self.ensure_ready()?;
        let removed = self.keyspace.data.write().remove(&self.slot(key));
        Ok(match removed {
            Some(entry) if entry.is_live(Instant::now()) => 1,
            _ => 0,
        })
    }

    async fn ttl(&self, key: &str) -> ClientResult<i64> {
        self.ensure_ready()?;
        let now = Instant::now();
        Ok(match self.read(key).map(|entry| entry.expires_at) {
            None => -2,
            Some(None) => -1,
            Some(Some(expires_at)) => {
                let remaining = expires_at.saturating_duration_since(now).as_millis() as i64;
                (remaining + 500) / 1000
            }
        })
    }

    async fn expire(&self, key: &str, seconds: u64) -> ClientResult<bool> {
        self.ensure_ready()?;
        let now = Instant::now();
        let mut data = self.keyspace.data.write();
        match data.get_mut(&self.slot(key)) {
            Some(entry) if entry.is_live(now) => {
                entry.expires_at = Some(now + std::time::Duration::from_secs(seconds));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn json_get(&self, key: &str) -> ClientResult<Option<Value>> {
        self.ensure_ready()?;
        if !self.keyspace.modules.iter().any(|m| m == "ReJSON") {
            return Err(ClientError::Command("ERR unknown command 'JSON.GET'".to_string()));
        }
        match self.read(key).map(|entry| entry.value) {
            None => Ok(None),
            Some(Stored::Document(doc)) => Ok(Some(doc)),
            Some(Stored::Text(_)) => Err(ClientError::Command(
                "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
            )),
        }
    }

    async fn json_set(&self, key: &str, path: &str, document: &Value) -> ClientResult<()> {
        self.ensure_ready()?;
        if !self.keyspace.modules.iter().any(|m| m == "ReJSON") {
            return Err(ClientError::Command("ERR unknown command 'JSON.SET'".to_string()));
        }
        if path != "$" {
            return Err(ClientError::Command(format!("ERR unsupported path '{}'", path)));
        }
        // JSON.SET on the root replaces the value and clears any expiry
        self.write(key, Stored::Document(document.clone()), None);
        Ok(())
    }

    async fn quit(&self) -> ClientResult<()> {
        self.finish(Shutdown::Quit);
        Ok(())
    }

    async fn close(&self) -> ClientResult<()> {
        self.finish(Shutdown::Close);
        Ok(())
    }

    fn duplicate(&self, overrides: &ClientOverrides) -> ClientResult<Arc<dyn StoreClient>> {
        let database = overrides.database.unwrap_or_else(|| self.database());
        Ok(Arc::new(Self {
            unreachable: self.unreachable,
            ..Self::with_keyspace(self.keyspace.clone(), self.kind, database)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn connected() -> MemoryClient {
        let client = MemoryClient::new();
        client.connect().await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_requires_connect() {
        let client = MemoryClient::new();
        assert!(matches!(client.ping().await, Err(ClientError::NotConnected)));
        client.connect().await.unwrap();
        assert_eq!(client.ping().await.unwrap(), "PONG");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_conventions() {
        let client = connected().await;

        assert_eq!(client.ttl("missing").await.unwrap(), -2);

        client.set("forever", "v", None).await.unwrap();
        assert_eq!(client.ttl("forever").await.unwrap(), -1);

        client.set("short", "v", Some(1)).await.unwrap();
        assert_eq!(client.ttl("short").await.unwrap(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(client.ttl("short").await.unwrap(), -2);
        assert_eq!(client.get("short").await.unwrap(), None);
        assert_eq!(client.del("short").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_databases_are_separate() {
        let client = connected().await;
        client.set("key", "zero", None).await.unwrap();
        client.select(3).await.unwrap();
        assert_eq!(client.get("key").await.unwrap(), None);
        client.select(0).await.unwrap();
        assert_eq!(client.get("key").await.unwrap(), Some("zero".to_string()));
        assert!(client.select(99).await.is_err());
    }

    #[tokio::test]
    async fn test_documents_require_module() {
        let plain = connected().await;
        assert!(plain.json_set("doc", "$", &serde_json::json!({"a": 1})).await.is_err());

        let client = MemoryClient::new().with_modules(["ReJSON"]);
        client.connect().await.unwrap();
        client.json_set("doc", "$", &serde_json::json!({"a": 1})).await.unwrap();
        assert_eq!(
            client.json_get("doc").await.unwrap(),
            Some(serde_json::json!({"a": 1}))
        );
        assert!(client.get("doc").await.is_err());
    }

    #[tokio::test]
    async fn test_info_lists_modules() {
        let client = MemoryClient::new().with_modules(["ReJSON", "search"]);
        client.connect().await.unwrap();
        let info = client.info("modules").await.unwrap();
        assert!(info.contains("module:name=ReJSON,"));
        assert!(info.contains("module:name=search,"));
    }

    #[tokio::test]
    async fn test_duplicate_shares_keyspace() {
        let client = connected().await;
        client.set("shared", "yes", None).await.unwrap();

        let dup = client.duplicate(&ClientOverrides::default()).unwrap();
        assert!(!dup.is_open());
        dup.connect().await.unwrap();
        assert_eq!(dup.get("shared").await.unwrap(), Some("yes".to_string()));

        dup.quit().await.unwrap();
        assert!(client.is_open());
    }

    #[tokio::test]
    async fn test_shutdown_is_recorded() {
        let client = connected().await;
        client.close().await.unwrap();
        assert_eq!(client.shutdown(), Some(Shutdown::Close));
        assert!(!client.is_open());
    }
}

//! Redis-backed session store.

use async_trait::async_trait;
use redstore_client::{ClientKind, StoreClient};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OnceCell, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::codec::Codec;
use crate::error::{StoreError, StoreResult};
use crate::lifecycle::{self, EVENT_CAPACITY, Status, StoreEvent, parse_modules};
use crate::options::{DataType, StoreOptions};
use crate::topology::Initialized;
use crate::traits::SessionStore;

/// JSON path used for whole-document writes.
const ROOT_PATH: &str = "$";

struct Inner {
    client: Arc<dyn StoreClient>,
    kind: Option<ClientKind>,
    key_prefix: String,
    native_documents: bool,
    codec: Codec,
    relay: JoinHandle<()>,
}

/// Session store over a standalone, sentinel or cluster Redis deployment,
/// or over a caller-supplied client.
///
/// Every operation is a single round trip to the backing store, except a
/// document write with a TTL (see [`RedisStore::set`]).
///
/// # Examples
///
/// ```no_run
/// use redstore::{RedisStore, StoreOptions};
/// use serde_json::json;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let options = StoreOptions::builder()
///         .url("redis://localhost:6379")
///         .key_prefix("sess:")
///         .build();
///
///     let store = RedisStore::new(options);
///     let mut events = store.subscribe();
///     store.init().await?;
///
///     store.set("abc", &json!({"user": 1}), Some(Duration::from_secs(3600))).await?;
///     assert_eq!(store.get("abc").await?, Some(json!({"user": 1})));
///
///     while let Ok(event) = events.try_recv() {
///         println!("redis {}", event.name());
///     }
///
///     store.quit().await?;
///     Ok(())
/// }
/// ```
pub struct RedisStore {
    options: StoreOptions,
    events: broadcast::Sender<StoreEvent>,
    inner: OnceCell<Inner>,
    modules: OnceCell<Vec<String>>,
}

impl RedisStore {
    /// Create an uninitialized store. Call [`init`](Self::init) before use.
    pub fn new(options: StoreOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            options,
            events,
            inner: OnceCell::new(),
            modules: OnceCell::new(),
        }
    }

    /// Create and initialize a store.
    pub async fn connect(options: StoreOptions) -> StoreResult<Self> {
        let store = Self::new(options);
        store.init().await?;
        Ok(store)
    }

    /// Build the client for the configured topology, open it, select the
    /// database and discover server modules.
    ///
    /// Connection failures are returned; the store stays uninitialized and
    /// `init` may be retried.
    pub async fn init(&self) -> StoreResult<()> {
        if self.inner.initialized() {
            return Err(StoreError::AlreadyInitialized);
        }

        let normalized = self.options.clone().normalize()?;
        let initialized = normalized.topology.initialize()?;
        self.start(
            initialized,
            normalized.db,
            normalized.key_prefix,
            normalized.data_type,
            normalized.codec,
        )
        .await
    }

    pub(crate) async fn start(
        &self,
        initialized: Initialized,
        db: Option<i64>,
        key_prefix: String,
        data_type: DataType,
        codec: Codec,
    ) -> StoreResult<()> {
        let relay = lifecycle::start(&initialized, db, self.events.clone()).await?;
        let owned = initialized.owned;
        let client = initialized.client;

        let modules = match self.fetch_modules(client.as_ref()).await {
            Ok(modules) => modules,
            Err(err) => {
                warn!(error = %err, "module discovery failed");
                Vec::new()
            }
        };
        let native_documents = match data_type.required_module() {
            Some(module) if modules.iter().any(|m| m == module) => true,
            Some(module) => {
                warn!(module, "server module unavailable, storing sessions as strings");
                false
            }
            None => false,
        };

        let inner = Inner {
            client,
            kind: initialized.kind,
            key_prefix,
            native_documents,
            codec,
            relay,
        };

        if let Err(tokio::sync::SetError::AlreadyInitializedError(inner)
        | tokio::sync::SetError::InitializingError(inner)) = self.inner.set(inner)
        {
            inner.relay.abort();
            if owned {
                let _ = inner.client.close().await;
            }
            return Err(StoreError::AlreadyInitialized);
        }

        info!(
            kind = ?self.kind(),
            native_documents,
            "session store initialized"
        );
        Ok(())
    }

    fn inner(&self) -> StoreResult<&Inner> {
        self.inner.get().ok_or(StoreError::NotInitialized)
    }

    fn key(&self, inner: &Inner, sid: &str) -> String {
        format!("{}{}", inner.key_prefix, sid)
    }

    async fn fetch_modules(&self, client: &dyn StoreClient) -> StoreResult<Vec<String>> {
        let modules = self
            .modules
            .get_or_try_init(|| async {
                let info = client.info("modules").await?;
                let modules = parse_modules(&info);
                debug!(modules = ?modules, "discovered server modules");
                Ok::<_, StoreError>(modules)
            })
            .await?;
        Ok(modules.clone())
    }

    /// Subscribe to lifecycle events.
    ///
    /// Subscribe before [`init`](Self::init) to observe the initial
    /// `connect` and `ready`. Events are not replayed to late subscribers.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// `PING`, returning the server's reply (`PONG`).
    pub async fn ping(&self) -> StoreResult<String> {
        Ok(self.inner()?.client.ping().await?)
    }

    /// Server module names, fetched once and cached for the life of the store.
    pub async fn mods(&self) -> StoreResult<Vec<String>> {
        let inner = self.inner()?;
        self.fetch_modules(inner.client.as_ref()).await
    }

    /// Get a session.
    ///
    /// Returns `None` for a missing session and for a stored value the codec
    /// cannot decode. Documents are returned as stored.
    pub async fn get(&self, sid: &str) -> StoreResult<Option<Value>> {
        let inner = self.inner()?;
        let key = self.key(inner, sid);

        if inner.native_documents {
            debug!(key = %key, "JSON.GET");
            return Ok(inner.client.json_get(&key).await?);
        }

        debug!(key = %key, "GET");
        let data = inner.client.get(&key).await?;
        match data.filter(|data| !data.is_empty()) {
            Some(data) => Ok(inner.codec.decode(&data)),
            None => {
                debug!(key = %key, "get session: none");
                Ok(None)
            }
        }
    }

    /// Store a session, with an optional TTL rounded up to whole seconds.
    ///
    /// In document mode a TTL takes a second command (`EXPIRE` after
    /// `JSON.SET`). The pair is best-effort, not atomic: if the second
    /// command fails the document is kept without an expiry.
    pub async fn set(&self, sid: &str, value: &Value, ttl: Option<Duration>) -> StoreResult<()> {
        let inner = self.inner()?;
        let key = self.key(inner, sid);
        let ttl = ttl.map(ceil_secs).filter(|secs| *secs > 0);

        if inner.native_documents {
            debug!(key = %key, ttl = ?ttl, "JSON.SET");
            inner.client.json_set(&key, ROOT_PATH, value).await?;
            if let Some(secs) = ttl {
                inner.client.expire(&key, secs).await?;
            }
            return Ok(());
        }

        let data = inner
            .codec
            .encode(value)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        debug!(key = %key, ttl = ?ttl, "SET");
        inner.client.set(&key, &data, ttl).await?;
        Ok(())
    }

    /// Remaining lifetime in seconds: `-1` without expiry, `-2` when missing.
    pub async fn ttl(&self, sid: &str) -> StoreResult<i64> {
        let inner = self.inner()?;
        Ok(inner.client.ttl(&self.key(inner, sid)).await?)
    }

    /// Delete a session, returning the number of keys removed.
    pub async fn destroy(&self, sid: &str) -> StoreResult<u64> {
        let inner = self.inner()?;
        let key = self.key(inner, sid);
        debug!(key = %key, "DEL");
        Ok(inner.client.del(&key).await?)
    }

    /// Close the connection.
    ///
    /// Cluster and sentinel clients get a topology-aware close; everything
    /// else a plain `QUIT`.
    pub async fn quit(&self) -> StoreResult<()> {
        let inner = self.inner()?;
        debug!(kind = ?inner.kind, "quitting redis client");
        match inner.kind {
            Some(ClientKind::Cluster | ClientKind::Sentinel) => inner.client.close().await?,
            _ => inner.client.quit().await?,
        }
        Ok(())
    }

    /// Close the connection with a plain `QUIT`, whatever the topology.
    #[deprecated(note = "use `quit`, which closes cluster and sentinel clients correctly")]
    pub async fn end(&self) -> StoreResult<()> {
        let inner = self.inner()?;
        debug!("quitting redis client");
        Ok(inner.client.quit().await?)
    }

    /// Whether the connection is open.
    pub fn is_open(&self) -> bool {
        self.inner.get().is_some_and(|inner| inner.client.is_open())
    }

    /// Whether the client is ready for commands.
    pub fn is_ready(&self) -> bool {
        self.inner.get().is_some_and(|inner| inner.client.is_ready())
    }

    /// Alias for [`is_ready`](Self::is_ready).
    pub fn connected(&self) -> bool {
        self.is_ready()
    }

    /// Connection status.
    pub fn status(&self) -> Status {
        self.inner
            .get()
            .map(|inner| Status::of(inner.client.as_ref()))
            .unwrap_or(Status::Waiting)
    }

    /// How the client was constructed; `None` for supplied or duplicated clients.
    pub fn kind(&self) -> Option<ClientKind> {
        self.inner.get().and_then(|inner| inner.kind)
    }

    /// Configured key prefix.
    pub fn key_prefix(&self) -> &str {
        self.options.key_prefix.as_deref().unwrap_or_default()
    }

    /// Whether sessions are stored as native documents.
    pub fn uses_native_documents(&self) -> bool {
        self.inner.get().is_some_and(|inner| inner.native_documents)
    }

    /// The underlying client, once initialized.
    pub fn client(&self) -> Option<Arc<dyn StoreClient>> {
        self.inner.get().map(|inner| inner.client.clone())
    }
}

impl Drop for RedisStore {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.get() {
            inner.relay.abort();
        }
    }
}

fn ceil_secs(ttl: Duration) -> u64 {
    ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0)
}

#[async_trait]
impl SessionStore for RedisStore {
    async fn get(&self, sid: &str) -> StoreResult<Option<Value>> {
        RedisStore::get(self, sid).await
    }

    async fn set(&self, sid: &str, value: &Value, ttl: Option<Duration>) -> StoreResult<()> {
        RedisStore::set(self, sid, value, ttl).await
    }

    async fn ttl(&self, sid: &str) -> StoreResult<i64> {
        RedisStore::ttl(self, sid).await
    }

    async fn destroy(&self, sid: &str) -> StoreResult<u64> {
        RedisStore::destroy(self, sid).await
    }
}

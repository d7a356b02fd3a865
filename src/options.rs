//! Store options and their normalization.
//!
//! [`StoreOptions`] accepts the flat option mapping (including the legacy
//! `auth_pass`/`pass` password aliases and the `socket` path alias) and
//! [`StoreOptions::normalize`] turns it into a [`NormalizedOptions`] with the
//! aliases resolved and exactly one [`Topology`] chosen.

use redstore_client::{
    NodeAddress, NodeClientOptions, SentinelRole, SocketOptions, StoreClient, lenient,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::codec::{Codec, SerializeFn, UnserializeFn};
use crate::error::{StoreError, StoreResult};
use crate::topology::Topology;

/// How session values are stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DataType {
    /// Encoded text under a plain string key.
    #[default]
    String,
    /// Native RedisJSON documents, when the server has the module.
    ReJson,
}

impl DataType {
    /// Server module this data type depends on.
    pub const REJSON_MODULE: &'static str = "ReJSON";

    /// Parse a `dataType` selector. Unknown selectors fall back to `String`.
    pub fn parse(selector: &str) -> Self {
        let selector = selector.trim();
        if selector.is_empty() || selector.eq_ignore_ascii_case("string") {
            Self::String
        } else if selector.eq_ignore_ascii_case("rejson")
            || selector.eq_ignore_ascii_case("rejson-rl")
        {
            Self::ReJson
        } else {
            warn!(data_type = %selector, "unknown data type, storing sessions as strings");
            Self::String
        }
    }

    /// Required server module, if any.
    pub fn required_module(&self) -> Option<&'static str> {
        match self {
            Self::String => None,
            Self::ReJson => Some(Self::REJSON_MODULE),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::ReJson => write!(f, "ReJSON"),
        }
    }
}

/// `socket` accepts a legacy unix-socket path or a socket-options object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SocketField {
    /// Legacy alias for `path`.
    Path(String),
    /// Socket options.
    Options(SocketOptions),
}

/// `clusterOptions` block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterOptions {
    /// Seed nodes.
    pub root_nodes: Vec<NodeAddress>,
    /// Credentials and TLS applied to every node.
    pub defaults: Option<NodeClientOptions>,
}

/// Caller-supplied session store options.
///
/// Deserializes from the flat camelCase mapping; keys not listed here are
/// collected in `passthrough` and handed to the client configuration.
///
/// # Examples
///
/// ```
/// use redstore::StoreOptions;
/// use serde_json::json;
///
/// let options = StoreOptions::from_json(json!({
///     "url": "redis://:secret@cache.internal:6380",
///     "db": "2",
///     "keyPrefix": "sess:",
///     "connectTimeout": 2000
/// }))
/// .unwrap();
///
/// assert_eq!(options.db, Some(2));
/// assert_eq!(options.key_prefix.as_deref(), Some("sess:"));
/// assert!(options.passthrough.contains_key("connectTimeout"));
/// ```
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreOptions {
    /// Pre-built client. Takes precedence over every topology option.
    #[serde(skip)]
    pub client: Option<Arc<dyn StoreClient>>,
    /// Duplicate `client` instead of using it directly.
    pub duplicate: bool,
    /// Logical database index.
    #[serde(alias = "database", deserialize_with = "lenient::opt_i64")]
    pub db: Option<i64>,
    /// Prefix prepended to every session id.
    pub key_prefix: Option<String>,
    /// `"string"` (default) or `"ReJSON"`.
    pub data_type: Option<String>,
    /// Username for Redis 6+ ACL.
    pub username: Option<String>,
    /// Password.
    pub password: Option<String>,
    /// Legacy password alias.
    #[serde(rename = "auth_pass", alias = "authPass")]
    pub auth_pass: Option<String>,
    /// Legacy password alias.
    pub pass: Option<String>,
    /// Unix socket path.
    pub path: Option<String>,
    /// Socket options, or a legacy unix socket path.
    pub socket: Option<SocketField>,
    /// Connection URL, split into host, port, credentials and database.
    pub url: Option<String>,
    /// Connection URL used verbatim.
    pub redis_url: Option<String>,
    /// Standalone topology flag.
    pub is_redis_single: bool,
    /// Sentinel-backed replica set flag.
    pub is_redis_replset: bool,
    /// Cluster flag.
    pub is_redis_cluster: bool,
    /// Sentinel master set name.
    pub name: Option<String>,
    /// Sentinel node role.
    pub role: SentinelRole,
    /// Sentinel root nodes, tried in order.
    pub sentinel_root_nodes: Option<Vec<NodeAddress>>,
    /// Credentials for the sentinels.
    pub sentinel_client_options: Option<NodeClientOptions>,
    /// Credentials for the data nodes behind the sentinels.
    pub node_client_options: Option<NodeClientOptions>,
    /// Cluster configuration.
    pub cluster_options: Option<ClusterOptions>,
    /// Cluster seed nodes, when `clusterOptions` is absent.
    pub root_nodes: Vec<NodeAddress>,
    /// Cluster node defaults, when `clusterOptions` is absent.
    pub defaults: Option<NodeClientOptions>,
    /// Custom encoder.
    #[serde(skip)]
    pub serialize: Option<SerializeFn>,
    /// Custom decoder.
    #[serde(skip)]
    pub unserialize: Option<UnserializeFn>,
    /// Unrecognized options, forwarded to the client configuration.
    #[serde(flatten)]
    pub passthrough: Map<String, Value>,
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("client", &self.client.as_ref().map(|c| c.kind()))
            .field("duplicate", &self.duplicate)
            .field("db", &self.db)
            .field("key_prefix", &self.key_prefix)
            .field("data_type", &self.data_type)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("path", &self.path)
            .field("url", &self.url.as_ref().map(|_| "***"))
            .field("is_redis_single", &self.is_redis_single)
            .field("is_redis_replset", &self.is_redis_replset)
            .field("is_redis_cluster", &self.is_redis_cluster)
            .field("name", &self.name)
            .field("sentinel_root_nodes", &self.sentinel_root_nodes)
            .field("root_nodes", &self.root_nodes)
            .field("passthrough", &self.passthrough.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Options after alias resolution and topology selection.
#[derive(Clone, Debug)]
pub struct NormalizedOptions {
    /// Key prefix (empty by default).
    pub key_prefix: String,
    /// Requested data type.
    pub data_type: DataType,
    /// Logical database index.
    pub db: Option<i64>,
    /// The chosen topology.
    pub topology: Topology,
    /// Session value codec.
    pub codec: Codec,
}

// passthrough keys that only carry meaning as functions or handles
const NON_DATA_KEYS: [&str; 3] = ["client", "serialize", "unserialize"];

impl StoreOptions {
    /// Create a builder.
    pub fn builder() -> StoreOptionsBuilder {
        StoreOptionsBuilder::new()
    }

    /// Parse options from a JSON value.
    pub fn from_json(value: Value) -> StoreResult<Self> {
        serde_json::from_value(value).map_err(|e| StoreError::Config(e.to_string()))
    }

    /// Load options from environment variables.
    pub fn from_env() -> StoreOptionsBuilder {
        let mut builder = StoreOptionsBuilder::new();

        if let Ok(url) = std::env::var("REDIS_URL") {
            builder = builder.url(url);
        }

        if let Ok(host) = std::env::var("REDIS_HOST") {
            builder = builder.host(host);
        }

        if let Ok(port) = std::env::var("REDIS_PORT")
            && let Ok(port) = port.trim().parse()
        {
            builder = builder.port(port);
        }

        if let Ok(username) = std::env::var("REDIS_USER") {
            builder = builder.username(username);
        }

        if let Ok(password) = std::env::var("REDIS_PASSWORD") {
            builder = builder.password(password);
        }

        if let Ok(db) = std::env::var("REDIS_DB")
            && let Ok(db) = db.trim().parse()
        {
            builder = builder.db(db);
        }

        if let Ok(prefix) = std::env::var("REDIS_KEY_PREFIX") {
            builder = builder.key_prefix(prefix);
        }

        if let Ok(data_type) = std::env::var("REDIS_DATA_TYPE") {
            builder = builder.data_type(data_type);
        }

        if std::env::var("REDIS_TLS").is_ok() {
            builder = builder.tls(true);
        }

        if let Ok(nodes) = std::env::var("REDIS_CLUSTER_NODES") {
            builder = builder.cluster(parse_node_list(&nodes));
        }

        if let Ok(nodes) = std::env::var("REDIS_SENTINEL_NODES") {
            let name = std::env::var("REDIS_NAME").unwrap_or_else(|_| "mymaster".to_string());
            builder = builder.sentinel(name, parse_node_list(&nodes));
        }

        builder
    }

    /// First non-empty of `password`, `auth_pass` and `pass`.
    pub fn resolved_password(&self) -> Option<&str> {
        [&self.password, &self.auth_pass, &self.pass]
            .into_iter()
            .filter_map(|p| p.as_deref())
            .find(|p| !p.is_empty())
    }

    /// First non-empty of `path` and a string-valued `socket`.
    pub fn resolved_path(&self) -> Option<&str> {
        let legacy = match &self.socket {
            Some(SocketField::Path(path)) => Some(path.as_str()),
            _ => None,
        };
        [self.path.as_deref(), legacy]
            .into_iter()
            .flatten()
            .find(|p| !p.is_empty())
    }

    /// Resolve aliases and choose the topology.
    pub fn normalize(mut self) -> StoreResult<NormalizedOptions> {
        for key in NON_DATA_KEYS {
            if self.passthrough.remove(key).is_some() {
                debug!(option = key, "ignoring non-callable option");
            }
        }

        if let Some(password) = self.resolved_password().map(str::to_string) {
            self.password = Some(password);
        }
        if let Some(path) = self.resolved_path().map(str::to_string) {
            self.path = Some(path);
        }

        let key_prefix = self.key_prefix.clone().unwrap_or_default();
        let data_type = self
            .data_type
            .as_deref()
            .map(DataType::parse)
            .unwrap_or_default();
        let db = self.db;
        let codec = Codec::new(self.serialize.take(), self.unserialize.take());
        let topology = Topology::select(self)?;

        debug!(
            topology = topology.name(),
            data_type = %data_type,
            key_prefix = %key_prefix,
            "normalized store options"
        );

        Ok(NormalizedOptions {
            key_prefix,
            data_type,
            db,
            topology,
            codec,
        })
    }
}

fn parse_node_list(nodes: &str) -> Vec<NodeAddress> {
    nodes
        .split(',')
        .map(str::trim)
        .filter(|node| !node.is_empty())
        .filter_map(|node| {
            if node.contains("://") {
                return Some(NodeAddress::Url {
                    url: node.to_string(),
                });
            }
            match node.rsplit_once(':') {
                Some((host, port)) => match port.parse() {
                    Ok(port) => Some(NodeAddress::new(host, port)),
                    Err(_) => {
                        warn!(node = %node, "ignoring node with invalid port");
                        None
                    }
                },
                None => Some(NodeAddress::HostPort {
                    host: node.to_string(),
                    port: None,
                }),
            }
        })
        .collect()
}

/// Builder for [`StoreOptions`].
#[derive(Default)]
pub struct StoreOptionsBuilder {
    options: StoreOptions,
    socket: Option<SocketOptions>,
}

impl StoreOptionsBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a pre-built client.
    pub fn client(mut self, client: Arc<dyn StoreClient>) -> Self {
        self.options.client = Some(client);
        self
    }

    /// Duplicate the pre-built client instead of using it directly.
    pub fn duplicate(mut self, enabled: bool) -> Self {
        self.options.duplicate = enabled;
        self
    }

    /// Set the logical database index.
    pub fn db(mut self, db: i64) -> Self {
        self.options.db = Some(db);
        self
    }

    /// Set the key prefix.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.options.key_prefix = Some(prefix.into());
        self
    }

    /// Set the data type selector (`"string"` or `"ReJSON"`).
    pub fn data_type(mut self, data_type: impl Into<String>) -> Self {
        self.options.data_type = Some(data_type.into());
        self
    }

    /// Set the username (Redis 6+ ACL).
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.options.username = Some(username.into());
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.options.password = Some(password.into());
        self
    }

    /// Set the connection URL (split into its parts).
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.options.url = Some(url.into());
        self
    }

    /// Set a connection URL used verbatim.
    pub fn redis_url(mut self, url: impl Into<String>) -> Self {
        self.options.redis_url = Some(url.into());
        self
    }

    /// Set the unix socket path.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.options.path = Some(path.into());
        self
    }

    /// Set the host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.socket_options().host = Some(host.into());
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.socket_options().port = Some(port);
        self
    }

    /// Enable TLS.
    pub fn tls(mut self, enabled: bool) -> Self {
        self.socket_options().tls = enabled;
        self
    }

    /// Use a sentinel-backed replica set.
    pub fn sentinel(mut self, name: impl Into<String>, root_nodes: Vec<NodeAddress>) -> Self {
        self.options.is_redis_replset = true;
        self.options.name = Some(name.into());
        self.options.sentinel_root_nodes = Some(root_nodes);
        self
    }

    /// Set the sentinel node role.
    pub fn role(mut self, role: SentinelRole) -> Self {
        self.options.role = role;
        self
    }

    /// Set credentials for the sentinels.
    pub fn sentinel_client_options(mut self, options: NodeClientOptions) -> Self {
        self.options.sentinel_client_options = Some(options);
        self
    }

    /// Set credentials for the data nodes behind the sentinels.
    pub fn node_client_options(mut self, options: NodeClientOptions) -> Self {
        self.options.node_client_options = Some(options);
        self
    }

    /// Use a cluster.
    pub fn cluster(mut self, root_nodes: Vec<NodeAddress>) -> Self {
        self.options.is_redis_cluster = true;
        self.options.cluster_options = Some(ClusterOptions {
            root_nodes,
            ..self.options.cluster_options.take().unwrap_or_default()
        });
        self
    }

    /// Set cluster node defaults.
    pub fn cluster_defaults(mut self, defaults: NodeClientOptions) -> Self {
        let cluster = self.options.cluster_options.get_or_insert_with(ClusterOptions::default);
        cluster.defaults = Some(defaults);
        self
    }

    /// Set a custom encoder.
    pub fn serialize(mut self, serialize: SerializeFn) -> Self {
        self.options.serialize = Some(serialize);
        self
    }

    /// Set a custom decoder.
    pub fn unserialize(mut self, unserialize: UnserializeFn) -> Self {
        self.options.unserialize = Some(unserialize);
        self
    }

    /// Set a passthrough option.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.passthrough.insert(key.into(), value.into());
        self
    }

    /// Build the options.
    pub fn build(self) -> StoreOptions {
        let mut options = self.options;
        if let Some(socket) = self.socket {
            options.socket = Some(SocketField::Options(socket));
        }
        options
    }

    fn socket_options(&mut self) -> &mut SocketOptions {
        self.socket.get_or_insert_with(SocketOptions::default)
    }
}

//! Topology selection and client construction.

use percent_encoding::percent_decode_str;
use redstore_client::{
    ClientKind, ClientOverrides, ClientTarget, ClusterConfig, ConnectionSettings,
    RedisClient, SentinelConfig, SocketOptions, StandaloneConfig, StoreClient,
};
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::error::{StoreError, StoreResult};
use crate::options::{SocketField, StoreOptions};

/// The one topology a store talks to.
#[derive(Clone)]
pub enum Topology {
    /// A single node.
    Standalone(StandaloneConfig),
    /// A replica set behind sentinels.
    Sentinel(SentinelConfig),
    /// A sharded cluster.
    Cluster(ClusterConfig),
    /// A caller-supplied client, used directly or duplicated.
    External {
        /// The supplied client.
        client: Arc<dyn StoreClient>,
        /// Overrides for the duplicate; `None` uses `client` itself.
        duplicate: Option<ClientOverrides>,
    },
}

impl fmt::Debug for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standalone(config) => f.debug_tuple("Standalone").field(config).finish(),
            Self::Sentinel(config) => f.debug_tuple("Sentinel").field(config).finish(),
            Self::Cluster(config) => f.debug_tuple("Cluster").field(config).finish(),
            Self::External { client, duplicate } => f
                .debug_struct("External")
                .field("kind", &client.kind())
                .field("duplicate", duplicate)
                .finish(),
        }
    }
}

/// A constructed client and what the store may do with it.
pub struct Initialized {
    /// The client.
    pub client: Arc<dyn StoreClient>,
    /// Construction path, when the store built the client itself.
    pub kind: Option<ClientKind>,
    /// Whether the store opens the connection (false for a supplied client).
    pub owned: bool,
}

impl Topology {
    /// Choose a topology. First match wins:
    ///
    /// 1. no client and `isRedisCluster`: cluster
    /// 2. no client, `sentinelRootNodes` and `isRedisReplset`: sentinel
    /// 3. no client: standalone
    /// 4. client and `duplicate`: a duplicate of the client
    /// 5. client: the client itself
    pub fn select(options: StoreOptions) -> StoreResult<Self> {
        let settings = ConnectionSettings::from_passthrough(&options.passthrough);
        let password = options.resolved_password().map(str::to_string);

        let Some(client) = options.client.clone() else {
            if options.is_redis_cluster {
                return Ok(Self::Cluster(cluster_config(options, password, settings)));
            }
            if options.sentinel_root_nodes.is_some() && options.is_redis_replset {
                return Ok(Self::Sentinel(sentinel_config(options, password, settings)));
            }
            return standalone_config(options, password, settings).map(Self::Standalone);
        };

        if !options.duplicate {
            return Ok(Self::External {
                client,
                duplicate: None,
            });
        }

        let overrides = ClientOverrides {
            database: options.db,
            username: options.username.clone(),
            password,
            settings: (!options.passthrough.is_empty()).then_some(settings),
        };
        Ok(Self::External {
            client,
            duplicate: Some(overrides),
        })
    }

    /// Short name of the topology.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Standalone(_) => "standalone",
            Self::Sentinel(_) => "sentinel",
            Self::Cluster(_) => "cluster",
            Self::External {
                duplicate: Some(_), ..
            } => "duplicate",
            Self::External { .. } => "external",
        }
    }

    /// Construct the client. Nothing is connected yet.
    pub fn initialize(self) -> StoreResult<Initialized> {
        let target = match self {
            Self::Standalone(config) => {
                debug!("Initializing standalone Redis");
                ClientTarget::Standalone(config)
            }
            Self::Sentinel(config) => {
                debug!(
                    master = %config.master_name,
                    "Initializing Redis replica set with sentinels"
                );
                ClientTarget::Sentinel(config)
            }
            Self::Cluster(config) => {
                debug!(nodes = config.root_nodes.len(), "Initializing Redis cluster");
                ClientTarget::Cluster(config)
            }
            Self::External {
                client,
                duplicate: Some(overrides),
            } => {
                debug!("Duplicating provided client with new options");
                return Ok(Initialized {
                    client: client.duplicate(&overrides)?,
                    kind: None,
                    owned: true,
                });
            }
            Self::External {
                client,
                duplicate: None,
            } => {
                debug!("Using provided client");
                return Ok(Initialized {
                    client,
                    kind: None,
                    owned: false,
                });
            }
        };

        let kind = target.kind();
        Ok(Initialized {
            client: Arc::new(RedisClient::new(target)),
            kind: Some(kind),
            owned: true,
        })
    }
}

fn cluster_config(
    options: StoreOptions,
    password: Option<String>,
    settings: ConnectionSettings,
) -> ClusterConfig {
    let cluster = options.cluster_options.unwrap_or_default();
    let root_nodes = if cluster.root_nodes.is_empty() {
        options.root_nodes
    } else {
        cluster.root_nodes
    };
    let defaults = cluster
        .defaults
        .or(options.defaults)
        .unwrap_or_default()
        .or_credentials(options.username.as_deref(), password.as_deref());

    ClusterConfig {
        root_nodes,
        defaults,
        settings,
    }
}

fn sentinel_config(
    options: StoreOptions,
    password: Option<String>,
    settings: ConnectionSettings,
) -> SentinelConfig {
    let node_client = options
        .node_client_options
        .unwrap_or_default()
        .or_credentials(options.username.as_deref(), password.as_deref());

    SentinelConfig {
        master_name: options.name.unwrap_or_default(),
        role: options.role,
        root_nodes: options.sentinel_root_nodes.unwrap_or_default(),
        sentinel_client: options.sentinel_client_options.unwrap_or_default(),
        node_client,
        database: options.db,
        settings,
    }
}

fn standalone_config(
    options: StoreOptions,
    password: Option<String>,
    settings: ConnectionSettings,
) -> StoreResult<StandaloneConfig> {
    let path = options.resolved_path().map(str::to_string);
    let mut socket = match options.socket {
        Some(SocketField::Options(socket)) => socket,
        _ => SocketOptions::default(),
    };
    socket.path = path;

    let mut config = StandaloneConfig {
        redis_url: options.redis_url.filter(|url| !url.is_empty()),
        socket,
        username: options.username,
        password,
        database: options.db,
        settings,
    };

    if config.redis_url.is_none()
        && let Some(raw) = options.url.as_deref().filter(|url| !url.is_empty())
    {
        merge_url(&mut config, raw)?;
    }

    Ok(config)
}

// url parts override the discrete options; the path only fills a missing db
fn merge_url(config: &mut StandaloneConfig, raw: &str) -> StoreResult<()> {
    let url = Url::parse(raw).map_err(|e| StoreError::Config(format!("invalid url: {}", e)))?;

    if let Some(host) = url.host_str() {
        config.socket.host = Some(host.trim_matches(['[', ']']).to_string());
    }
    if let Some(port) = url.port() {
        config.socket.port = Some(port);
    }
    if url.scheme() == "rediss" {
        config.socket.tls = true;
    }
    if !url.username().is_empty() {
        config.username = Some(decode(url.username())?);
    }
    if let Some(password) = url.password() {
        config.password = Some(decode(password)?);
    }
    if config.database.is_none() {
        config.database = url
            .path()
            .trim_start_matches('/')
            .parse()
            .ok();
    }
    Ok(())
}

fn decode(component: &str) -> StoreResult<String> {
    percent_decode_str(component)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|e| StoreError::Config(format!("invalid url credentials: {}", e)))
}

//! # redstore-client
//!
//! The store-client capability used by `redstore` sessions, plus its
//! implementations.
//!
//! ## Features
//!
//! - **Standalone**: a single node by URL, host/port or unix socket
//! - **Sentinel**: replica sets discovered through `SENTINEL` queries, with
//!   re-resolution when the connection drops
//! - **Cluster**: sharded clusters through the async cluster connection
//! - **In-memory**: [`MemoryClient`] for tests and local development
//! - **Lifecycle events**: `connect`, `ready`, `error`, `close`,
//!   `reconnecting` and `end` over a broadcast channel
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use redstore_client::{ClientTarget, RedisClient, StandaloneConfig, StoreClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = StandaloneConfig {
//!         redis_url: Some("redis://localhost:6379/1".to_string()),
//!         ..Default::default()
//!     };
//!
//!     let client = RedisClient::new(ClientTarget::Standalone(config));
//!     let mut events = client.subscribe();
//!
//!     client.connect().await?;
//!     client.set("key", "value", Some(60)).await?;
//!     println!("{:?}", client.get("key").await?);
//!
//!     while let Ok(event) = events.try_recv() {
//!         println!("event: {}", event.name());
//!     }
//!
//!     client.quit().await?;
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod error;
mod memory;
mod redis_client;
mod sentinel;

pub use client::{ClientEvent, ClientKind, ClientState, StoreClient};
pub use config::{
    ClientOverrides, ClusterConfig, ConnectionSettings, NodeAddress, NodeClientOptions,
    SentinelConfig, SentinelRole, SocketOptions, StandaloneConfig, lenient,
};
pub use error::{ClientError, ClientResult};
pub use memory::{MemoryClient, Shutdown};
pub use redis_client::{ClientTarget, RedisClient};

// Re-export redis crate for convenience
pub use redis;

/// Prelude for common imports.
///
/// ```
/// use redstore_client::prelude::*;
/// ```
pub mod prelude {
    pub use crate::client::{ClientEvent, ClientKind, StoreClient};
    pub use crate::config::{
        ClientOverrides, ClusterConfig, NodeAddress, SentinelConfig, StandaloneConfig,
    };
    pub use crate::error::{ClientError, ClientResult};
    pub use crate::memory::MemoryClient;
    pub use crate::redis_client::{ClientTarget, RedisClient};
}

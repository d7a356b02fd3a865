//! # redstore
//!
//! Redis-backed session store for standalone nodes, sentinel-guarded replica
//! sets and clusters, with optional RedisJSON document storage.
//!
//! ## Features
//!
//! - **Topologies**: standalone (URL, host/port, unix socket), sentinel and
//!   cluster, or a caller-supplied client used directly or duplicated
//! - **Legacy options**: `auth_pass`/`pass` password aliases, `socket` path
//!   alias, flat camelCase option mapping with passthrough keys
//! - **Pluggable codec**: JSON by default, custom encode/decode functions
//! - **Native documents**: `dataType: "ReJSON"` stores sessions with
//!   `JSON.SET` when the server has the module, falling back to strings
//! - **Lifecycle events**: `connect`, `ready`, `error`, `close`,
//!   `reconnecting`, `end` and `disconnect` on a broadcast channel
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use redstore::{RedisStore, StoreOptions};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = RedisStore::connect(
//!         StoreOptions::builder()
//!             .url("redis://localhost:6379")
//!             .db(1)
//!             .key_prefix("app:sess:")
//!             .build(),
//!     )
//!     .await?;
//!
//!     store.set("s1", &json!({"a": 1}), Some(Duration::from_secs(86400))).await?;
//!     assert_eq!(store.get("s1").await?, Some(json!({"a": 1})));
//!     assert!(store.ttl("s1").await? > 0);
//!     assert_eq!(store.destroy("s1").await?, 1);
//!
//!     store.quit().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Sentinel
//!
//! ```rust,no_run
//! use redstore::{RedisStore, StoreOptions};
//! use serde_json::json;
//!
//! # async fn example() -> redstore::StoreResult<()> {
//! let options = StoreOptions::from_json(json!({
//!     "isRedisReplset": true,
//!     "name": "mymaster",
//!     "sentinelRootNodes": [
//!         {"host": "10.0.0.1", "port": 26379},
//!         {"host": "10.0.0.2", "port": 26379}
//!     ],
//!     "nodeClientOptions": {"password": "node-secret"},
//!     "dataType": "ReJSON"
//! }))?;
//!
//! let store = RedisStore::connect(options).await?;
//! println!("documents: {}", store.uses_native_documents());
//! # Ok(())
//! # }
//! ```

mod codec;
mod error;
mod lifecycle;
mod options;
mod store;
mod topology;
mod traits;

pub use codec::{Codec, CodecError, SerializeFn, UnserializeFn};
pub use error::{StoreError, StoreResult};
pub use lifecycle::{Status, StoreEvent, parse_modules};
pub use options::{
    ClusterOptions, DataType, NormalizedOptions, SocketField, StoreOptions, StoreOptionsBuilder,
};
pub use store::RedisStore;
pub use topology::{Initialized, Topology};
pub use traits::{SessionStore, generate_session_id};

// Re-export the client crate for convenience
pub use redstore_client;
pub use redstore_client::{
    ClientError, ClientKind, MemoryClient, NodeAddress, NodeClientOptions, SentinelRole,
    StoreClient,
};

/// Prelude for common imports.
///
/// ```
/// use redstore::prelude::*;
/// ```
pub mod prelude {
    pub use crate::codec::Codec;
    pub use crate::error::{StoreError, StoreResult};
    pub use crate::lifecycle::{Status, StoreEvent};
    pub use crate::options::{DataType, StoreOptions};
    pub use crate::store::RedisStore;
    pub use crate::traits::{SessionStore, generate_session_id};
    pub use redstore_client::{ClientKind, MemoryClient, StoreClient};
}

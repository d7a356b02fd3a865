//! Integration tests for the session store over the in-memory client.

use redstore::{
    ClientKind, MemoryClient, RedisStore, SerializeFn, SessionStore, Status, StoreClient,
    StoreError, StoreEvent, StoreOptions, Topology, UnserializeFn,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

async fn connected_client() -> Arc<MemoryClient> {
    let client = Arc::new(MemoryClient::new());
    client.connect().await.unwrap();
    client
}

async fn store_over(client: Arc<MemoryClient>) -> RedisStore {
    RedisStore::connect(StoreOptions::builder().client(client).build())
        .await
        .unwrap()
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

fn names(rx: &mut tokio::sync::broadcast::Receiver<StoreEvent>) -> Vec<&'static str> {
    let mut names = Vec::new();
    while let Ok(event) = rx.try_recv() {
        names.push(event.name());
    }
    names
}

// =============================================================================
// Session Operations
// =============================================================================

#[tokio::test]
async fn test_set_then_get_roundtrips() {
    let store = store_over(connected_client().await).await;

    store.set("s1", &json!({"a": 1}), None).await.unwrap();
    assert_eq!(store.get("s1").await.unwrap(), Some(json!({"a": 1})));

    let nested = json!({"user": {"id": 7, "roles": ["admin"]}, "cart": [], "flag": true});
    store.set("s1b", &nested, None).await.unwrap();
    assert_eq!(store.get("s1b").await.unwrap(), Some(nested));
}

#[tokio::test]
async fn test_missing_session_is_none() {
    let store = store_over(connected_client().await).await;
    assert_eq!(store.get("nobody").await.unwrap(), None);
    assert_eq!(store.ttl("nobody").await.unwrap(), -2);
}

#[tokio::test]
async fn test_ttl_after_set() {
    let store = store_over(connected_client().await).await;

    store
        .set("s2", &json!({"a": 2}), Some(Duration::from_secs(86400)))
        .await
        .unwrap();
    let ttl = store.ttl("s2").await.unwrap();
    assert!(ttl > 0 && ttl <= 86400, "ttl was {}", ttl);

    store.set("s2b", &json!({"a": 2}), None).await.unwrap();
    assert_eq!(store.ttl("s2b").await.unwrap(), -1);
}

#[tokio::test]
async fn test_fractional_ttl_rounds_up() {
    let store = store_over(connected_client().await).await;

    store
        .set("frac", &json!(1), Some(Duration::from_millis(1200)))
        .await
        .unwrap();
    assert_eq!(store.ttl("frac").await.unwrap(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_session_expires() {
    let store = store_over(connected_client().await).await;

    store
        .set("s3", &json!({"a": 3}), Some(Duration::from_secs(1)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(store.ttl("s3").await.unwrap(), -2);
    assert_eq!(store.get("s3").await.unwrap(), None);
}

#[tokio::test]
async fn test_string_that_looks_like_bad_json_roundtrips() {
    let store = store_over(connected_client().await).await;

    store.set("bad", &json!("{ not json }"), None).await.unwrap();
    assert_eq!(store.get("bad").await.unwrap(), Some(json!("{ not json }")));
}

#[tokio::test]
async fn test_undecodable_value_degrades_to_none() {
    let client = connected_client().await;
    let store = store_over(client.clone()).await;

    client.insert_raw("corrupt", "{ not json }");
    assert_eq!(store.get("corrupt").await.unwrap(), None);

    // still usable afterwards
    assert_eq!(store.ping().await.unwrap(), "PONG");
    store.set("after", &json!({"ok": true}), None).await.unwrap();
    assert_eq!(store.get("after").await.unwrap(), Some(json!({"ok": true})));
}

#[tokio::test]
async fn test_destroy_counts_removed_keys() {
    let store = store_over(connected_client().await).await;

    store.set("s1", &json!({"a": 1}), None).await.unwrap();
    assert_eq!(store.destroy("s1").await.unwrap(), 1);
    assert_eq!(store.destroy("s1").await.unwrap(), 0);
}

#[tokio::test]
async fn test_key_prefix_is_applied_and_hidden() {
    let client = connected_client().await;
    let store = RedisStore::connect(
        StoreOptions::builder()
            .client(client.clone())
            .key_prefix("app:sess:")
            .build(),
    )
    .await
    .unwrap();

    store.set("abc", &json!({"a": 1}), None).await.unwrap();
    assert_eq!(
        client.get("app:sess:abc").await.unwrap(),
        Some(r#"{"a":1}"#.to_string())
    );
    assert_eq!(client.get("abc").await.unwrap(), None);
    assert_eq!(store.get("abc").await.unwrap(), Some(json!({"a": 1})));
    assert_eq!(store.key_prefix(), "app:sess:");
}

#[tokio::test]
async fn test_custom_codec() {
    let serialize: SerializeFn = Arc::new(|value| Ok(format!("v1|{}", value)));
    let unserialize: UnserializeFn = Arc::new(|text| {
        let body = text
            .strip_prefix("v1|")
            .ok_or_else(|| redstore::CodecError::new("unversioned"))?;
        Ok(serde_json::from_str(body)?)
    });

    let client = connected_client().await;
    let store = RedisStore::connect(
        StoreOptions::builder()
            .client(client.clone())
            .serialize(serialize)
            .unserialize(unserialize)
            .build(),
    )
    .await
    .unwrap();

    store.set("c", &json!([1, 2]), None).await.unwrap();
    assert_eq!(client.get("c").await.unwrap(), Some("v1|[1,2]".to_string()));
    assert_eq!(store.get("c").await.unwrap(), Some(json!([1, 2])));
}

// =============================================================================
// Native Documents
// =============================================================================

#[tokio::test]
async fn test_documents_when_module_present() {
    let client = Arc::new(MemoryClient::new().with_modules(["ReJSON", "search"]));
    client.connect().await.unwrap();

    let store = RedisStore::connect(
        StoreOptions::builder()
            .client(client.clone())
            .data_type("ReJSON")
            .build(),
    )
    .await
    .unwrap();

    assert!(store.uses_native_documents());
    assert_eq!(store.mods().await.unwrap(), vec!["ReJSON", "search"]);

    let doc = json!({"cookie": {"maxAge": 1000}, "user": "alice"});
    store
        .set("doc", &doc, Some(Duration::from_secs(60)))
        .await
        .unwrap();

    assert_eq!(client.json_get("doc").await.unwrap(), Some(doc.clone()));
    assert_eq!(store.get("doc").await.unwrap(), Some(doc));
    let ttl = store.ttl("doc").await.unwrap();
    assert!(ttl > 0 && ttl <= 60);

    store.set("forever", &json!({"n": 1}), None).await.unwrap();
    assert_eq!(store.ttl("forever").await.unwrap(), -1);
}

#[tokio::test]
async fn test_documents_fall_back_without_module() {
    let client = connected_client().await;
    let store = RedisStore::connect(
        StoreOptions::builder()
            .client(client.clone())
            .data_type("ReJSON")
            .build(),
    )
    .await
    .unwrap();

    assert!(!store.uses_native_documents());
    assert!(store.mods().await.unwrap().is_empty());

    store.set("s", &json!({"a": 1}), None).await.unwrap();
    assert_eq!(client.get("s").await.unwrap(), Some(r#"{"a":1}"#.to_string()));
}

#[tokio::test]
async fn test_string_mode_ignores_module() {
    let client = Arc::new(MemoryClient::new().with_modules(["ReJSON"]));
    client.connect().await.unwrap();
    let store = store_over(client.clone()).await;

    assert!(!store.uses_native_documents());
    store.set("s", &json!({"a": 1}), None).await.unwrap();
    assert!(client.get("s").await.unwrap().is_some());
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_events_relayed_from_init_to_quit() {
    let base: Arc<dyn StoreClient> = Arc::new(MemoryClient::new());
    let store = RedisStore::new(
        StoreOptions::builder()
            .client(base.clone())
            .duplicate(true)
            .build(),
    );
    let mut events = store.subscribe();

    store.init().await.unwrap();
    assert!(store.is_open());
    assert!(store.is_ready());
    assert!(store.connected());
    assert_eq!(store.status(), Status::Open);
    assert!(!base.is_open(), "the supplied client is left alone");

    store.quit().await.unwrap();
    settle().await;

    assert_eq!(
        names(&mut events),
        vec!["connect", "ready", "close", "end", "disconnect"]
    );
    assert_eq!(store.status(), Status::Waiting);
}

#[tokio::test]
async fn test_duplicate_uses_configured_db() {
    let base = connected_client().await;
    base.set("shared", "db0", None).await.unwrap();

    let store = RedisStore::connect(
        StoreOptions::builder()
            .client(base.clone())
            .duplicate(true)
            .db(2)
            .build(),
    )
    .await
    .unwrap();

    assert_eq!(store.kind(), None);
    store.set("shared", &json!("db2"), None).await.unwrap();
    assert_eq!(base.get("shared").await.unwrap(), Some("db0".to_string()));
    assert_eq!(base.database(), 0);
}

#[tokio::test]
async fn test_configured_db_selected_before_init_returns() {
    let client = connected_client().await;
    let store = RedisStore::connect(
        StoreOptions::builder()
            .client(client.clone())
            .db(5)
            .build(),
    )
    .await
    .unwrap();

    // no yield between init and the first command
    assert_eq!(client.database(), 5);
    store.set("s1", &json!({"a": 1}), None).await.unwrap();
    client.select(0).await.unwrap();
    assert_eq!(client.get("s1").await.unwrap(), None);
}

#[tokio::test]
async fn test_db_reselected_on_reconnect() {
    let client = connected_client().await;
    let store = RedisStore::connect(
        StoreOptions::builder()
            .client(client.clone())
            .db(3)
            .build(),
    )
    .await
    .unwrap();
    assert_eq!(client.database(), 3);

    let mut events = store.subscribe();

    // a fresh connection starts on db 0
    client.select(0).await.unwrap();
    client.simulate_reconnect();
    settle().await;

    assert_eq!(client.database(), 3);
    assert_eq!(
        names(&mut events),
        vec!["error", "reconnecting", "connect", "ready"]
    );
}

#[tokio::test]
async fn test_connect_failure_is_returned() {
    let base: Arc<dyn StoreClient> = Arc::new(MemoryClient::unreachable());
    let store = RedisStore::new(
        StoreOptions::builder()
            .client(base)
            .duplicate(true)
            .build(),
    );

    let err = store.init().await.unwrap_err();
    assert!(matches!(err, StoreError::Client(_)));
    assert!(err.is_connection_error());
    assert!(matches!(store.get("s").await, Err(StoreError::NotInitialized)));
}

#[tokio::test]
async fn test_init_twice_fails() {
    let store = store_over(connected_client().await).await;
    assert!(matches!(
        store.init().await,
        Err(StoreError::AlreadyInitialized)
    ));
}

#[tokio::test]
async fn test_supplied_client_quits_plainly() {
    let client = connected_client().await;
    let store = store_over(client.clone()).await;
    store.quit().await.unwrap();
    assert_eq!(client.shutdown(), Some(redstore::redstore_client::Shutdown::Quit));
    assert!(!store.is_open());
}

// =============================================================================
// Topology Selection
// =============================================================================

#[test]
fn test_cluster_flag_beats_sentinel_nodes() {
    let options = StoreOptions::from_json(json!({
        "isRedisCluster": true,
        "isRedisReplset": true,
        "name": "mymaster",
        "sentinelRootNodes": [{"host": "127.0.0.1", "port": 26379}],
        "rootNodes": [{"host": "127.0.0.1", "port": 7000}]
    }))
    .unwrap();

    let normalized = options.normalize().unwrap();
    assert!(matches!(normalized.topology, Topology::Cluster(_)));
}

#[test]
fn test_sentinel_chosen_with_flag_and_nodes() {
    let options = StoreOptions::from_json(json!({
        "isRedisReplset": true,
        "name": "mymaster",
        "sentinelRootNodes": [{"host": "127.0.0.1", "port": 26379}]
    }))
    .unwrap();

    let initialized = options.normalize().unwrap().topology.initialize().unwrap();
    assert_eq!(initialized.kind, Some(ClientKind::Sentinel));
    assert!(!initialized.client.is_open());
}

// =============================================================================
// Session Store Trait
// =============================================================================

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Cart {
    items: Vec<String>,
    total: u32,
}

#[tokio::test]
async fn test_typed_helpers() {
    let store = store_over(connected_client().await).await;
    let sid = redstore::generate_session_id();

    let cart = Cart {
        items: vec!["book".to_string()],
        total: 12,
    };
    store
        .set_as(&sid, &cart, Some(Duration::from_secs(30)))
        .await
        .unwrap();

    let loaded: Option<Cart> = store.get_as(&sid).await.unwrap();
    assert_eq!(loaded, Some(cart));
    assert!(store.exists(&sid).await.unwrap());

    SessionStore::set(&store, "other", &json!("not a cart"), None)
        .await
        .unwrap();
    let loaded: Option<Cart> = store.get_as("other").await.unwrap();
    assert_eq!(loaded, None);
    assert!(!store.exists("missing").await.unwrap());
}

// =============================================================================
// Live Redis
// =============================================================================

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_live_roundtrip() {
    let store = RedisStore::connect(
        StoreOptions::from_env()
            .key_prefix("redstore:test:")
            .build(),
    )
    .await
    .unwrap();

    assert_eq!(store.ping().await.unwrap(), "PONG");
    store
        .set("s2", &json!({"a": 2}), Some(Duration::from_secs(86400)))
        .await
        .unwrap();
    let ttl = store.ttl("s2").await.unwrap();
    assert!(ttl > 0 && ttl <= 86400);
    assert_eq!(store.get("s2").await.unwrap(), Some(json!({"a": 2})));
    assert_eq!(store.destroy("s2").await.unwrap(), 1);
    assert_eq!(store.destroy("s2").await.unwrap(), 0);
    store.quit().await.unwrap();
}

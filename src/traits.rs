//! Session store trait definition.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

use crate::error::StoreResult;

/// Storage contract used by session middleware.
///
/// Session ids are passed without the key prefix; implementations add it.
///
/// # Examples
///
/// ```no_run
/// use redstore::{RedisStore, SessionStore, StoreOptions, generate_session_id};
/// use serde::{Deserialize, Serialize};
/// use std::time::Duration;
///
/// #[derive(Serialize, Deserialize)]
/// struct Cart {
///     items: Vec<String>,
/// }
///
/// # async fn example() -> redstore::StoreResult<()> {
/// let store = RedisStore::connect(StoreOptions::from_env().build()).await?;
///
/// let sid = generate_session_id();
/// let cart = Cart { items: vec!["book".into()] };
/// store.set_as(&sid, &cart, Some(Duration::from_secs(1800))).await?;
///
/// let cart: Option<Cart> = store.get_as(&sid).await?;
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Get a session value. `Ok(None)` if missing or undecodable.
    async fn get(&self, sid: &str) -> StoreResult<Option<Value>>;

    /// Store a session value with an optional TTL.
    async fn set(&self, sid: &str, value: &Value, ttl: Option<Duration>) -> StoreResult<()>;

    /// Remaining lifetime in seconds (`-1` without expiry, `-2` when missing).
    async fn ttl(&self, sid: &str) -> StoreResult<i64>;

    /// Delete a session, returning the number of keys removed.
    async fn destroy(&self, sid: &str) -> StoreResult<u64>;

    // ========== Convenience Methods ==========

    /// Get a session and deserialize it into `T`.
    ///
    /// A stored value that does not fit `T` is logged and treated as missing.
    async fn get_as<T: DeserializeOwned>(&self, sid: &str) -> StoreResult<Option<T>> {
        match self.get(sid).await? {
            Some(value) => match serde_json::from_value(value) {
                Ok(typed) => Ok(Some(typed)),
                Err(err) => {
                    warn!(sid = %sid, error = %err, "session does not match requested type");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Serialize `value` and store it.
    async fn set_as<T: Serialize + Sync>(
        &self,
        sid: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        let value = serde_json::to_value(value)?;
        self.set(sid, &value, ttl).await
    }

    /// Whether a session exists.
    async fn exists(&self, sid: &str) -> StoreResult<bool> {
        Ok(self.ttl(sid).await? != -2)
    }
}

/// Generate a random session id.
pub fn generate_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_session_id() {
        let id1 = generate_session_id();
        let id2 = generate_session_id();

        assert_ne!(id1, id2);
        assert_eq!(id1.len(), 36);
    }
}

//! Session payload encoding.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Custom encoder: session value to stored text.
pub type SerializeFn = Arc<dyn Fn(&Value) -> Result<String, CodecError> + Send + Sync>;

/// Custom decoder: stored text to session value.
pub type UnserializeFn = Arc<dyn Fn(&str) -> Result<Value, CodecError> + Send + Sync>;

/// Encoding or decoding failure.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct CodecError(String);

impl CodecError {
    /// Create an error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        Self(err.to_string())
    }
}

/// Encode/decode pair for session values. JSON unless overridden.
///
/// # Examples
///
/// ```
/// use redstore::Codec;
/// use serde_json::json;
///
/// let codec = Codec::default();
/// let text = codec.encode(&json!({"a": 1})).unwrap();
/// assert_eq!(codec.decode(&text), Some(json!({"a": 1})));
/// assert_eq!(codec.decode("{ not json }"), None);
/// ```
#[derive(Clone, Default)]
pub struct Codec {
    serialize: Option<SerializeFn>,
    unserialize: Option<UnserializeFn>,
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codec")
            .field("custom_serialize", &self.serialize.is_some())
            .field("custom_unserialize", &self.unserialize.is_some())
            .finish()
    }
}

impl Codec {
    /// Build a codec, falling back to JSON for each missing function.
    pub fn new(serialize: Option<SerializeFn>, unserialize: Option<UnserializeFn>) -> Self {
        Self {
            serialize,
            unserialize,
        }
    }

    /// Encode a session value.
    pub fn encode(&self, value: &Value) -> Result<String, CodecError> {
        match &self.serialize {
            Some(serialize) => serialize(value),
            None => Ok(serde_json::to_string(value)?),
        }
    }

    /// Decode stored text. Failures are logged and yield `None`.
    pub fn decode(&self, text: &str) -> Option<Value> {
        let decoded = match &self.unserialize {
            Some(unserialize) => unserialize(text),
            None => serde_json::from_str(text).map_err(CodecError::from),
        };

        match decoded {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(error = %err, "parse session error");
                None
            }
        }
    }
}

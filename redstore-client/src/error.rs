//! Store-client error types.

use thiserror::Error;

/// Result type for store-client operations.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Store-client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection could not be established or was lost.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The backing store rejected a command.
    #[error("Command error: {0}")]
    Command(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// No sentinel could resolve the requested node.
    #[error("Sentinel error: {0}")]
    Sentinel(String),

    /// Operation timed out.
    #[error("Operation timed out")]
    Timeout,

    /// A command was issued before `connect` or after `quit`/`close`.
    #[error("Client is not connected")]
    NotConnected,

    /// Document payload could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Underlying Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl ClientError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Timeout | Self::NotConnected => true,
            Self::Redis(err) => is_connection_failure(err),
            _ => false,
        }
    }

    /// Check if this error indicates connection loss.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Sentinel(_) => true,
            Self::Redis(err) => is_connection_failure(err),
            _ => false,
        }
    }
}

impl From<url::ParseError> for ClientError {
    fn from(err: url::ParseError) -> Self {
        Self::Config(format!("invalid url: {}", err))
    }
}

pub(crate) fn is_connection_failure(err: &redis::RedisError) -> bool {
    err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ClientError::Timeout.is_retryable());
        assert!(ClientError::NotConnected.is_retryable());
        assert!(!ClientError::Command("WRONGTYPE".into()).is_retryable());
        assert!(ClientError::Sentinel("down".into()).is_connection_error());
        assert!(!ClientError::Config("bad".into()).is_connection_error());
    }

    #[test]
    fn test_url_error_is_config() {
        let err: ClientError = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, ClientError::Config(_)));
    }
}

//! Error types for session store operations.

use redstore_client::ClientError;
use thiserror::Error;

/// Result type for session store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Session store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Error from the backing-store client
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    /// Session value could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An operation was called before `init`
    #[error("Store is not initialized")]
    NotInitialized,

    /// `init` was called twice
    #[error("Store is already initialized")]
    AlreadyInitialized,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Check if this error indicates connection loss.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Client(err) if err.is_connection_error())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

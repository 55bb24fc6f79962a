//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Settlement of {message_id} failed: {source}")]
    SettleFailed {
        message_id: String,
        #[source]
        source: redis::RedisError,
    },

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn publish_failed(msg: impl Into<String>) -> Self {
        Self::PublishFailed(msg.into())
    }

    /// True when the failure lies with the connection rather than the request.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::ConnectionFailed(_) | Self::NotConnected(_) => true,
            Self::Redis(e) | Self::SettleFailed { source: e, .. } => is_connection_level(e),
            _ => false,
        }
    }
}

pub(crate) fn is_connection_level(e: &redis::RedisError) -> bool {
    e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
}

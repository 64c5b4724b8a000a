use serde_json::Value;
use thiserror::Error;

use crate::redis::PoolError;

/// One decoded stream entry.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    /// Transport-assigned id, monotonically increasing within the stream
    pub id: String,
    /// JSON payload of the entry's `data` field
    pub data: Value,
}

/// Where a consumer starts reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamCursor {
    /// Only entries appended after `start` (no replay)
    Live,
    /// Entries strictly after the given id
    From(String),
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Stream consumer is already running")]
    AlreadyRunning,

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Redis pool error: {0}")]
    Pool(#[from] PoolError),
}

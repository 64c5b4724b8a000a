//! Ordered, batched delivery of stream entries to a handler.
//!
//! A [`StreamConsumer`] is bound to one [`BatchHandler`] for its lifetime.
//! Batches are delivered strictly one after another; the next read only
//! starts once `handle_batch` returned. Delivery is at-least-once.
//!
//! Backends:
//! - `RedisStreamConsumer`: `XREAD BLOCK` on a Redis stream (default)
//! - `MemoryStreamConsumer`: append-only in-process log
//!
//! The supervisor creates a fresh consumer for every lock-holding cycle
//! through a [`StreamConsumerFactory`].

mod memory_backend;
mod redis_backend;
mod types;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::StreamConfig;
use crate::redis::RedisPool;

pub use memory_backend::{MemoryStream, MemoryStreamConsumer, MemoryStreamConsumerFactory};
pub use redis_backend::{RedisStreamConsumer, RedisStreamConsumerFactory};
pub use types::{StreamCursor, StreamError, StreamEvent};

/// Receives batches in stream order. Must not let failures escape: whatever
/// goes wrong inside a batch is logged and the consumer moves on.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn handle_batch(&self, events: Vec<StreamEvent>);
}

#[async_trait]
pub trait StreamConsumer: Send + Sync {
    /// Begin delivering entries after `cursor`. Returns once reading started.
    async fn start(&self, cursor: StreamCursor) -> Result<(), StreamError>;

    /// False before `start`, after `shutdown`, and once the consumer stopped itself.
    fn running(&self) -> bool;

    /// Stop reading and wait until the in-progress batch (if any) completed.
    async fn shutdown(&self);
}

pub trait StreamConsumerFactory: Send + Sync {
    fn backend(&self) -> &'static str;

    fn create(&self, handler: Arc<dyn BatchHandler>) -> Arc<dyn StreamConsumer>;
}

/// Clears the running flag when the read task exits, panics included.
pub(crate) struct RunningGuard {
    running: Arc<AtomicBool>,
}

impl RunningGuard {
    pub(crate) fn new(running: Arc<AtomicBool>) -> Self {
        Self { running }
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Create a stream consumer factory based on configuration.
///
/// - `"redis"`: reads `stream.name` through a dedicated connection per consumer
/// - `"memory"`: a fresh in-process stream (local development)
pub fn create_stream_factory(
    config: &StreamConfig,
    redis_pool: Option<Arc<RedisPool>>,
) -> Arc<dyn StreamConsumerFactory> {
    match (config.backend.as_str(), redis_pool) {
        ("redis", Some(pool)) => {
            tracing::info!(
                backend = "redis",
                stream = %config.name,
                batch_size = config.batch_size,
                "Creating Redis stream consumer factory"
            );
            Arc::new(RedisStreamConsumerFactory::new(pool.client(), config.clone()))
        }
        ("redis", None) => {
            tracing::warn!(
                "Redis stream backend requested but no pool provided, falling back to memory"
            );
            Arc::new(MemoryStreamConsumerFactory::new(
                Arc::new(MemoryStream::new()),
                config.batch_size,
            ))
        }
        (backend, _) => {
            tracing::info!(backend = %backend, "Creating memory stream consumer factory");
            Arc::new(MemoryStreamConsumerFactory::new(
                Arc::new(MemoryStream::new()),
                config.batch_size,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_guard_clears_flag() {
        let running = Arc::new(AtomicBool::new(true));
        {
            let _guard = RunningGuard::new(Arc::clone(&running));
        }
        assert!(!running.load(Ordering::Acquire));
    }

    #[test]
    fn test_factory_memory_backend() {
        let config = StreamConfig {
            backend: "memory".to_string(),
            ..Default::default()
        };
        assert_eq!(create_stream_factory(&config, None).backend(), "memory");
    }
}

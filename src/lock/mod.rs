//! Named mutual-exclusion lock shared by every publisher instance.
//!
//! Backends:
//! - `RedisLockCoordinator`: `SET NX PX` with owner-checked release (default)
//! - `MemoryLockCoordinator`: process-local, for single-node runs and tests
//!
//! Every lease carries a TTL so a crashed holder cannot wedge the fleet. The
//! holder keeps it alive with [`LockCoordinator::extend`].

mod memory;
mod redis_backend;
mod types;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::PublisherConfig;
use crate::redis::RedisPool;

pub use memory::MemoryLockCoordinator;
pub use redis_backend::RedisLockCoordinator;
pub use types::{LockError, LockHandle};

#[async_trait]
pub trait LockCoordinator: Send + Sync {
    fn backend(&self) -> &'static str;

    /// Single attempt; `LockError::Held` when someone else owns `key`.
    async fn acquire(&self, key: &str) -> Result<LockHandle, LockError>;

    /// Refresh the lease TTL. `LockError::Lost` once the key is no longer ours.
    async fn extend(&self, handle: &LockHandle) -> Result<(), LockError>;

    /// Give the lock up. Safe to call more than once.
    async fn release(&self, handle: &LockHandle) -> Result<(), LockError>;
}

/// Create a lock coordinator based on configuration.
pub fn create_lock_coordinator(
    config: &PublisherConfig,
    redis_pool: Option<Arc<RedisPool>>,
) -> Arc<dyn LockCoordinator> {
    match (config.lock_backend.as_str(), redis_pool) {
        ("redis", Some(pool)) => {
            tracing::info!(
                backend = "redis",
                key = %config.lock_key,
                ttl_ms = config.lock_ttl_ms,
                "Creating Redis lock coordinator"
            );
            Arc::new(RedisLockCoordinator::new(pool, config.lock_ttl()))
        }
        ("redis", None) => {
            tracing::warn!(
                "Redis lock backend requested but no pool provided, falling back to memory"
            );
            Arc::new(MemoryLockCoordinator::new(config.lock_ttl()))
        }
        (backend, _) => {
            tracing::info!(backend = %backend, "Creating memory lock coordinator");
            Arc::new(MemoryLockCoordinator::new(config.lock_ttl()))
        }
    }
}

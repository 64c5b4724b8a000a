//! Redis connectivity for the publisher.
//!
//! The lock coordinator, the Redis catalog source and the stream consumer all
//! talk to the same Redis deployment. This module provides:
//!
//! - `CircuitBreaker`: stops hammering Redis while it is unavailable
//! - `ExponentialBackoff`: reconnection delays for the stream reader
//! - `RedisHealth`: connection health for the status surface
//! - `pool`: shared multiplexed connection for command traffic

mod backoff;
mod circuit_breaker;
mod health;
pub mod pool;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use health::{RedisHealth, RedisHealthStatus};
pub use pool::{PoolError, RedisPool};

/// Get current time in milliseconds since epoch
pub(crate) fn current_time_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

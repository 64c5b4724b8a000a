//! Shared Redis connection for command traffic.
//!
//! Lock acquisition, lock extension and catalog reads go through one
//! multiplexed connection guarded by the circuit breaker. Blocking stream
//! reads must not share it: `XREAD BLOCK` would stall every other command on
//! the pipeline, so the stream consumer opens its own connection from
//! [`RedisPool::client`].

use std::sync::Arc;

use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError, RedisResult};
use tokio::sync::RwLock;

use crate::config::RedisConfig;

use super::{CircuitBreaker, CircuitState, RedisHealth};

/// Error type for Redis pool operations.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("Circuit breaker is open")]
    CircuitOpen,
}

pub struct RedisPool {
    client: Client,
    connection: RwLock<Option<MultiplexedConnection>>,
    circuit_breaker: Arc<CircuitBreaker>,
    health: Arc<RedisHealth>,
    config: RedisConfig,
}

impl RedisPool {
    pub fn new(
        config: RedisConfig,
        circuit_breaker: Arc<CircuitBreaker>,
        health: Arc<RedisHealth>,
    ) -> Result<Self, PoolError> {
        let client = Client::open(config.url.as_str())?;

        Ok(Self {
            client,
            connection: RwLock::new(None),
            circuit_breaker,
            health,
            config,
        })
    }

    /// Client for opening dedicated connections (blocking stream reads).
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub fn health(&self) -> &Arc<RedisHealth> {
        &self.health
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    /// Get the shared connection, connecting lazily.
    pub async fn get_connection(&self) -> Result<MultiplexedConnection, PoolError> {
        if !self.circuit_breaker.allow_request() {
            self.health.set_circuit_open();
            return Err(PoolError::CircuitOpen);
        }

        {
            let conn = self.connection.read().await;
            if let Some(ref c) = *conn {
                return Ok(c.clone());
            }
        }

        self.connect().await
    }

    async fn connect(&self) -> Result<MultiplexedConnection, PoolError> {
        let mut conn_guard = self.connection.write().await;

        // Another task may have connected while we waited for the write lock
        if let Some(ref c) = *conn_guard {
            return Ok(c.clone());
        }

        self.health.set_reconnecting();

        match self.client.get_multiplexed_tokio_connection().await {
            Ok(conn) => {
                *conn_guard = Some(conn.clone());
                self.circuit_breaker.record_success();
                self.health.set_connected();
                tracing::info!(url = %self.url(), "Redis pool connection established");
                Ok(conn)
            }
            Err(e) => {
                self.circuit_breaker.record_failure();
                tracing::error!(error = %e, "Failed to connect to Redis");
                Err(PoolError::Redis(e))
            }
        }
    }

    /// Run a command with circuit breaker bookkeeping.
    ///
    /// Connection-level failures drop the cached connection so the next call
    /// reconnects.
    pub async fn execute<F, T, Fut>(&self, f: F) -> Result<T, PoolError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: std::future::Future<Output = RedisResult<T>>,
    {
        let conn = self.get_connection().await?;

        match f(conn).await {
            Ok(result) => {
                self.circuit_breaker.record_success();
                Ok(result)
            }
            Err(e) => {
                if e.is_connection_dropped() || e.is_io_error() {
                    let mut conn_guard = self.connection.write().await;
                    *conn_guard = None;
                    self.health.set_reconnecting();
                }
                self.circuit_breaker.record_failure();
                Err(PoolError::Redis(e))
            }
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.health.is_healthy() && self.circuit_breaker.state() == CircuitState::Closed
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    pub async fn ping(&self) -> Result<(), PoolError> {
        self.execute(|mut conn| async move {
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_creation_is_lazy() {
        let config = RedisConfig::default();
        let pool = RedisPool::new(
            config,
            Arc::new(CircuitBreaker::new()),
            Arc::new(RedisHealth::new()),
        )
        .unwrap();

        assert_eq!(pool.url(), "redis://localhost:6379");
        // Nothing connected yet
        assert!(!pool.is_healthy());
    }

    #[test]
    fn test_invalid_url_rejected() {
        let config = RedisConfig {
            url: "not a url".to_string(),
            ..Default::default()
        };
        let result = RedisPool::new(
            config,
            Arc::new(CircuitBreaker::new()),
            Arc::new(RedisHealth::new()),
        );
        assert!(matches!(result, Err(PoolError::Redis(_))));
    }

    #[tokio::test]
    async fn test_open_circuit_short_circuits() {
        let cb = Arc::new(CircuitBreaker::new());
        for _ in 0..5 {
            cb.record_failure();
        }
        let pool = RedisPool::new(RedisConfig::default(), cb, Arc::new(RedisHealth::new())).unwrap();

        let result = pool.get_connection().await;
        assert!(matches!(result, Err(PoolError::CircuitOpen)));
        assert_eq!(
            pool.health().status(),
            crate::redis::RedisHealthStatus::CircuitOpen
        );
    }
}

//! Coordinated shutdown of the publisher.
//!
//! 1. Stop the supervisor (consumer stopped, lock released)
//! 2. Wait for in-flight dispatch rounds, bounded by the drain timeout
//! 3. Close the PostgreSQL pool

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use crate::notification::PublisherHandler;
use crate::postgres::PostgresPool;
use crate::publisher::PublisherSupervisor;

#[derive(Debug, Clone, Default)]
pub struct ShutdownResult {
    pub supervisor_stopped: bool,
    pub dispatch_drained: bool,
    pub abandoned_rounds: usize,
    pub duration: Duration,
}

pub struct GracefulShutdown {
    supervisor: Arc<PublisherSupervisor>,
    handler: Arc<PublisherHandler>,
    postgres_pool: Option<PostgresPool>,
    drain_timeout: Duration,
}

impl GracefulShutdown {
    pub fn new(
        supervisor: Arc<PublisherSupervisor>,
        handler: Arc<PublisherHandler>,
        postgres_pool: Option<PostgresPool>,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            supervisor,
            handler,
            postgres_pool,
            drain_timeout,
        }
    }

    #[tracing::instrument(name = "graceful_shutdown", skip(self))]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = std::time::Instant::now();
        let mut result = ShutdownResult::default();

        tracing::info!(reason = %reason, "Starting graceful shutdown - Phase 1: Stopping publisher");
        self.supervisor.shutdown().await;
        result.supervisor_stopped = true;

        tracing::info!(
            in_flight = self.handler.in_flight(),
            "Phase 2: Draining dispatch rounds"
        );
        match timeout(self.drain_timeout, self.handler.wait_idle()).await {
            Ok(()) => result.dispatch_drained = true,
            Err(_) => {
                result.abandoned_rounds = self.handler.in_flight();
                tracing::warn!(
                    timeout_secs = self.drain_timeout.as_secs(),
                    "Dispatch drain timed out, remaining rounds abandoned"
                );
            }
        }

        if let Some(ref pool) = self.postgres_pool {
            tracing::info!("Phase 3: Closing PostgreSQL pool");
            pool.close().await;
        }

        result.duration = start.elapsed();
        tracing::info!(
            dispatch_drained = result.dispatch_drained,
            duration_ms = result.duration.as_millis(),
            "Graceful shutdown completed"
        );

        result
    }
}

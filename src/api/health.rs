//! Health and publisher status endpoints.

use axum::{extract::State, http::Uri, Json};
use serde::Serialize;

use crate::error::AppError;
use crate::notification::DispatcherStatsSnapshot;
use crate::publisher::PublisherStatus;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisHealthResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postgres: Option<PostgresHealthResponse>,
    pub publisher: PublisherStatus,
    pub dispatch: DispatcherStatsSnapshot,
}

#[derive(Debug, Serialize)]
pub struct RedisHealthResponse {
    pub status: String,
    pub connected: bool,
    pub circuit_breaker_state: String,
    pub reconnections: u32,
}

#[derive(Debug, Serialize)]
pub struct PostgresHealthResponse {
    pub connected: bool,
    pub pool_size: u32,
    pub idle_connections: u32,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let redis = state.redis_pool.as_ref().map(|pool| RedisHealthResponse {
        status: pool.health().status().as_str().to_string(),
        connected: pool.is_healthy(),
        circuit_breaker_state: pool.circuit_breaker().state().as_str().to_string(),
        reconnections: pool.health().reconnections(),
    });

    let postgres = state.postgres_pool.as_ref().map(|pool| PostgresHealthResponse {
        connected: pool.is_available(),
        pool_size: pool.pool().size(),
        idle_connections: pool.pool().num_idle() as u32,
    });

    let degraded = redis.as_ref().is_some_and(|r| !r.connected)
        || postgres.as_ref().is_some_and(|p| !p.connected);

    Json(HealthResponse {
        status: if degraded { "degraded" } else { "healthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        state: state.supervisor.state().as_str().to_string(),
        redis,
        postgres,
        publisher: state.supervisor.status(),
        dispatch: state.dispatcher.stats(),
    })
}

/// GET /status
pub async fn publisher_status(State(state): State<AppState>) -> Json<PublisherStatus> {
    Json(state.supervisor.status())
}

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub redis: bool,
    pub postgres: bool,
}

/// GET /health/ready - fails with 503 while a configured backend is unreachable
pub async fn ready(State(state): State<AppState>) -> Result<Json<ReadyResponse>, AppError> {
    if let Some(ref pool) = state.redis_pool {
        pool.ping().await?;
    }
    if let Some(ref pool) = state.postgres_pool {
        sqlx::query("SELECT 1").execute(pool.pool()).await?;
    }

    Ok(Json(ReadyResponse {
        ready: true,
        redis: state.redis_pool.is_some(),
        postgres: state.postgres_pool.is_some(),
    }))
}

pub async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(format!("No route for {}", uri.path()))
}

use axum::{routing::get, Router};

use crate::server::AppState;

use super::health::{health, not_found, publisher_status, ready};
use super::metrics::prometheus_metrics;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready))
        .route("/status", get(publisher_status))
        .route("/metrics", get(prometheus_metrics))
        .fallback(not_found)
}

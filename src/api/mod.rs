//! HTTP status surface.

mod health;
mod metrics;
mod routes;

pub use health::{health, not_found, publisher_status, ready, HealthResponse, ReadyResponse};
pub use metrics::prometheus_metrics;
pub use routes::api_routes;

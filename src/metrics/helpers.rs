//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    CATALOG_BUILDS_TOTAL, DISPATCH_IN_FLIGHT, DISPATCH_LATENCY, DISPATCH_TOTAL,
    LOCK_ACQUISITIONS_TOTAL, LOCK_LOST_TOTAL, PUBLISHER_RUNNING, REDIS_CIRCUIT_BREAKER_STATE,
    REDIS_CONNECTION_STATUS, REDIS_RECONNECTIONS_TOTAL, RUNNING_CYCLE_DURATION,
    STREAM_BATCH_SIZE, STREAM_EVENTS_TOTAL, STREAM_READ_ERRORS_TOTAL, STREAM_SKIPPED_TOTAL,
};
use crate::redis::{CircuitState, RedisPool};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Lock and supervisor metrics
pub struct LockMetrics;

impl LockMetrics {
    pub fn record_acquired() {
        LOCK_ACQUISITIONS_TOTAL.with_label_values(&["acquired"]).inc();
    }

    /// Another instance holds the lock
    pub fn record_held() {
        LOCK_ACQUISITIONS_TOTAL.with_label_values(&["held"]).inc();
    }

    pub fn record_error() {
        LOCK_ACQUISITIONS_TOTAL.with_label_values(&["error"]).inc();
    }

    pub fn record_lost() {
        LOCK_LOST_TOTAL.inc();
    }

    pub fn set_running(running: bool) {
        PUBLISHER_RUNNING.set(if running { 1 } else { 0 });
    }

    pub fn record_cycle(duration_secs: f64) {
        RUNNING_CYCLE_DURATION.observe(duration_secs);
    }
}

/// Stream consumption metrics
pub struct StreamMetrics;

impl StreamMetrics {
    pub fn record_batch(size: usize) {
        STREAM_EVENTS_TOTAL.inc_by(size as u64);
        STREAM_BATCH_SIZE.observe(size as f64);
    }

    /// Record a skipped event or batch (`unknown_trigger`, `catalog_error`, ...)
    pub fn record_skipped(reason: &str) {
        STREAM_SKIPPED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn record_read_error() {
        STREAM_READ_ERRORS_TOTAL.inc();
    }

    pub fn record_reconnect() {
        REDIS_RECONNECTIONS_TOTAL.inc();
    }
}

pub struct CatalogMetrics;

impl CatalogMetrics {
    pub fn record_build(ok: bool) {
        let result = if ok { "ok" } else { "error" };
        CATALOG_BUILDS_TOTAL.with_label_values(&[result]).inc();
    }
}

/// Outcome dispatch metrics
pub struct DispatchMetrics;

impl DispatchMetrics {
    pub fn record(outcome_type: &str, success: bool, latency_secs: f64) {
        let result = if success { "success" } else { "failure" };
        DISPATCH_TOTAL
            .with_label_values(&[outcome_type, result])
            .inc();
        DISPATCH_LATENCY
            .with_label_values(&[outcome_type])
            .observe(latency_secs);
    }

    pub fn round_started() {
        DISPATCH_IN_FLIGHT.inc();
    }

    pub fn round_finished() {
        DISPATCH_IN_FLIGHT.dec();
    }
}

/// Redis health gauges, refreshed on scrape
pub struct RedisMetrics;

impl RedisMetrics {
    pub fn update(pool: &RedisPool) {
        REDIS_CONNECTION_STATUS.set(if pool.health().is_healthy() { 1 } else { 0 });
        let state = match pool.circuit_breaker().state() {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        };
        REDIS_CIRCUIT_BREAKER_STATE.set(state);
    }
}

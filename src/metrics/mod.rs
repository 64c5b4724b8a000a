//! Prometheus metrics for the notification publisher.
//!
//! - Lock metrics (acquisition attempts, lost leases, running gauge)
//! - Stream metrics (events received, batches, handler skips)
//! - Dispatch metrics (per outcome type and result, latency)
//! - Redis health metrics

mod helpers;

pub use helpers::{encode_metrics, CatalogMetrics, DispatchMetrics, LockMetrics, RedisMetrics, StreamMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "publisher";

lazy_static! {
    // ============================================================================
    // Lock / Supervisor Metrics
    // ============================================================================

    /// Lock acquisition attempts by result (acquired, held, error)
    pub static ref LOCK_ACQUISITIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_lock_acquisitions_total", METRIC_PREFIX),
        "Publisher lock acquisition attempts",
        &["result"]
    ).unwrap();

    /// Leases lost while running
    pub static ref LOCK_LOST_TOTAL: IntCounter = register_int_counter!(
        format!("{}_lock_lost_total", METRIC_PREFIX),
        "Publisher lock leases lost while running"
    ).unwrap();

    /// Whether this instance is the active publisher (1 = running)
    pub static ref PUBLISHER_RUNNING: IntGauge = register_int_gauge!(
        format!("{}_running", METRIC_PREFIX),
        "Whether this instance is currently the active publisher"
    ).unwrap();

    /// Time spent holding the lock per cycle
    pub static ref RUNNING_CYCLE_DURATION: Histogram = register_histogram!(
        format!("{}_running_cycle_duration_seconds", METRIC_PREFIX),
        "Duration of a lock-holding publisher cycle in seconds",
        vec![1.0, 10.0, 60.0, 300.0, 1800.0, 3600.0, 21600.0, 86400.0]
    ).unwrap();

    // ============================================================================
    // Stream Metrics
    // ============================================================================

    /// Stream events delivered to the handler
    pub static ref STREAM_EVENTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_stream_events_total", METRIC_PREFIX),
        "Total stream events delivered to the handler"
    ).unwrap();

    /// Events per batch
    pub static ref STREAM_BATCH_SIZE: Histogram = register_histogram!(
        format!("{}_stream_batch_size", METRIC_PREFIX),
        "Number of events per stream batch",
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 200.0, 500.0]
    ).unwrap();

    /// Events or batches skipped by the handler, by reason
    pub static ref STREAM_SKIPPED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_stream_skipped_total", METRIC_PREFIX),
        "Events or batches skipped by the handler",
        &["reason"]
    ).unwrap();

    /// Stream read failures
    pub static ref STREAM_READ_ERRORS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_stream_read_errors_total", METRIC_PREFIX),
        "Total stream read failures"
    ).unwrap();

    // ============================================================================
    // Catalog Metrics
    // ============================================================================

    /// Catalog builds by result (ok, error)
    pub static ref CATALOG_BUILDS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_catalog_builds_total", METRIC_PREFIX),
        "Catalog builds",
        &["result"]
    ).unwrap();

    // ============================================================================
    // Dispatch Metrics
    // ============================================================================

    /// Outcome dispatches by outcome type and result
    pub static ref DISPATCH_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_dispatch_total", METRIC_PREFIX),
        "Outcome dispatches",
        &["outcome_type", "result"]
    ).unwrap();

    /// Outcome dispatch latency by outcome type
    pub static ref DISPATCH_LATENCY: HistogramVec = register_histogram_vec!(
        format!("{}_dispatch_latency_seconds", METRIC_PREFIX),
        "Outcome dispatch latency in seconds",
        &["outcome_type"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    /// Dispatch rounds currently in flight
    pub static ref DISPATCH_IN_FLIGHT: IntGauge = register_int_gauge!(
        format!("{}_dispatch_in_flight", METRIC_PREFIX),
        "Dispatch rounds currently in flight"
    ).unwrap();

    // ============================================================================
    // Redis Metrics
    // ============================================================================

    /// Redis connection status (1 = connected, 0 = disconnected)
    pub static ref REDIS_CONNECTION_STATUS: IntGauge = register_int_gauge!(
        format!("{}_redis_connection_status", METRIC_PREFIX),
        "Redis connection status (1=connected, 0=disconnected)"
    ).unwrap();

    /// Redis circuit breaker state (0=closed, 1=open, 2=half-open)
    pub static ref REDIS_CIRCUIT_BREAKER_STATE: IntGauge = register_int_gauge!(
        format!("{}_redis_circuit_breaker_state", METRIC_PREFIX),
        "Redis circuit breaker state (0=closed, 1=open, 2=half-open)"
    ).unwrap();

    /// Stream reader reconnections
    pub static ref REDIS_RECONNECTIONS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_redis_reconnections_total", METRIC_PREFIX),
        "Total Redis reconnection attempts by the stream reader"
    ).unwrap();
}

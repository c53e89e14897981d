//! Prometheus metrics for tapedeck.
//!
//! Tracks how requests were served, tunnels opened, upstream latency and
//! tape saves. Rendered in text format by [`collect_metrics`].
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram, CounterVec, Encoder, Histogram, TextEncoder,
};
use tracing::error;

lazy_static! {
    /// Requests by outcome: replay|record|forward|rejected|<error kind>
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "tapedeck_requests_total",
        "Total number of requests handled by the proxy",
        &["outcome"]
    )
    .unwrap();

    /// CONNECT tunnels by kind: intercepted|direct|chained
    pub static ref TUNNELS_TOTAL: CounterVec = register_counter_vec!(
        "tapedeck_tunnels_total",
        "Total number of CONNECT tunnels opened",
        &["kind"]
    )
    .unwrap();

    /// Upstream exchange duration, including reading the response body
    pub static ref UPSTREAM_DURATION_MS: Histogram = register_histogram!(
        "tapedeck_upstream_duration_ms",
        "Histogram of upstream request time in milliseconds",
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]
    )
    .unwrap();

    /// Tape saves by result: written|clean|error
    pub static ref TAPE_SAVES_TOTAL: CounterVec = register_counter_vec!(
        "tapedeck_tape_saves_total",
        "Total number of tape save attempts",
        &["result"]
    )
    .unwrap();
}

/// Collect and return all metrics in Prometheus text format
pub fn collect_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

pub fn record_request(outcome: &str) {
    REQUESTS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_tunnel(kind: &str) {
    TUNNELS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_upstream_duration(duration_ms: f64) {
    UPSTREAM_DURATION_MS.observe(duration_ms);
}

pub fn record_tape_save(result: &str) {
    TAPE_SAVES_TOTAL.with_label_values(&[result]).inc();
}

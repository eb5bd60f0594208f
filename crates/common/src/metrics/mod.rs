//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all Pressroom metrics
pub const METRICS_PREFIX: &str = "pressroom";

/// Histogram buckets for request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.00,
];

/// Buckets for rasterization, which runs for seconds on large documents
pub const RASTERIZE_BUCKETS: &[f64] = &[
    0.250, 0.500, 1.000, 2.500, 5.000, 10.00, 20.00, 30.00, 60.00, 120.0,
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    describe_counter!(
        format!("{}_papers_created_total", METRICS_PREFIX),
        Unit::Count,
        "Editions created"
    );

    describe_counter!(
        format!("{}_pages_rendered_total", METRICS_PREFIX),
        Unit::Count,
        "Page images produced by rasterization"
    );

    describe_histogram!(
        format!("{}_rasterize_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Rasterization latency in seconds"
    );

    describe_counter!(
        format!("{}_rasterize_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Degraded ingestion steps, labelled by stage"
    );

    describe_counter!(
        format!("{}_page_replacements_total", METRICS_PREFIX),
        Unit::Count,
        "Single page images replaced"
    );

    describe_counter!(
        format!("{}_clippings_created_total", METRICS_PREFIX),
        Unit::Count,
        "Clippings created"
    );

    describe_counter!(
        format!("{}_sequence_allocations_total", METRICS_PREFIX),
        Unit::Count,
        "Sequence values issued, labelled by outcome"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Record an edition creation with however many pages rendered
pub fn record_paper_created(tenant_id: &str, pages: usize) {
    counter!(
        format!("{}_papers_created_total", METRICS_PREFIX),
        "tenant" => tenant_id.to_string()
    )
    .increment(1);

    counter!(format!("{}_pages_rendered_total", METRICS_PREFIX)).increment(pages as u64);
}

/// Record one rasterization call
pub fn record_rasterize(duration_secs: f64, engine: &str, success: bool) {
    let status = if success { "success" } else { "error" };
    histogram!(
        format!("{}_rasterize_duration_seconds", METRICS_PREFIX),
        "engine" => engine.to_string(),
        "status" => status
    )
    .record(duration_secs);
}

/// Record a degraded ingestion step (page_count, rasterize, timeout, store)
pub fn record_rasterize_failure(stage: &str) {
    counter!(
        format!("{}_rasterize_failures_total", METRICS_PREFIX),
        "stage" => stage.to_string()
    )
    .increment(1);
}

pub fn record_page_replaced() {
    counter!(format!("{}_page_replacements_total", METRICS_PREFIX)).increment(1);
}

pub fn record_clipping_created(anonymous: bool) {
    counter!(
        format!("{}_clippings_created_total", METRICS_PREFIX),
        "anonymous" => anonymous.to_string()
    )
    .increment(1);
}

pub fn record_sequence_allocation(namespace: &str, success: bool) {
    let outcome = if success { "issued" } else { "failed" };
    counter!(
        format!("{}_sequence_allocations_total", METRICS_PREFIX),
        "namespace" => namespace.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

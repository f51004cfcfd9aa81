//! Prometheus metrics for the catalog gateway
//!
//! This module is only compiled when the `metrics` feature is enabled.
//!
//! Exposed metrics:
//! - `http_requests_total` - Counter for total HTTP requests
//! - `http_request_duration_seconds` - Histogram for request latencies
//! - `gateway_listings_total` - Counter for listings by entity type and outcome
//! - `gateway_redactions_total` - Counter for per-item redaction outcomes

use crate::redactor::RedactionOutcome;
use axum::{
    extract::{MatchedPath, Request},
    http::StatusCode,
    middleware::Next,
    response::IntoResponse,
};
use catalog_gateway_core::EntityType;
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use std::time::Instant;

lazy_static! {
    /// Counter for total HTTP requests by method, path, and status
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    /// Histogram for HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request latency in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    /// Listings by entity type and status (ok, rejected, cancelled, error)
    pub static ref GATEWAY_LISTINGS_TOTAL: CounterVec = register_counter_vec!(
        "gateway_listings_total",
        "Total number of entity listings",
        &["entity_type", "status"]
    )
    .unwrap();

    /// Redaction outcome of every returned item
    pub static ref GATEWAY_REDACTIONS_TOTAL: CounterVec = register_counter_vec!(
        "gateway_redactions_total",
        "Total number of redacted items by outcome",
        &["outcome"]
    )
    .unwrap();
}

/// Axum middleware to track HTTP request metrics
pub async fn track_metrics(req: Request, next: Next) -> impl IntoResponse {
    let start = Instant::now();
    let method = req.method().to_string();
    // Matched route, so cursors and query strings never become label values
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[&method, &path])
        .observe(duration);

    response
}

/// Handler for the `/metrics` endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", encoder.format_type())],
            buffer,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}

pub fn record_listing(entity_type: EntityType, status: &str) {
    GATEWAY_LISTINGS_TOTAL
        .with_label_values(&[entity_type.as_str(), status])
        .inc();
}

pub fn record_redaction(outcome: RedactionOutcome) {
    GATEWAY_REDACTIONS_TOTAL
        .with_label_values(&[outcome.as_str()])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_counters() {
        let before = GATEWAY_REDACTIONS_TOTAL
            .with_label_values(&["redacted"])
            .get();
        record_redaction(RedactionOutcome::Redacted);
        let after = GATEWAY_REDACTIONS_TOTAL
            .with_label_values(&["redacted"])
            .get();
        assert!(after >= before + 1.0);

        record_listing(EntityType::Table, "ok");
        assert!(
            GATEWAY_LISTINGS_TOTAL
                .with_label_values(&["table", "ok"])
                .get()
                >= 1.0
        );
    }
}

//! Prometheus metrics for monitoring the gateway.
//!
//! Metrics are registered once in the default registry. They are exposed by
//! [`metrics_handler`] on a dedicated listener so the gateway's own path
//! space stays untouched.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};
use std::sync::OnceLock;

/// Container for all application metrics.
pub struct Metrics {
    /// Total number of requests by method, route and status
    pub request_count: IntCounterVec,

    /// Request duration histogram in seconds (time to response headers)
    pub request_duration: HistogramVec,

    /// Number of requests currently being handled
    pub active_requests: IntGauge,

    /// Upstream response latency (time to response headers) by route
    pub upstream_latency: HistogramVec,

    /// Upstream failures by route and kind (`transport` or `status`)
    pub upstream_errors: IntCounterVec,

    /// Upstream key selections by key fingerprint
    pub key_selections: IntCounterVec,

    /// Rejected authentication attempts by reason
    pub auth_failures: IntCounterVec,

    /// Streams the client abandoned before the upstream finished
    pub client_disconnects_total: IntCounter,

    /// Streams cut short by an upstream body error
    pub stream_failures_total: IntCounter,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Initialize the metrics registry.
///
/// Subsequent calls return the same instance.
///
/// # Panics
///
/// Panics if a metric with the same name was already registered in the
/// default registry by someone else.
pub fn init_metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let request_count = register_int_counter_vec!(
            "gemini_gateway_requests_total",
            "Total number of requests",
            &["method", "route", "status_code"]
        )
        .expect("Failed to register request_count metric");

        let request_duration = register_histogram_vec!(
            "gemini_gateway_request_duration_seconds",
            "Request duration in seconds",
            &["method", "route"],
            vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]
        )
        .expect("Failed to register request_duration metric");

        let active_requests = register_int_gauge!(
            "gemini_gateway_active_requests",
            "Number of active requests"
        )
        .expect("Failed to register active_requests metric");

        let upstream_latency = register_histogram_vec!(
            "gemini_gateway_upstream_latency_seconds",
            "Upstream response latency in seconds",
            &["route"],
            vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]
        )
        .expect("Failed to register upstream_latency metric");

        let upstream_errors = register_int_counter_vec!(
            "gemini_gateway_upstream_errors_total",
            "Upstream failures",
            &["route", "kind"]
        )
        .expect("Failed to register upstream_errors metric");

        let key_selections = register_int_counter_vec!(
            "gemini_gateway_key_selections_total",
            "Upstream key selections by key fingerprint",
            &["key"]
        )
        .expect("Failed to register key_selections metric");

        let auth_failures = register_int_counter_vec!(
            "gemini_gateway_auth_failures_total",
            "Rejected authentication attempts",
            &["reason"]
        )
        .expect("Failed to register auth_failures metric");

        let client_disconnects_total = register_int_counter!(
            "gemini_gateway_client_disconnects_total",
            "Streams abandoned by the client before completion"
        )
        .expect("Failed to register client_disconnects_total metric");

        let stream_failures_total = register_int_counter!(
            "gemini_gateway_stream_failures_total",
            "Streams cut short by an upstream body error"
        )
        .expect("Failed to register stream_failures_total metric");

        Metrics {
            request_count,
            request_duration,
            active_requests,
            upstream_latency,
            upstream_errors,
            key_selections,
            auth_failures,
            client_disconnects_total,
            stream_failures_total,
        }
    })
}

/// Get the global metrics instance, initializing it on first use.
pub fn get_metrics() -> &'static Metrics {
    init_metrics()
}

/// Prometheus text exposition endpoint.
pub async fn metrics_handler() -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

//! HTTP middleware for the gateway: request IDs and request metrics.

use crate::core::logging::generate_request_id;
use crate::core::metrics::get_metrics;
use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::Instrument;

/// Response header carrying the request ID.
pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Extension type the gateway attaches to responses naming the route taken.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteName(pub &'static str);

/// Assign a request ID, run the request inside its logging scope and echo it
/// back in the `x-request-id` response header.
///
/// A well-formed inbound `x-request-id` is reused so callers can correlate
/// their own logs.
pub async fn request_id_middleware(request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| is_acceptable_request_id(v))
        .map(str::to_string)
        .unwrap_or_else(generate_request_id);

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    let mut response =
        crate::with_request_context!(request_id.clone(), next.run(request).instrument(span));

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(X_REQUEST_ID.clone(), value);
    }
    response
}

fn is_acceptable_request_id(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 128
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Middleware for tracking request metrics.
pub struct MetricsMiddleware;

impl MetricsMiddleware {
    /// Track active requests, durations and status codes.
    ///
    /// The route label comes from the [`RouteName`] extension set by the
    /// gateway handler. For streamed responses the duration measures time to
    /// response headers, not time to the last byte.
    pub async fn track_metrics(request: Request, next: Next) -> Response {
        let method = request.method().to_string();
        let metrics = get_metrics();

        metrics.active_requests.inc();
        let start = Instant::now();

        let response = next.run(request).await;

        let duration = start.elapsed().as_secs_f64();
        metrics.active_requests.dec();

        let route = response
            .extensions()
            .get::<RouteName>()
            .map(|r| r.0)
            .unwrap_or("unknown");
        let status_code = response.status().as_u16().to_string();

        metrics
            .request_count
            .with_label_values(&[&method, route, &status_code])
            .inc();
        metrics
            .request_duration
            .with_label_values(&[&method, route])
            .observe(duration);

        tracing::info!(
            method = %method,
            route = route,
            status = response.status().as_u16(),
            duration_ms = (duration * 1000.0) as u64,
            "Request completed"
        );

        response
    }
}

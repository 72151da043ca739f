//! Upstream relay.
//!
//! Sends the sanitized request to the upstream and turns its reply into the
//! client response, either buffered or as a live stream depending on the
//! route. Transport failures surface as [`AppError::UpstreamUnreachable`] and
//! are never retried.
//!
//! The request timeout is a per-call [`Deadline`]. A buffered exchange must
//! finish inside it. A streamed exchange only has to produce its response head
//! inside it; the body is then bounded by the client's idle read timeout.

use crate::api::disconnect::DisconnectStream;
use crate::api::routing::Route;
use crate::core::config::AppConfig;
use crate::core::header_policy::{
    error_passthrough_headers, sanitize_response_headers, BodyFraming, EVENT_STREAM,
};
use crate::core::metrics::get_metrics;
use crate::core::{AppError, Result};
use axum::{
    body::{Body, Bytes},
    http::{header::CONTENT_TYPE, HeaderMap, HeaderValue, Method},
    response::Response,
};
use std::error::Error as _;
use std::future::Future;
use std::time::{Duration, Instant};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Point in time by which an upstream exchange must be done.
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    route_label: &'static str,
    at: tokio::time::Instant,
    limit: Duration,
}

impl Deadline {
    pub fn after(route_label: &'static str, limit: Duration) -> Self {
        Self {
            route_label,
            at: tokio::time::Instant::now() + limit,
            limit,
        }
    }

    /// Run `fut`, failing with [`AppError::UpstreamTimeout`] once the deadline passes.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout_at(self.at, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(
                    route = self.route_label,
                    timeout_secs = self.limit.as_secs(),
                    "Upstream request timed out"
                );
                get_metrics()
                    .upstream_errors
                    .with_label_values(&[self.route_label, "timeout"])
                    .inc();
                Err(AppError::UpstreamTimeout(self.limit))
            }
        }
    }
}

/// HTTP client plus upstream base URL, shared by every request.
#[derive(Clone)]
pub struct UpstreamRelay {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl UpstreamRelay {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Start the clock for one upstream exchange.
    pub fn deadline(&self, route_label: &'static str) -> Deadline {
        Deadline::after(route_label, self.request_timeout)
    }

    /// Join the base URL, a path and an optional raw query string.
    pub fn target_url(&self, path: &str, query: Option<&str>) -> String {
        match query {
            Some(q) if !q.is_empty() => format!("{}{}?{}", self.base_url, path, q),
            _ => format!("{}{}", self.base_url, path),
        }
    }

    /// Perform one upstream call and return the response head.
    ///
    /// Waiting for the head counts against `deadline`. `route_label` only
    /// feeds logs and metrics.
    pub async fn send(
        &self,
        route_label: &'static str,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Bytes,
        deadline: &Deadline,
    ) -> Result<reqwest::Response> {
        deadline
            .run(self.send_request(route_label, method, url, headers, body))
            .await
    }

    async fn send_request(
        &self,
        route_label: &'static str,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<reqwest::Response> {
        let start = Instant::now();
        let mut request = self.client.request(method.clone(), url).headers(headers);
        if !body.is_empty() {
            request = request.body(body);
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!(
                route = route_label,
                method = %method,
                url = %url,
                error = %e,
                error_source = ?e.source(),
                is_timeout = e.is_timeout(),
                is_connect = e.is_connect(),
                "HTTP request failed to upstream"
            );
            get_metrics()
                .upstream_errors
                .with_label_values(&[route_label, "transport"])
                .inc();
            AppError::from(e)
        })?;

        let elapsed = start.elapsed();
        get_metrics()
            .upstream_latency
            .with_label_values(&[route_label])
            .observe(elapsed.as_secs_f64());

        if !response.status().is_success() {
            get_metrics()
                .upstream_errors
                .with_label_values(&[route_label, "status"])
                .inc();
        }

        tracing::debug!(
            route = route_label,
            method = %method,
            url = %url,
            status = %response.status(),
            duration_ms = elapsed.as_millis() as u64,
            "HTTP request completed"
        );

        Ok(response)
    }

    /// Forward a native request and relay the reply.
    ///
    /// Streaming routes are relayed with [`stream_response`], everything else
    /// with [`buffer_response`].
    pub async fn forward(
        &self,
        route: &Route,
        path: &str,
        query: Option<&str>,
        method: Method,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<Response> {
        let url = self.target_url(&route.upstream_path(path), query);
        let deadline = self.deadline(route.label());
        let upstream = self
            .send(route.label(), method, &url, headers, body, &deadline)
            .await?;

        if route.is_streaming() {
            stream_response(upstream, &deadline).await
        } else {
            buffer_response(upstream, &deadline).await
        }
    }
}

/// Read the whole upstream body before `deadline` and reply with the upstream status.
pub async fn buffer_response(upstream: reqwest::Response, deadline: &Deadline) -> Result<Response> {
    let status = upstream.status();
    let headers = sanitize_response_headers(upstream.headers(), BodyFraming::Buffered);
    let body = deadline.run(read_body(upstream)).await?;

    build_response(status, headers, Body::from(body))
}

/// Relay an upstream body as it arrives.
///
/// A non-success status is not streamed: the error body is read in full
/// before `deadline` and returned as JSON with the upstream status. On success
/// the upstream 2xx status is kept, the body is typed `text/event-stream` and
/// `deadline` no longer applies.
pub async fn stream_response(upstream: reqwest::Response, deadline: &Deadline) -> Result<Response> {
    let status = upstream.status();

    if !status.is_success() {
        let body = deadline.run(read_body(upstream)).await?;
        tracing::warn!(
            status = status.as_u16(),
            body_len = body.len(),
            "Upstream rejected streaming request"
        );
        return build_response(status, error_passthrough_headers(), Body::from(body));
    }

    let mut headers = sanitize_response_headers(upstream.headers(), BodyFraming::Streamed);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(EVENT_STREAM));

    let stream = DisconnectStream::new(Box::pin(upstream.bytes_stream()));
    build_response(status, headers, Body::from_stream(stream))
}

async fn read_body(upstream: reqwest::Response) -> Result<Bytes> {
    upstream.bytes().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to read upstream response body");
        AppError::from(e)
    })
}

fn build_response(
    status: axum::http::StatusCode,
    headers: HeaderMap,
    body: Body,
) -> Result<Response> {
    let mut response = Response::builder()
        .status(status)
        .body(body)
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))?;
    *response.headers_mut() = headers;
    Ok(response)
}

/// Read an inbound body up to `limit` bytes.
pub async fn read_request_body(body: Body, limit: usize) -> Result<Bytes> {
    axum::body::to_bytes(body, limit).await.map_err(|e| {
        tracing::warn!(error = %e, limit = limit, "Failed to read request body");
        AppError::BadRequest("Request body too large or unreadable".to_string())
    })
}

/// Build the shared upstream HTTP client.
///
/// There is no total timeout on the client: `request_timeout_secs` bounds the
/// gap between reads, so a live stream may run as long as chunks keep coming.
/// Whole-call limits are applied per exchange with [`Deadline`].
pub fn build_http_client(config: &AppConfig) -> anyhow::Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(!config.verify_ssl)
        .connect_timeout(CONNECT_TIMEOUT)
        .read_timeout(Duration::from_secs(config.request_timeout_secs))
        .pool_max_idle_per_host(100)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .build()?;
    Ok(client)
}

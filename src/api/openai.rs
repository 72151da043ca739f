//! Default OpenAI-compatibility handler.
//!
//! The upstream exposes an OpenAI-compatible surface under `/v1beta/openai/`.
//! Requests arriving on `/v1/...` or `/v1beta/openai/...` are mapped there
//! and sent with the selected upstream key as a bearer token.

use crate::api::gateway::RequestHandler;
use crate::api::relay::{buffer_response, read_request_body, stream_response, UpstreamRelay};
use crate::core::header_policy::{build_openai_headers, is_event_stream};
use crate::core::logging::mask_key;
use crate::core::metrics::get_metrics;
use crate::core::{AppError, Result};
use crate::services::credential_pool::key_fingerprint;
use crate::services::CredentialPool;
use axum::{
    body::Body,
    extract::Request,
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use std::sync::Arc;

const ROUTE_LABEL: &str = "openai_compat";
const UPSTREAM_OPENAI_PREFIX: &str = "/v1beta/openai/";
const CLIENT_PREFIXES: &[&str] = &["/v1beta/openai/", "/v1/"];

/// Forwards OpenAI-style requests to the upstream's compatibility surface.
#[derive(Clone)]
pub struct OpenAiPassthrough {
    pool: Arc<CredentialPool>,
    relay: UpstreamRelay,
    max_request_body_bytes: usize,
}

impl OpenAiPassthrough {
    pub fn new(pool: Arc<CredentialPool>, relay: UpstreamRelay, max_request_body_bytes: usize) -> Self {
        Self {
            pool,
            relay,
            max_request_body_bytes,
        }
    }

    async fn forward(&self, request: Request<Body>) -> Result<Response> {
        let (parts, body) = request.into_parts();
        let path = upstream_path(parts.uri.path()).ok_or_else(|| {
            AppError::BadRequest(format!("Unsupported OpenAI path: {}", parts.uri.path()))
        })?;

        let upstream_key = self.pool.select_upstream_key()?;
        get_metrics()
            .key_selections
            .with_label_values(&[&key_fingerprint(upstream_key)])
            .inc();
        tracing::info!(
            route = ROUTE_LABEL,
            upstream_path = %path,
            upstream_key = %mask_key(upstream_key),
            "Forwarding OpenAI-compatible request"
        );

        let headers = build_openai_headers(&parts.headers, upstream_key)?;
        let body = read_request_body(body, self.max_request_body_bytes).await?;
        let url = self.relay.target_url(&path, parts.uri.query());

        let deadline = self.relay.deadline(ROUTE_LABEL);
        let upstream = self
            .relay
            .send(ROUTE_LABEL, parts.method, &url, headers, body, &deadline)
            .await?;

        if upstream.status().is_success() && is_event_stream(upstream.headers()) {
            stream_response(upstream, &deadline).await
        } else {
            buffer_response(upstream, &deadline).await
        }
    }
}

impl RequestHandler for OpenAiPassthrough {
    fn handle(&self, request: Request<Body>) -> BoxFuture<'static, Response> {
        let this = self.clone();
        Box::pin(async move {
            match this.forward(request).await {
                Ok(response) => response,
                Err(e) => e.into_response(),
            }
        })
    }
}

/// Map a client path onto the upstream compatibility prefix.
///
/// `/v1/chat/completions` and `/v1beta/openai/chat/completions` both become
/// `/v1beta/openai/chat/completions`.
pub fn upstream_path(path: &str) -> Option<String> {
    CLIENT_PREFIXES
        .iter()
        .find_map(|prefix| path.strip_prefix(prefix))
        .map(|rest| format!("{}{}", UPSTREAM_OPENAI_PREFIX, rest))
}

//! Request orchestration.
//!
//! Every request enters through [`handle_request`], the router's only
//! handler. It runs one pass over the pipeline:
//!
//! ```text
//! classify ─┬─ Status / Verify ───────────────────────────────► reply
//!           └─ authenticate ─┬─ fail ─────────────────────────► 401
//!                            ├─ OpenAiCompat ─► collaborator ─► reply
//!                            └─ select key ─┬─ none ──────────► 500
//!                                           └─ sanitize ─► relay ─► reply | 500
//! ```
//!
//! Each component runs at most once and nothing is retried.

use crate::api::auth::{authenticate, extract_client_key};
use crate::api::openai::OpenAiPassthrough;
use crate::api::relay::{read_request_body, UpstreamRelay};
use crate::api::routing::{classify, Route};
use crate::api::verify::KeyVerifier;
use crate::core::config::AppConfig;
use crate::core::header_policy::build_outbound_headers;
use crate::core::logging::mask_key;
use crate::core::metrics::get_metrics;
use crate::core::middleware::{request_id_middleware, MetricsMiddleware, RouteName};
use crate::core::Result;
use crate::services::credential_pool::key_fingerprint;
use crate::services::CredentialPool;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

/// A self-contained request handler the orchestrator delegates to.
///
/// Used for the OpenAI-compatibility surface and the key verification
/// endpoint so tests and deployments can swap them out.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, request: Request<Body>) -> BoxFuture<'static, Response>;
}

/// Shared, read-only state for all requests.
pub struct GatewayState {
    pub pool: Arc<CredentialPool>,
    pub relay: UpstreamRelay,
    pub openai: Arc<dyn RequestHandler>,
    pub verifier: Arc<dyn RequestHandler>,
    pub status_message: String,
    pub max_request_body_bytes: usize,
}

impl GatewayState {
    /// Build the state with the default collaborators.
    pub fn from_config(config: &AppConfig, client: reqwest::Client) -> Self {
        let pool = Arc::new(CredentialPool::from_config(config));
        let relay = UpstreamRelay::new(client, config.upstream_base_url.clone())
            .with_request_timeout(Duration::from_secs(config.request_timeout_secs));

        let openai = Arc::new(OpenAiPassthrough::new(
            Arc::clone(&pool),
            relay.clone(),
            config.max_request_body_bytes,
        ));
        let verifier = Arc::new(KeyVerifier::new(relay.clone()));

        Self {
            pool,
            relay,
            openai,
            verifier,
            status_message: config.status_message.clone(),
            max_request_body_bytes: config.max_request_body_bytes,
        }
    }

    /// Replace the OpenAI-compatibility collaborator.
    pub fn with_openai(mut self, handler: Arc<dyn RequestHandler>) -> Self {
        self.openai = handler;
        self
    }

    /// Replace the verification collaborator.
    pub fn with_verifier(mut self, handler: Arc<dyn RequestHandler>) -> Self {
        self.verifier = handler;
        self
    }
}

/// Build the gateway router. All paths are served by [`handle_request`].
pub fn gateway_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .fallback(handle_request)
        .with_state(state)
        .layer(axum::middleware::from_fn(MetricsMiddleware::track_metrics))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
}

/// Orchestrate one request.
pub async fn handle_request(
    State(state): State<Arc<GatewayState>>,
    request: Request<Body>,
) -> Response {
    let route = classify(request.method(), request.uri().path());
    tracing::debug!(route = route.label(), "Request classified");

    let mut response = match dispatch(&state, &route, request).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    };
    response.extensions_mut().insert(RouteName(route.label()));
    response
}

async fn dispatch(state: &GatewayState, route: &Route, request: Request<Body>) -> Result<Response> {
    match route {
        Route::Status => return Ok(status_page(&state.status_message)),
        Route::Verify => return Ok(state.verifier.handle(request).await),
        _ => {}
    }

    if let Err(e) = authenticate(request.headers(), &state.pool) {
        let reason = if extract_client_key(request.headers()).is_some() {
            "invalid_key"
        } else {
            "missing_key"
        };
        get_metrics().auth_failures.with_label_values(&[reason]).inc();
        tracing::warn!(reason = reason, route = route.label(), "Rejected unauthenticated request");
        return Err(e);
    }

    if *route == Route::OpenAiCompat {
        return Ok(state.openai.handle(request).await);
    }

    let upstream_key = state.pool.select_upstream_key()?;
    get_metrics()
        .key_selections
        .with_label_values(&[&key_fingerprint(upstream_key)])
        .inc();
    tracing::info!(
        route = route.label(),
        upstream_key = %mask_key(upstream_key),
        "Selected upstream key"
    );

    let (parts, body) = request.into_parts();
    let headers = build_outbound_headers(&parts.headers, upstream_key, route)?;
    let body = read_request_body(body, state.max_request_body_bytes).await?;

    state
        .relay
        .forward(
            route,
            parts.uri.path(),
            parts.uri.query(),
            parts.method,
            headers,
            body,
        )
        .await
}

fn status_page(message: &str) -> Response {
    let mut response = (StatusCode::OK, message.to_string()).into_response();
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower::ServiceExt;

    struct Fixed(StatusCode);

    impl RequestHandler for Fixed {
        fn handle(&self, _request: Request<Body>) -> BoxFuture<'static, Response> {
            let status = self.0;
            Box::pin(async move { status.into_response() })
        }
    }

    fn state(allowed: &[&str], upstream: &[&str]) -> GatewayState {
        let config = AppConfig {
            allowed_keys: allowed.iter().map(|k| k.to_string()).collect(),
            api_keys: upstream.iter().map(|k| k.to_string()).collect(),
            upstream_base_url: "http://127.0.0.1:1".to_string(),
            ..AppConfig::default()
        };
        GatewayState::from_config(&config, reqwest::Client::new())
            .with_openai(Arc::new(Fixed(StatusCode::ACCEPTED)))
            .with_verifier(Arc::new(Fixed(StatusCode::IM_A_TEAPOT)))
    }

    async fn call(state: GatewayState, request: axum::http::Request<Body>) -> Response {
        gateway_router(Arc::new(state)).oneshot(request).await.unwrap()
    }

    #[tokio::test]
    async fn test_status_page_without_auth() {
        let response = call(
            state(&["abc"], &[]),
            axum::http::Request::get("/index.html").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/html");
        assert_eq!(
            response.extensions().get::<RouteName>(),
            Some(&RouteName("status"))
        );
    }

    #[tokio::test]
    async fn test_verify_bypasses_auth() {
        let response = call(
            state(&["abc"], &["u1"]),
            axum::http::Request::post("/verify").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    }

    #[tokio::test]
    async fn test_openai_compat_requires_auth() {
        let response = call(
            state(&["abc"], &["u1"]),
            axum::http::Request::post("/v1/chat/completions")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = call(
            state(&["abc"], &["u1"]),
            axum::http::Request::post("/v1/chat/completions")
                .header("x-api-key", "abc")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_empty_upstream_pool_is_server_misconfiguration() {
        let response = call(
            state(&["abc"], &[]),
            axum::http::Request::get("/v1beta/models")
                .header("x-api-key", "abc")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Server misconfiguration");
    }

    #[tokio::test]
    async fn test_transport_failure_is_internal_error() {
        let response = call(
            state(&["abc"], &["u1"]),
            axum::http::Request::get("/v1beta/models")
                .header("x-api-key", "abc")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Internal Server Error");
        assert!(json["details"].as_str().is_some());
    }
}

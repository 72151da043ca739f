//! Header policy for both directions of the relay.
//!
//! Outbound requests are built from an allow-list: only content negotiation
//! headers survive, every credential the client sent is dropped and the
//! selected upstream key is injected. Upstream responses have hop-by-hop
//! headers stripped and a fixed `Referrer-Policy` added.

use crate::api::routing::Route;
use crate::core::{AppError, Result};
use axum::http::{
    header::{
        ACCEPT, AUTHORIZATION, CONNECTION, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE,
        REFERRER_POLICY, TRANSFER_ENCODING,
    },
    HeaderMap, HeaderName, HeaderValue,
};

/// Header carrying the upstream credential.
pub static UPSTREAM_KEY_HEADER: HeaderName = HeaderName::from_static("x-goog-api-key");

/// Dedicated client-key header, checked first by the authenticator.
pub static CLIENT_KEY_HEADER: HeaderName = HeaderName::from_static("x-api-key");

static KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");

pub const EVENT_STREAM: &str = "text/event-stream";
pub const APPLICATION_JSON: &str = "application/json";
const NO_REFERRER: &str = "no-referrer";

/// How a relayed response body is framed toward the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// Body fully read and re-sent with a fresh length
    Buffered,
    /// Upstream bytes passed through as they arrive
    Streamed,
}

/// Build the header set for a native upstream call.
///
/// Only `content-type` and `accept` are copied from the client; the upstream
/// key header is then set to `upstream_key`. Streaming routes always ask for
/// server-sent events.
pub fn build_outbound_headers(
    inbound: &HeaderMap,
    upstream_key: &str,
    route: &Route,
) -> Result<HeaderMap> {
    let mut headers = negotiation_headers(inbound);
    headers.insert(UPSTREAM_KEY_HEADER.clone(), credential_value(upstream_key)?);

    if route.is_streaming() {
        headers.insert(ACCEPT, HeaderValue::from_static(EVENT_STREAM));
    }
    Ok(headers)
}

/// Build the header set for the upstream's OpenAI-compatible surface, which
/// takes the key as a bearer token instead of the native key header.
pub fn build_openai_headers(inbound: &HeaderMap, upstream_key: &str) -> Result<HeaderMap> {
    let mut headers = negotiation_headers(inbound);
    headers.insert(
        AUTHORIZATION,
        credential_value(&format!("Bearer {}", upstream_key))?,
    );
    Ok(headers)
}

/// Copy upstream response headers minus hop-by-hop entries.
///
/// Buffered bodies are re-framed, so their length and encoding headers go
/// too. `Referrer-Policy: no-referrer` is always set.
pub fn sanitize_response_headers(upstream: &HeaderMap, framing: BodyFraming) -> HeaderMap {
    let mut headers = upstream.clone();
    headers.remove(TRANSFER_ENCODING);
    headers.remove(CONNECTION);
    headers.remove(&KEEP_ALIVE);

    if framing == BodyFraming::Buffered {
        headers.remove(CONTENT_ENCODING);
        headers.remove(CONTENT_LENGTH);
    }

    headers.insert(REFERRER_POLICY, HeaderValue::from_static(NO_REFERRER));
    headers
}

/// Headers for an upstream error body relayed on the streaming route.
pub fn error_passthrough_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
    headers.insert(REFERRER_POLICY, HeaderValue::from_static(NO_REFERRER));
    headers
}

/// Whether a response advertises a server-sent event body.
pub fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_start().to_ascii_lowercase().starts_with(EVENT_STREAM))
        .unwrap_or(false)
}

fn negotiation_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(3);
    for name in [CONTENT_TYPE, ACCEPT] {
        if let Some(value) = inbound.get(&name) {
            headers.insert(name, value.clone());
        }
    }
    headers
}

fn credential_value(value: &str) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(value).map_err(|_| {
        AppError::Unconfigured("upstream key is not a valid header value".to_string())
    })?;
    value.set_sensitive(true);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn inbound() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("k"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.insert("user-agent", HeaderValue::from_static("x"));
        headers.insert("x-goog-api-key", HeaderValue::from_static("leaked"));
        headers.insert("authorization", HeaderValue::from_static("Bearer client"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers
    }

    #[test]
    fn test_outbound_headers_allow_list() {
        let headers = build_outbound_headers(&inbound(), "u1", &Route::NativeDefault).unwrap();

        assert_eq!(headers.len(), 2);
        assert_eq!(headers[CONTENT_TYPE], "application/json");
        assert_eq!(headers[&UPSTREAM_KEY_HEADER], "u1");
        assert!(headers[&UPSTREAM_KEY_HEADER].is_sensitive());
        assert!(headers.get("user-agent").is_none());
        assert!(headers.get("x-api-key").is_none());
        assert!(headers.get(AUTHORIZATION).is_none());
        assert!(headers.get(TRANSFER_ENCODING).is_none());
    }

    #[test]
    fn test_outbound_headers_keep_accept() {
        let mut inbound = HeaderMap::new();
        inbound.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let headers = build_outbound_headers(&inbound, "u1", &Route::NativeDefault).unwrap();
        assert_eq!(headers[ACCEPT], "application/json");
    }

    #[test]
    fn test_streaming_route_forces_event_stream_accept() {
        let mut inbound = HeaderMap::new();
        inbound.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let route = Route::NativeRewrite {
            model: "gemini-pro".to_string(),
            action: "streamGenerateContent".to_string(),
        };

        let headers = build_outbound_headers(&inbound, "u1", &route).unwrap();
        assert_eq!(headers.get_all(ACCEPT).iter().count(), 1);
        assert_eq!(headers[ACCEPT], EVENT_STREAM);
    }

    #[test]
    fn test_duplicate_inbound_headers_collapse() {
        let mut inbound = HeaderMap::new();
        inbound.append(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        inbound.append(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        let headers = build_outbound_headers(&inbound, "u1", &Route::NativeDefault).unwrap();
        assert_eq!(headers.get_all(CONTENT_TYPE).iter().count(), 1);
    }

    #[test]
    fn test_invalid_upstream_key_rejected() {
        let result = build_outbound_headers(&HeaderMap::new(), "bad\nkey", &Route::NativeDefault);
        assert!(matches!(result, Err(AppError::Unconfigured(_))));
    }

    #[test]
    fn test_openai_headers_use_bearer() {
        let headers = build_openai_headers(&inbound(), "u1").unwrap();
        assert_eq!(headers[AUTHORIZATION], "Bearer u1");
        assert!(headers.get(&UPSTREAM_KEY_HEADER).is_none());
        assert!(headers.get("x-api-key").is_none());
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn test_sanitize_buffered_response_headers() {
        let mut upstream = HeaderMap::new();
        upstream.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        upstream.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        upstream.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        upstream.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        upstream.insert(CONTENT_LENGTH, HeaderValue::from_static("10"));
        upstream.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));

        let headers = sanitize_response_headers(&upstream, BodyFraming::Buffered);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[CONTENT_TYPE], APPLICATION_JSON);
        assert_eq!(headers[REFERRER_POLICY], "no-referrer");
    }

    #[test]
    fn test_sanitize_streamed_response_keeps_encoding() {
        let mut upstream = HeaderMap::new();
        upstream.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        upstream.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));

        let headers = sanitize_response_headers(&upstream, BodyFraming::Streamed);
        assert!(headers.get(TRANSFER_ENCODING).is_none());
        assert_eq!(headers[CONTENT_ENCODING], "gzip");
        assert_eq!(headers[REFERRER_POLICY], "no-referrer");
    }

    #[test]
    fn test_is_event_stream() {
        let mut headers = HeaderMap::new();
        assert!(!is_event_stream(&headers));
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/event-stream; charset=utf-8"),
        );
        assert!(is_event_stream(&headers));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
        assert!(!is_event_stream(&headers));
    }
}

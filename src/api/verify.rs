//! Default key verification handler for `POST /verify`.
//!
//! Checks candidate upstream keys against the models listing and reports
//! which ones the upstream accepts. Keys are only ever echoed back masked.

use crate::api::gateway::RequestHandler;
use crate::api::relay::{read_request_body, UpstreamRelay};
use crate::core::config::parse_key_list;
use crate::core::error::error_chain;
use crate::core::header_policy::UPSTREAM_KEY_HEADER;
use crate::core::logging::mask_key;
use crate::core::{AppError, Result};
use axum::{
    body::Body,
    extract::Request,
    http::{HeaderMap, HeaderValue, Method},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use futures::future::{join_all, BoxFuture};
use serde::{Deserialize, Serialize};

const ROUTE_LABEL: &str = "verify";
const CHECK_PATH: &str = "/v1beta/models";
const MAX_KEYS: usize = 64;
const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
struct VerifyRequest {
    #[serde(default)]
    keys: Vec<String>,
}

/// Outcome of probing one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyCheck {
    pub key: String,
    pub valid: bool,
    pub status: Option<u16>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub results: Vec<KeyCheck>,
}

#[derive(Clone)]
pub struct KeyVerifier {
    relay: UpstreamRelay,
}

impl KeyVerifier {
    pub fn new(relay: UpstreamRelay) -> Self {
        Self { relay }
    }

    async fn verify(&self, request: Request<Body>) -> Result<Response> {
        let (parts, body) = request.into_parts();
        let body = read_request_body(body, MAX_BODY_BYTES).await?;
        let keys = candidate_keys(&parts.headers, &body)?;

        if keys.is_empty() {
            return Err(AppError::BadRequest("No API keys provided".to_string()));
        }
        if keys.len() > MAX_KEYS {
            return Err(AppError::BadRequest(format!(
                "Too many API keys, at most {} per request",
                MAX_KEYS
            )));
        }

        tracing::info!(count = keys.len(), "Verifying upstream keys");
        let results = join_all(keys.iter().map(|key| self.check(key))).await;
        Ok(Json(VerifyResponse { results }).into_response())
    }

    async fn check(&self, key: &str) -> KeyCheck {
        let masked = mask_key(key);
        let mut headers = HeaderMap::new();
        match HeaderValue::from_str(key) {
            Ok(mut value) => {
                value.set_sensitive(true);
                headers.insert(UPSTREAM_KEY_HEADER.clone(), value);
            }
            Err(_) => {
                return KeyCheck {
                    key: masked,
                    valid: false,
                    status: None,
                    error: Some("key is not a valid header value".to_string()),
                }
            }
        }

        let url = self.relay.target_url(CHECK_PATH, None);
        let deadline = self.relay.deadline(ROUTE_LABEL);
        let response = match self
            .relay
            .send(ROUTE_LABEL, Method::GET, &url, headers, Bytes::new(), &deadline)
            .await
        {
            Ok(response) => response,
            Err(AppError::UpstreamUnreachable(e)) => {
                return KeyCheck {
                    key: masked,
                    valid: false,
                    status: None,
                    error: Some(error_chain(&e)),
                }
            }
            Err(e) => {
                return KeyCheck {
                    key: masked,
                    valid: false,
                    status: None,
                    error: Some(e.to_string()),
                }
            }
        };

        let status = response.status();
        let error = if status.is_success() {
            None
        } else {
            let message = deadline
                .run(async { Ok(upstream_error_message(response).await) })
                .await;
            Some(message.unwrap_or_else(|e| e.to_string()))
        };
        tracing::debug!(key = %masked, status = status.as_u16(), "Key checked");

        KeyCheck {
            key: masked,
            valid: status.is_success(),
            status: Some(status.as_u16()),
            error,
        }
    }
}

impl RequestHandler for KeyVerifier {
    fn handle(&self, request: Request<Body>) -> BoxFuture<'static, Response> {
        let this = self.clone();
        Box::pin(async move {
            match this.verify(request).await {
                Ok(response) => response,
                Err(e) => e.into_response(),
            }
        })
    }
}

/// Keys from the `x-goog-api-key` header (comma-separated) or, when the
/// header is absent, from a JSON body `{"keys": [...]}`.
fn candidate_keys(headers: &HeaderMap, body: &[u8]) -> Result<Vec<String>> {
    if let Some(value) = headers.get(&UPSTREAM_KEY_HEADER) {
        let value = value
            .to_str()
            .map_err(|_| AppError::BadRequest("Invalid x-goog-api-key header".to_string()))?;
        return Ok(parse_key_list(value));
    }

    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    let request: VerifyRequest = serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("Invalid JSON body: {}", e)))?;
    Ok(request
        .keys
        .into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect())
}

/// Pull `error.message` out of an upstream error body, falling back to the
/// raw text.
async fn upstream_error_message(response: reqwest::Response) -> String {
    let status = response.status();
    let text = match response.text().await {
        Ok(text) => text,
        Err(e) => return error_chain(&e),
    };

    serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| {
            if text.trim().is_empty() {
                status.to_string()
            } else {
                text
            }
        })
}

//! Error types and handling for the gateway.
//!
//! [`AppError`] is the single error type the request pipeline returns. Each
//! variant maps to a stable status code and a flat JSON body of the form
//! `{"error": "...", "details": "..."}`.

use axum::{
    http::{header::REFERRER_POLICY, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::error::Error as StdError;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the application.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors (file not found, parse errors, etc.)
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    /// Missing or unknown client credential
    #[error("Invalid API Key")]
    Unauthorized,

    /// No upstream credential is available
    #[error("Server misconfiguration: {0}")]
    Unconfigured(String),

    /// Transport failure talking to the upstream (connect, timeout, body read)
    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(#[from] reqwest::Error),

    /// Upstream did not answer a buffered exchange within the request deadline
    #[error("Upstream request timed out after {}s", .0.as_secs())]
    UpstreamTimeout(Duration),

    /// Client provided invalid data
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Generic internal server errors with custom message
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": "Invalid API Key" }),
            ),
            AppError::Unconfigured(reason) => {
                tracing::error!(reason = %reason, "Gateway configuration fault");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Server misconfiguration" }),
                )
            }
            AppError::UpstreamUnreachable(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "error": "Internal Server Error",
                    "details": error_chain(&e),
                }),
            ),
            AppError::UpstreamTimeout(limit) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "error": "Internal Server Error",
                    "details": format!("upstream request timed out after {}s", limit.as_secs()),
                }),
            ),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::Config(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "Internal Server Error", "details": format!("{:#}", e) }),
            ),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "Internal Server Error", "details": msg }),
            ),
        };

        let mut response = (status, Json(body)).into_response();
        response
            .headers_mut()
            .insert(REFERRER_POLICY, HeaderValue::from_static("no-referrer"));
        response
    }
}

/// Render an error and its sources as `outer: inner: root`.
pub fn error_chain(error: &(dyn StdError + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !message.contains(&cause_text) {
            message.push_str(": ");
            message.push_str(&cause_text);
        }
        source = cause.source();
    }
    message
}

/// Convenience type alias for Results using [`AppError`].
pub type Result<T> = std::result::Result<T, AppError>;

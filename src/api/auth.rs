//! Client authentication.
//!
//! A client may present its key in any of three headers. They are checked in
//! a fixed order and the first non-empty one is the only candidate; later
//! headers are never consulted as a fallback for a rejected key.

use axum::http::{header::AUTHORIZATION, HeaderMap};

use crate::core::error::Result;
use crate::core::header_policy::{CLIENT_KEY_HEADER, UPSTREAM_KEY_HEADER};
use crate::core::AppError;
use crate::services::CredentialPool;

/// Extract the client key candidate from request headers.
///
/// Priority: `x-api-key`, then `Authorization: Bearer <token>`, then
/// `x-goog-api-key`.
pub fn extract_client_key(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, &CLIENT_KEY_HEADER)
        .or_else(|| extract_bearer(headers))
        .or_else(|| header_str(headers, &UPSTREAM_KEY_HEADER))
}

/// Extract Bearer token from Authorization header.
fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &axum::http::HeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Verify the request carries an allowed client key.
///
/// Returns [`AppError::Unauthorized`] when no candidate is present or the
/// candidate is not in the allow-list.
pub fn authenticate(headers: &HeaderMap, pool: &CredentialPool) -> Result<()> {
    let Some(candidate) = extract_client_key(headers) else {
        tracing::debug!("No client key presented");
        return Err(AppError::Unauthorized);
    };

    if !pool.is_allowed_client(candidate) {
        tracing::debug!("Client key not in allow-list");
        return Err(AppError::Unauthorized);
    }

    tracing::debug!("Authentication successful");
    Ok(())
}

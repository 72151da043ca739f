//! Path classification.
//!
//! Every inbound request is classified exactly once into a [`Route`]; the
//! header policy, the relay and the orchestrator all consume that single
//! decision instead of re-deriving it from the path.

use axum::http::Method;
use std::borrow::Cow;

/// Path suffixes served by the OpenAI-compatible surface.
const OPENAI_SUFFIXES: &[&str] = &["/chat/completions", "/completions", "/embeddings", "/models"];

/// Path prefixes served by the OpenAI-compatible surface.
const OPENAI_PREFIXES: &[&str] = &["/v1/", "/v1beta/openai/"];

/// Upstream path prefix for rewritten `{model}:{action}` requests.
const NATIVE_MODELS_PREFIX: &str = "/v1beta/models/";

/// Where a request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Static status page, no authentication
    Status,
    /// Key verification endpoint, no authentication
    Verify,
    /// Delegated to the OpenAI-compatibility handler
    OpenAiCompat,
    /// Legacy `{model}:{action}` path rewritten under `/v1beta/models/` and streamed
    NativeRewrite { model: String, action: String },
    /// Forwarded to the upstream unchanged and buffered
    NativeDefault,
}

impl Route {
    /// Public routes skip authentication.
    pub fn is_public(&self) -> bool {
        matches!(self, Route::Status | Route::Verify)
    }

    /// Routes whose successful response is relayed as an open stream.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Route::NativeRewrite { .. })
    }

    /// Stable label for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Route::Status => "status",
            Route::Verify => "verify",
            Route::OpenAiCompat => "openai_compat",
            Route::NativeRewrite { .. } => "native_rewrite",
            Route::NativeDefault => "native_default",
        }
    }

    /// Path to request upstream for a native route.
    ///
    /// `NativeRewrite` yields `/v1beta/models/{model}:{action}`; every other
    /// route forwards `original` unchanged.
    pub fn upstream_path<'a>(&self, original: &'a str) -> Cow<'a, str> {
        match self {
            Route::NativeRewrite { model, action } => Cow::Owned(format!(
                "{}{}:{}",
                NATIVE_MODELS_PREFIX,
                bare_model_name(model),
                action
            )),
            _ => Cow::Borrowed(original),
        }
    }
}

/// Classify a request by method and path. First match wins:
///
/// 1. `/` or `/index.html` → [`Route::Status`]
/// 2. `POST /verify` → [`Route::Verify`]
/// 3. `/v1/…` or `/v1beta/openai/…` ending in an OpenAI endpoint → [`Route::OpenAiCompat`]
/// 4. a colon plus `generatecontent` (any case) → [`Route::NativeRewrite`]
/// 5. anything else → [`Route::NativeDefault`]
///
/// ```
/// use axum::http::Method;
/// use gemini_gateway::api::routing::{classify, Route};
///
/// let route = classify(&Method::POST, "/gemini-pro:streamGenerateContent");
/// assert_eq!(route.upstream_path("/gemini-pro:streamGenerateContent"),
///            "/v1beta/models/gemini-pro:streamGenerateContent");
/// ```
pub fn classify(method: &Method, path: &str) -> Route {
    if path == "/" || path == "/index.html" {
        return Route::Status;
    }

    if path == "/verify" && method == Method::POST {
        return Route::Verify;
    }

    if OPENAI_PREFIXES.iter().any(|p| path.starts_with(p))
        && OPENAI_SUFFIXES.iter().any(|s| path.ends_with(s))
    {
        return Route::OpenAiCompat;
    }

    if path.contains(':') && path.to_ascii_lowercase().contains("generatecontent") {
        if let Some((head, tail)) = path.split_once(':') {
            return Route::NativeRewrite {
                model: head.strip_prefix('/').unwrap_or(head).to_string(),
                action: tail.to_string(),
            };
        }
    }

    Route::NativeDefault
}

/// Drop a leading `v1beta/` or `v1/` version segment and a `models/` segment
/// already present in the model part so the rewritten path does not repeat
/// them. `/v1/models/foo:generateContent` is sent as
/// `/v1beta/models/foo:generateContent`.
fn bare_model_name(model: &str) -> &str {
    let model = ["v1beta/", "v1/"]
        .iter()
        .find_map(|version| model.strip_prefix(version))
        .unwrap_or(model);
    model.strip_prefix("models/").unwrap_or(model)
}

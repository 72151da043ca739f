//! Request-scoped logging context and key masking.
//!
//! Every request runs inside a [`REQUEST_ID`] scope so log lines emitted deep
//! in the relay can be correlated without threading the ID through every call.
//! Upstream and client keys must only ever reach the logs through
//! [`mask_key`].

tokio::task_local! {
    /// Task-local storage for the current request ID.
    pub static REQUEST_ID: String;
}

/// Get the current request ID from context, if set.
///
/// Returns an empty string if no request ID is set.
pub fn get_request_id() -> String {
    REQUEST_ID.try_with(|id| id.clone()).unwrap_or_default()
}

/// Generate a new unique request ID using UUID v4.
pub fn generate_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Mask a secret for logging, keeping only a short prefix and suffix.
///
/// ```
/// use gemini_gateway::core::logging::mask_key;
///
/// assert_eq!(mask_key("AIzaSyA1234567890abcd"), "AIza...abcd");
/// assert_eq!(mask_key("short"), "****");
/// ```
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 12 {
        return "****".to_string();
    }
    let prefix: String = chars[..4].iter().collect();
    let suffix: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", prefix, suffix)
}

/// Execute an async block inside a request ID scope.
///
/// ```ignore
/// with_request_context!(request_id, async {
///     // handler logic here
/// })
/// ```
#[macro_export]
macro_rules! with_request_context {
    ($request_id:expr, $body:expr) => {
        $crate::core::logging::REQUEST_ID
            .scope($request_id, $body)
            .await
    };
}

//! Configuration management for the gateway.
//!
//! Configuration comes either from the process environment (the usual
//! deployment, with comma-separated key lists) or from a YAML/TOML file with
//! `${VAR}` expansion. Environment variables always override file values.
//! The resulting [`AppConfig`] is immutable for the lifetime of the process.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::str::FromStr;

/// Upstream generative-language API host.
pub const DEFAULT_UPSTREAM_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Body served on `/` and `/index.html`.
pub const DEFAULT_STATUS_MESSAGE: &str =
    "Proxy is Running! More Details: https://github.com/tech-shrimp/gemini-balance-lite";

static ENV_VAR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\$\{([^}:]+)(?::?-?([^}]*))?\}"#).expect("env var pattern is valid")
});

/// Main application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration (host, port)
    #[serde(default)]
    pub server: ServerConfig,

    /// Base URL of the upstream API, without a trailing slash
    #[serde(default = "default_upstream_base_url")]
    pub upstream_base_url: String,

    /// Whether to verify SSL certificates for upstream requests
    #[serde(default = "default_verify_ssl")]
    pub verify_ssl: bool,

    /// Request timeout in seconds for upstream calls
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Largest inbound request body that is forwarded upstream
    #[serde(default = "default_max_request_body_bytes")]
    pub max_request_body_bytes: usize,

    /// Client keys allowed to call the gateway
    #[serde(default)]
    pub allowed_keys: Vec<String>,

    /// Upstream API keys the gateway rotates through
    #[serde(default)]
    pub api_keys: Vec<String>,

    /// Upstream key selection policy
    #[serde(default)]
    pub key_selection: KeySelection,

    /// Static body of the status page
    #[serde(default = "default_status_message")]
    pub status_message: String,

    /// Port for the Prometheus `/metrics` listener; disabled when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

/// Server-specific configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind to
    #[serde(default = "default_port")]
    pub port: u16,
}

/// How an upstream key is picked for each request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySelection {
    /// Uniform random choice per request
    #[default]
    Random,
    /// Cycle through the keys in order
    RoundRobin,
}

impl FromStr for KeySelection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "random" => Ok(Self::Random),
            "round_robin" | "roundrobin" => Ok(Self::RoundRobin),
            other => Err(format!("unknown key selection policy: {}", other)),
        }
    }
}

impl fmt::Display for KeySelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Random => f.write_str("random"),
            Self::RoundRobin => f.write_str("round_robin"),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upstream_base_url: default_upstream_base_url(),
            verify_ssl: default_verify_ssl(),
            request_timeout_secs: default_request_timeout(),
            max_request_body_bytes: default_max_request_body_bytes(),
            allowed_keys: Vec::new(),
            api_keys: Vec::new(),
            key_selection: KeySelection::default(),
            status_message: default_status_message(),
            metrics_port: None,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    18000
}

fn default_upstream_base_url() -> String {
    DEFAULT_UPSTREAM_BASE_URL.to_string()
}

fn default_verify_ssl() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    300
}

fn default_max_request_body_bytes() -> usize {
    32 * 1024 * 1024
}

fn default_status_message() -> String {
    DEFAULT_STATUS_MESSAGE.to_string()
}

impl AppConfig {
    /// Build configuration from environment variables only.
    ///
    /// Recognized variables: `ALLOWED_KEYS`, `API_KEYS` (comma-separated),
    /// `HOST`, `PORT`, `UPSTREAM_BASE_URL`, `VERIFY_SSL`,
    /// `REQUEST_TIMEOUT_SECS`, `MAX_REQUEST_BODY_BYTES`, `KEY_SELECTION`,
    /// `STATUS_MESSAGE`, `METRICS_PORT`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.normalize();
        config
    }

    /// Load configuration from a YAML or TOML file.
    ///
    /// The format is picked from the file extension (YAML when unknown).
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use gemini_gateway::core::config::AppConfig;
    ///
    /// let config = AppConfig::load("gateway.yaml").expect("Failed to load config");
    /// ```
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let expanded = expand_env_vars(&content);

        let mut config: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(&expanded, file_format(path)))
            .build()
            .and_then(|c| c.try_deserialize())
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        config.apply_env_overrides();
        config.normalize();
        Ok(config)
    }

    /// Reject configurations the gateway cannot run with.
    ///
    /// Empty key lists are allowed but logged: with no allowed client keys
    /// every protected request is rejected, and with no upstream keys every
    /// forwarded request fails with a configuration error.
    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.upstream_base_url)
            .with_context(|| format!("Invalid upstream_base_url: {}", self.upstream_base_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("upstream_base_url must use http or https: {}", url);
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than zero");
        }

        if self.allowed_keys.is_empty() {
            tracing::warn!("No allowed client keys configured; all protected requests will be rejected");
        }
        if self.api_keys.is_empty() {
            tracing::warn!("No upstream API keys configured; forwarded requests will fail");
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("HOST") {
            self.server.host = host;
        }

        if let Some(port) = env_parse::<u16>("PORT") {
            self.server.port = port;
        }

        if let Ok(url) = std::env::var("UPSTREAM_BASE_URL") {
            self.upstream_base_url = url;
        }

        if let Ok(verify_ssl) = std::env::var("VERIFY_SSL") {
            self.verify_ssl = str_to_bool(&verify_ssl);
        }

        if let Some(timeout) = env_parse::<u64>("REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = timeout;
        }

        if let Some(limit) = env_parse::<usize>("MAX_REQUEST_BODY_BYTES") {
            self.max_request_body_bytes = limit;
        }

        if let Ok(keys) = std::env::var("ALLOWED_KEYS") {
            self.allowed_keys = parse_key_list(&keys);
        }

        if let Ok(keys) = std::env::var("API_KEYS") {
            self.api_keys = parse_key_list(&keys);
        }

        if let Ok(policy) = std::env::var("KEY_SELECTION") {
            match policy.parse() {
                Ok(policy) => self.key_selection = policy,
                Err(e) => tracing::warn!(error = %e, "Ignoring KEY_SELECTION"),
            }
        }

        if let Ok(message) = std::env::var("STATUS_MESSAGE") {
            self.status_message = message;
        }

        if let Some(port) = env_parse::<u16>("METRICS_PORT") {
            self.metrics_port = Some(port);
        }
    }

    /// Trim keys, drop empty entries and strip a trailing slash from the upstream URL.
    fn normalize(&mut self) {
        self.allowed_keys = normalize_keys(std::mem::take(&mut self.allowed_keys));
        self.api_keys = normalize_keys(std::mem::take(&mut self.api_keys));
        let trimmed = self.upstream_base_url.trim().trim_end_matches('/').to_string();
        self.upstream_base_url = trimmed;
    }
}

/// Split a comma-separated key list, trimming whitespace and dropping empties.
pub fn parse_key_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

fn normalize_keys(keys: Vec<String>) -> Vec<String> {
    keys.iter()
        .flat_map(|k| parse_key_list(k))
        .collect()
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = key, value = %raw, "Ignoring unparsable environment variable");
            None
        }
    }
}

fn file_format(path: &str) -> config::FileFormat {
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".toml") {
        config::FileFormat::Toml
    } else if lower.ends_with(".json") {
        config::FileFormat::Json
    } else {
        config::FileFormat::Yaml
    }
}

/// Expand environment variables in configuration content.
///
/// Supports patterns: ${VAR}, ${VAR:-default}, ${VAR:default}
fn expand_env_vars(content: &str) -> String {
    ENV_VAR_PATTERN
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default_value.to_string())
        })
        .to_string()
}

/// Convert string to boolean.
///
/// Accepts: "true", "1", "yes", "on" (case-insensitive)
fn str_to_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

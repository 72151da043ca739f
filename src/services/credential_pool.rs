//! Client allow-list and upstream key rotation.
//!
//! The pool is built once from configuration and shared read-only by every
//! request. Client keys are stored as SHA-256 digests; upstream keys are kept
//! in order so a deterministic [`SelectionStrategy`] can be injected.

use crate::core::config::{AppConfig, KeySelection};
use crate::core::{AppError, Result};
use rand::seq::SliceRandom;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Picks one upstream key out of the configured sequence.
///
/// Implementations are shared across concurrently running requests.
pub trait SelectionStrategy: Send + Sync {
    /// Return one of `keys`, or `None` when `keys` is empty.
    fn select<'a>(&self, keys: &'a [String]) -> Option<&'a str>;

    /// Name used in logs.
    fn name(&self) -> &'static str;
}

/// Uniform random choice per request.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSelection;

impl SelectionStrategy for RandomSelection {
    fn select<'a>(&self, keys: &'a [String]) -> Option<&'a str> {
        keys.choose(&mut rand::thread_rng()).map(String::as_str)
    }

    fn name(&self) -> &'static str {
        "random"
    }
}

/// Cycle through the keys in configured order.
#[derive(Debug, Default)]
pub struct RoundRobinSelection {
    cursor: AtomicUsize,
}

impl SelectionStrategy for RoundRobinSelection {
    fn select<'a>(&self, keys: &'a [String]) -> Option<&'a str> {
        if keys.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % keys.len();
        keys.get(index).map(String::as_str)
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

/// Allowed client keys plus the upstream keys to rotate through.
pub struct CredentialPool {
    allowed_client_hashes: HashSet<String>,
    upstream_keys: Vec<String>,
    strategy: Arc<dyn SelectionStrategy>,
}

impl CredentialPool {
    /// Create a pool with random upstream selection.
    pub fn new<I, S>(allowed_client_keys: I, upstream_keys: Vec<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::with_strategy(allowed_client_keys, upstream_keys, Arc::new(RandomSelection))
    }

    /// Create a pool with an explicit selection strategy.
    pub fn with_strategy<I, S>(
        allowed_client_keys: I,
        upstream_keys: Vec<String>,
        strategy: Arc<dyn SelectionStrategy>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed_client_hashes = allowed_client_keys
            .into_iter()
            .map(|k| hash_key(k.as_ref()))
            .collect();

        Self {
            allowed_client_hashes,
            upstream_keys,
            strategy,
        }
    }

    /// Build the pool described by `config`.
    pub fn from_config(config: &AppConfig) -> Self {
        let strategy: Arc<dyn SelectionStrategy> = match config.key_selection {
            KeySelection::Random => Arc::new(RandomSelection),
            KeySelection::RoundRobin => Arc::new(RoundRobinSelection::default()),
        };
        Self::with_strategy(&config.allowed_keys, config.api_keys.clone(), strategy)
    }

    /// Whether `key` is one of the allowed client keys.
    pub fn is_allowed_client(&self, key: &str) -> bool {
        !key.is_empty() && self.allowed_client_hashes.contains(&hash_key(key))
    }

    /// Pick the upstream key for one request.
    ///
    /// Fails with [`AppError::Unconfigured`] when no upstream keys exist.
    pub fn select_upstream_key(&self) -> Result<&str> {
        self.strategy
            .select(&self.upstream_keys)
            .ok_or_else(|| AppError::Unconfigured("No upstream API keys configured".to_string()))
    }

    pub fn upstream_key_count(&self) -> usize {
        self.upstream_keys.len()
    }

    pub fn allowed_client_count(&self) -> usize {
        self.allowed_client_hashes.len()
    }

    /// Log pool composition at startup. Keys themselves are never logged.
    pub fn log_pool(&self) {
        tracing::info!(
            allowed_clients = self.allowed_client_count(),
            upstream_keys = self.upstream_key_count(),
            strategy = self.strategy.name(),
            "Credential pool loaded"
        );
    }
}

/// Hash an API key using SHA-256.
pub fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Short, non-reversible identifier for a key, usable as a metric label.
pub fn key_fingerprint(key: &str) -> String {
    hash_key(key)[..8].to_string()
}

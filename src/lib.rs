//! Gemini Gateway - a stateless authenticating gateway for the Gemini API
//!
//! The gateway accepts client requests, checks them against an allow-list of
//! client keys, picks one upstream key from a rotating pool and relays the
//! request to the generative-language API:
//!
//! - **Path classification**: status page, key verification, OpenAI-compatible
//!   endpoints, legacy `{model}:{action}` paths and plain native paths
//! - **Key rotation**: random (default) or round-robin upstream key selection
//! - **Header sanitization**: only content negotiation headers reach the
//!   upstream; client credentials never do
//! - **Streaming**: `generateContent` calls are relayed as live event streams
//!   and dropped upstream when the client disconnects
//! - **Metrics**: Prometheus metrics on an optional separate listener
//!
//! # Architecture
//!
//! - [`core`]: config, errors, logging context, metrics, middleware, header policy
//! - [`api`]: routing, authentication, relay and the request orchestrator
//! - [`services`]: the credential pool
//!
//! # Configuration
//!
//! - `ALLOWED_KEYS`: comma-separated client keys
//! - `API_KEYS`: comma-separated upstream keys
//! - `HOST` / `PORT`: bind address (default `0.0.0.0:18000`)
//! - `GATEWAY_CONFIG`: optional YAML/TOML file; environment still overrides it

pub mod api;
pub mod core;
pub mod services;

pub use api::{gateway_router, GatewayState, RequestHandler, Route};
pub use core::{AppConfig, AppError, Result};
pub use services::CredentialPool;

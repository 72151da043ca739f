//! Core functionality for the gateway.
//!
//! This module contains fundamental components used throughout the application:
//! - Configuration management
//! - Error handling
//! - Request-scoped logging context
//! - Metrics collection and HTTP middleware
//! - Header policy and stream outcome tracking

pub mod config;
pub mod error;
pub mod header_policy;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod stream_outcome;

// Re-export commonly used types
pub use config::{AppConfig, KeySelection, ServerConfig};
pub use error::{AppError, Result};
pub use logging::{generate_request_id, get_request_id, mask_key, REQUEST_ID};
pub use metrics::{get_metrics, init_metrics, metrics_handler, Metrics};
pub use middleware::{request_id_middleware, MetricsMiddleware};
pub use stream_outcome::{StreamOutcome, StreamTracker};

//! Business logic services for the gateway.

pub mod credential_pool;

// Re-export commonly used types
pub use credential_pool::{CredentialPool, RandomSelection, RoundRobinSelection, SelectionStrategy};

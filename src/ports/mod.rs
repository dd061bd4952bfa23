//! Ports: interfaces the domain requires from the outside world.
//!
//! Adapters implement these traits; the domain and application layers
//! depend only on the trait objects.

pub mod classification;
pub mod generation;
pub mod memory_store;
pub mod state_store;

use thiserror::Error;

/// Errors surfaced by the model-backed services (generation and
/// classification).
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("service call timed out after {0} seconds")]
    Timeout(u64),

    #[error("service returned empty output")]
    EmptyOutput,

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("failed to parse service response: {0}")]
    Parse(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl ServiceError {
    /// True if the same call can reasonably be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::Timeout(_) | ServiceError::Transport(_) | ServiceError::EmptyOutput
        )
    }
}

//! Error type for circuit construction.

use thiserror::Error;

/// Circuit construction errors.
#[derive(Debug, Error)]
pub enum CircuitError {
    /// The requested configuration is outside the supported envelope.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result alias for circuit construction.
pub type CircuitResult<T> = Result<T, CircuitError>;

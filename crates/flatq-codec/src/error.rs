//! Error types for the binary codecs.

use thiserror::Error;

/// Codec errors. Every variant is fatal to the read or write in progress.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed, truncated or misordered binary data.
    #[error("format error: {0}")]
    Format(String),

    /// An equation references a temporary at or after its own position.
    #[error("cycle error: equation {position} references temporary position {reference}")]
    Cycle {
        /// The equation being read.
        position: u64,
        /// The disallowed reference (>= `position`).
        reference: u64,
    },
}

/// Result alias for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

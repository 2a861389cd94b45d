//! Error types for the matrix engine.

use thiserror::Error;

use flatq_codec::CodecError;

/// Matrix engine errors.
#[derive(Debug, Error)]
pub enum MatrixError {
    /// A row's residue was neither 0 nor the sign constant during
    /// checking.
    #[error("inconsistent equation at row {row}: residue {residue:#x}")]
    InconsistentEquation {
        /// The offending row.
        row: u64,
        /// The residue modulo `2^(W+1)`.
        residue: u64,
    },

    /// Elimination derived an unsatisfiable row.
    #[error("contradiction detected at column {column}")]
    Contradiction {
        /// The pivot column the contradiction surfaced in.
        column: u64,
    },

    /// A checking step needed a column value that is not known yet.
    #[error("unknown value required at row {row}, column {column}")]
    UnknownValue {
        /// The row being evaluated.
        row: u64,
        /// The unknown column.
        column: u64,
    },

    /// Out-of-range access or write to a deleted column.
    #[error("invalid access: {0}")]
    InvalidAccess(String),

    /// Malformed input to matrix construction.
    #[error("format error: {0}")]
    Format(String),

    /// Error from the row-chunk codec while building the matrix.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Invariant violation inside the engine.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result alias for matrix operations.
pub type MatrixResult<T> = Result<T, MatrixError>;

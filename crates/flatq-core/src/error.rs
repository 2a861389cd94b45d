//! Error types for the symbolic model.

use thiserror::Error;

use crate::system::{OperandId, OperatorId};

/// Errors raised while evaluating the DAG under a concrete assignment.
#[derive(Debug, Error)]
pub enum EvalError {
    /// A temporary's defining sum did not reduce to an integer.
    #[error("operand {operand} evaluated to a fractional value")]
    FractionalValue {
        /// The operand whose value was requested.
        operand: OperandId,
    },

    /// An input or constant leaf carries no bit index.
    #[error("leaf operand {operand} has no assigned bit index")]
    UnassignedBit {
        /// The offending leaf.
        operand: OperandId,
    },

    /// A bit index points outside the supplied value vector.
    #[error("bit index {bit_index} of operand {operand} is out of range")]
    BitOutOfRange {
        /// The offending leaf.
        operand: OperandId,
        /// Its bit index.
        bit_index: u32,
    },

    /// A temporary operand has no defining operator.
    #[error("temporary operand {operand} has no defining operator")]
    MissingSource {
        /// The offending temporary.
        operand: OperandId,
    },

    /// Evaluation re-entered a node that is still being computed.
    #[error("evaluation cycle through operator {operator}")]
    Cycle {
        /// The operator the walk re-entered.
        operator: OperatorId,
    },
}

/// Result alias for evaluation.
pub type EvalResult<T> = Result<T, EvalError>;

/// Errors raised by flattening, back-substitution and the flattened-system
/// check.
#[derive(Debug, Error)]
pub enum FlattenError {
    /// A required defining operator is absent.
    #[error("dependency error: {0}")]
    Dependency(String),

    /// A finalized coefficient does not have a power-of-two denominator.
    #[error("denominator error: {0}")]
    Denominator(String),

    /// A value failed to reduce to the expected integer form.
    #[error("arithmetic error: {0}")]
    Arithmetic(String),

    /// A forward reference between positioned temporaries.
    #[error("cycle error: equation {position} references position {reference}")]
    Cycle {
        /// The equation being processed.
        position: u64,
        /// The disallowed reference (>= `position`).
        reference: u64,
    },

    /// A checked output bit disagreed with its required target value.
    #[error("target mismatch at position {position}: expected {expected}, computed {computed}")]
    TargetMismatch {
        /// The output temporary's position.
        position: u64,
        /// The required value.
        expected: bool,
        /// The value the equations produced.
        computed: bool,
    },

    /// Invariant violation inside the engine itself.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result alias for flattening.
pub type FlattenResult<T> = Result<T, FlattenError>;

//! flatq core - symbolic model and equation compiler
//!
//! This crate provides the in-memory half of the linearization pipeline:
//! - Identity allocation (strictly increasing 128-bit uids per system)
//! - The operand/operator DAG (rational-weighted linear combinations of
//!   boolean variables, arena-allocated and addressed by dense indices)
//! - Memoized symbolic evaluation of the DAG under a concrete assignment
//! - The flattening engine that compiles the DAG into a topologically
//!   ordered system of modular linear equations, plus the back-substitution
//!   pass that removes whole-number temporary references before the system
//!   is handed to a serializer

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod coeff;
pub mod error;
pub mod eval;
pub mod flatten;
pub mod system;
pub mod uid;

pub use coeff::{Coeff, Modulus};
pub use error::{EvalError, EvalResult, FlattenError, FlattenResult};
pub use eval::{evaluate_operator, evaluate_outputs};
pub use flatten::{
    check_flattened, flatten, Backsubstitution, EquationRecord, TermRef,
};
pub use system::{
    FlattenedOperator, Operand, OperandId, OperandKind, Operator, OperatorId, System,
};
pub use uid::{Uid, UidAllocator};

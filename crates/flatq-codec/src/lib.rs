//! flatq codec - binary interchange for compiled equation systems
//!
//! The compiler and the verifier are separate processes connected only by
//! files in the formats implemented here:
//! - the equation file ([`equations`]): the flattened system with its
//!   target mapping and constant vector, streamable in ascending or
//!   descending position order;
//! - the row-chunk file ([`rows`]): one dense matrix row per equation,
//!   consumed in large fixed-size blocks;
//! - the solution file ([`solution`]): a candidate assignment for the
//!   unknown input bits.
//!
//! All fixed-width fields are 8-byte little-endian words. Malformed input
//! is never repaired: any violation aborts the read.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod equations;
pub mod error;
pub mod rows;
pub mod solution;
mod wire;

pub use equations::{
    EquationFileHeader, EquationFileReader, EquationFileWriter, EquationOrder, TARGET_ALWAYS_ZERO,
};
pub use error::{CodecError, CodecResult};
pub use rows::{RowFileHeader, RowFileReader, RowFileWriter};
pub use solution::{read_solution, write_solution};

//! The solution file: a candidate assignment for the unknown input bits.
//!
//! Layout: a count word followed by that many 0/1 words.

use std::io::{Read, Write};

use crate::error::{CodecError, CodecResult};
use crate::wire;

/// Write a candidate input assignment.
pub fn write_solution<W: Write>(mut out: W, bits: &[bool]) -> CodecResult<()> {
    wire::write_u64(&mut out, bits.len() as u64)?;
    for &bit in bits {
        wire::write_u64(&mut out, u64::from(bit))?;
    }
    out.flush()?;
    Ok(())
}

/// Read a candidate input assignment. Any nonzero word counts as 1.
pub fn read_solution<R: Read>(mut input: R) -> CodecResult<Vec<bool>> {
    let count = wire::read_u64(&mut input)?;
    if count > (1 << 32) {
        return Err(CodecError::Format(format!(
            "implausible solution bit count {count}"
        )));
    }
    let mut bits = Vec::with_capacity(count as usize);
    for _ in 0..count {
        bits.push(wire::read_u64(&mut input)? != 0);
    }
    Ok(bits)
}

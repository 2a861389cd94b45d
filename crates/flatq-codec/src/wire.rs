//! Fixed-width word I/O shared by the codecs.

use std::io::{self, Read, Write};

use crate::error::{CodecError, CodecResult};

/// Eight-character tag opening the equations section.
pub const TAG_EQUATIONS: [u8; 8] = *b"equatns ";
/// Eight-character end-of-file marker.
pub const TAG_END: [u8; 8] = *b"endend  ";
/// Eight-character tag identifying a row-chunk file.
pub const TAG_PROBLEM: [u8; 8] = *b"problemd";

pub fn write_u64<W: Write>(out: &mut W, value: u64) -> io::Result<()> {
    out.write_all(&value.to_le_bytes())
}

pub fn write_tag<W: Write>(out: &mut W, tag: &[u8; 8]) -> io::Result<()> {
    out.write_all(tag)
}

/// Read one word, reporting truncation as a format error rather than a
/// bare I/O failure.
pub fn read_u64<R: Read>(input: &mut R) -> CodecResult<u64> {
    let mut bytes = [0u8; 8];
    fill(input, &mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

/// Read an eight-character tag.
pub fn read_tag<R: Read>(input: &mut R) -> CodecResult<[u8; 8]> {
    let mut bytes = [0u8; 8];
    fill(input, &mut bytes)?;
    Ok(bytes)
}

pub fn expect_tag<R: Read>(input: &mut R, expected: &[u8; 8], what: &str) -> CodecResult<()> {
    let tag = read_tag(input)?;
    if &tag != expected {
        return Err(CodecError::Format(format!(
            "missing or misplaced '{}' atom",
            what
        )));
    }
    Ok(())
}

fn fill<R: Read>(input: &mut R, bytes: &mut [u8]) -> CodecResult<()> {
    input.read_exact(bytes).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            CodecError::Format("unexpected end of file".into())
        } else {
            CodecError::Io(e)
        }
    })
}

//! The equation file format.
//!
//! Layout, in 8-byte little-endian words unless noted:
//!
//! ```text
//! total file size
//! magic tag (8 chars) | description tag (8 chars)
//! unknown-input count
//! five reserved words
//! column count (including unity)
//! output-target count, then one output->position word per target
//! constant count, then one 0/1 word per constant
//! equations section: size | "equatns " | count (or 0 then count for
//!   descending order) | per equation: position, divisor shift, operand
//!   count, then per operand a NUL-terminated decimal rational, a one-byte
//!   kind tag ('1', 'x', 'c', 't') and, except for '1', an 8-byte index
//! "endend  "
//! ```
//!
//! The position written with each equation is a synchronization value: the
//! reader knows which position it expects next and treats any mismatch as
//! corruption. A `t` operand may only reference a strictly smaller
//! position; that is the cycle-freedom check on ingestion.

use std::io::{BufRead, Write};

use flatq_core::coeff::{self, Coeff};
use flatq_core::{EquationRecord, TermRef};
use num_traits::Zero;

use crate::error::{CodecError, CodecResult};
use crate::wire::{self, TAG_END, TAG_EQUATIONS};

/// Sentinel in the targets vector for an output bit that is always 0.
pub const TARGET_ALWAYS_ZERO: u64 = u64::MAX;

/// Everything in the file ahead of the equations themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EquationFileHeader {
    /// Human-readable signature of the producing circuit.
    pub magic: [u8; 8],
    /// Human-readable problem description.
    pub description: [u8; 8],
    /// Number of unknown input bits.
    pub input_count: u64,
    /// Matrix column count a consumer will need, including unity.
    pub column_count: u64,
    /// Output bit -> equation position ([`TARGET_ALWAYS_ZERO`] for bits
    /// that are constant 0).
    pub targets: Vec<u64>,
    /// Constant bit values; entry 0 is unity and is always 1.
    pub constants: Vec<u64>,
}

impl EquationFileHeader {
    fn byte_len(&self) -> u64 {
        8 * (11 + self.targets.len() as u64 + self.constants.len() as u64)
    }
}

/// Order the equations appear in on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EquationOrder {
    /// Positions 0, 1, 2, ...
    Ascending,
    /// Positions count-1, ..., 1, 0 (signalled by a zero count word
    /// followed by the real count).
    Descending,
}

/// Streaming writer. Equations are buffered in serialized form as they
/// arrive, so the producer can free each one immediately; the file is
/// assembled once in [`EquationFileWriter::finish`], with every section
/// length-prefixed up front instead of patched in afterwards.
pub struct EquationFileWriter<W: Write> {
    out: W,
    header: EquationFileHeader,
    order: EquationOrder,
    count: u64,
    written: u64,
    buffer: Vec<u8>,
}

impl<W: Write> EquationFileWriter<W> {
    /// Start a file holding `count` equations in the given order.
    pub fn new(out: W, header: EquationFileHeader, order: EquationOrder, count: u64) -> Self {
        EquationFileWriter {
            out,
            header,
            order,
            count,
            written: 0,
            buffer: Vec::new(),
        }
    }

    fn expected_position(&self) -> u64 {
        match self.order {
            EquationOrder::Ascending => self.written,
            EquationOrder::Descending => self.count - 1 - self.written,
        }
    }

    /// Append one equation. Records must arrive in file order.
    pub fn write_equation(&mut self, record: &EquationRecord) -> CodecResult<()> {
        if self.written >= self.count {
            return Err(CodecError::Format(format!(
                "more than {} equations written",
                self.count
            )));
        }
        let expected = self.expected_position();
        if record.position != expected {
            return Err(CodecError::Format(format!(
                "equation arrived out of order: expected position {expected}, got {}",
                record.position
            )));
        }

        wire::write_u64(&mut self.buffer, record.position)?;
        wire::write_u64(&mut self.buffer, record.divisor_shift)?;
        wire::write_u64(&mut self.buffer, record.terms.len() as u64)?;
        for (term, scalar) in &record.terms {
            self.buffer
                .extend_from_slice(coeff::to_decimal_string(scalar).as_bytes());
            self.buffer.push(0);
            match term {
                TermRef::Unity => self.buffer.push(b'1'),
                TermRef::Input(index) => {
                    self.buffer.push(b'x');
                    wire::write_u64(&mut self.buffer, *index)?;
                }
                TermRef::Constant(index) => {
                    self.buffer.push(b'c');
                    wire::write_u64(&mut self.buffer, *index)?;
                }
                TermRef::Temporary(position) => {
                    self.buffer.push(b't');
                    wire::write_u64(&mut self.buffer, *position)?;
                }
            }
        }

        self.written += 1;
        Ok(())
    }

    /// Assemble and emit the file. Fails unless exactly the promised
    /// number of equations was written.
    pub fn finish(mut self) -> CodecResult<W> {
        if self.written != self.count {
            return Err(CodecError::Format(format!(
                "wrote {} of {} equations",
                self.written, self.count
            )));
        }

        let count_words: u64 = match self.order {
            EquationOrder::Ascending => 1,
            EquationOrder::Descending => 2,
        };
        let section_size = 8 * (2 + count_words) + self.buffer.len() as u64;
        let total_size = self.header.byte_len() + section_size + 8;

        let out = &mut self.out;
        wire::write_u64(out, total_size)?;
        wire::write_tag(out, &self.header.magic)?;
        wire::write_tag(out, &self.header.description)?;
        wire::write_u64(out, self.header.input_count)?;
        for _ in 0..5 {
            wire::write_u64(out, 0)?;
        }
        wire::write_u64(out, self.header.column_count)?;
        wire::write_u64(out, self.header.targets.len() as u64)?;
        for &target in &self.header.targets {
            wire::write_u64(out, target)?;
        }
        wire::write_u64(out, self.header.constants.len() as u64)?;
        for &constant in &self.header.constants {
            wire::write_u64(out, constant)?;
        }

        wire::write_u64(out, section_size)?;
        wire::write_tag(out, &TAG_EQUATIONS)?;
        if self.order == EquationOrder::Descending {
            wire::write_u64(out, 0)?;
        }
        wire::write_u64(out, self.count)?;
        out.write_all(&self.buffer)?;

        wire::write_tag(out, &TAG_END)?;
        out.flush()?;

        log::debug!(
            "wrote equation file: {} equations, {} bytes",
            self.count,
            total_size
        );
        Ok(self.out)
    }
}

/// Streaming reader with synchronization and cycle validation.
pub struct EquationFileReader<R: BufRead> {
    inner: R,
    header: EquationFileHeader,
    order: EquationOrder,
    count: u64,
    read: u64,
    finished: bool,
}

impl<R: BufRead> EquationFileReader<R> {
    /// Read the header and the equations-section preamble.
    pub fn new(mut inner: R) -> CodecResult<Self> {
        let total_size = wire::read_u64(&mut inner)?;
        let magic = wire::read_tag(&mut inner)?;
        let description = wire::read_tag(&mut inner)?;
        let input_count = wire::read_u64(&mut inner)?;
        for _ in 0..5 {
            wire::read_u64(&mut inner)?;
        }
        let column_count = wire::read_u64(&mut inner)?;

        let target_count = wire::read_u64(&mut inner)?;
        if target_count > (1 << 32) {
            return Err(CodecError::Format(format!(
                "implausible target count {target_count}"
            )));
        }
        let mut targets = Vec::with_capacity(target_count as usize);
        for _ in 0..target_count {
            targets.push(wire::read_u64(&mut inner)?);
        }

        let constant_count = wire::read_u64(&mut inner)?;
        if constant_count > (1 << 32) {
            return Err(CodecError::Format(format!(
                "implausible constant count {constant_count}"
            )));
        }
        let mut constants = Vec::with_capacity(constant_count as usize);
        for _ in 0..constant_count {
            constants.push(wire::read_u64(&mut inner)?);
        }

        let section_size = wire::read_u64(&mut inner)?;
        wire::expect_tag(&mut inner, &TAG_EQUATIONS, "equatns ")?;

        let first = wire::read_u64(&mut inner)?;
        let (order, count) = if first == 0 {
            (EquationOrder::Descending, wire::read_u64(&mut inner)?)
        } else {
            (EquationOrder::Ascending, first)
        };

        let header = EquationFileHeader {
            magic,
            description,
            input_count,
            column_count,
            targets,
            constants,
        };
        if total_size != header.byte_len() + section_size + 8 {
            return Err(CodecError::Format(format!(
                "file size {total_size} disagrees with section sizes"
            )));
        }

        Ok(EquationFileReader {
            inner,
            header,
            order,
            count,
            read: 0,
            finished: false,
        })
    }

    /// The parsed file header.
    pub fn header(&self) -> &EquationFileHeader {
        &self.header
    }

    /// Order the equations are stored in.
    pub fn order(&self) -> EquationOrder {
        self.order
    }

    /// Number of equations in the file.
    pub fn equation_count(&self) -> u64 {
        self.count
    }

    /// Read the next equation in file order, or `None` after the last one
    /// (at which point the end marker has been verified).
    pub fn next_equation(&mut self) -> CodecResult<Option<EquationRecord>> {
        if self.finished {
            return Ok(None);
        }
        if self.read == self.count {
            wire::expect_tag(&mut self.inner, &TAG_END, "endend  ")?;
            self.finished = true;
            return Ok(None);
        }

        let expected = match self.order {
            EquationOrder::Ascending => self.read,
            EquationOrder::Descending => self.count - 1 - self.read,
        };
        let synch = wire::read_u64(&mut self.inner)?;
        if synch != expected {
            return Err(CodecError::Format(format!(
                "synchronization lost: expected equation {expected}, found {synch}"
            )));
        }
        let divisor_shift = wire::read_u64(&mut self.inner)?;
        let operand_count = wire::read_u64(&mut self.inner)?;
        if operand_count > (1 << 32) {
            return Err(CodecError::Format(format!(
                "implausible operand count {operand_count} in equation {synch}"
            )));
        }

        let mut terms = Vec::with_capacity(operand_count as usize);
        for _ in 0..operand_count {
            let scalar = self.read_coefficient(synch)?;
            let kind = self.read_byte()?;
            let term = match kind {
                b'1' => TermRef::Unity,
                b'x' => TermRef::Input(wire::read_u64(&mut self.inner)?),
                b'c' => TermRef::Constant(wire::read_u64(&mut self.inner)?),
                b't' => {
                    let reference = wire::read_u64(&mut self.inner)?;
                    if reference >= synch {
                        return Err(CodecError::Cycle {
                            position: synch,
                            reference,
                        });
                    }
                    TermRef::Temporary(reference)
                }
                other => {
                    return Err(CodecError::Format(format!(
                        "unknown operand kind {:#04x} in equation {synch}",
                        other
                    )))
                }
            };
            // dropped terms serialize as explicit zeros; skip them
            if !scalar.is_zero() {
                terms.push((term, scalar));
            }
        }

        self.read += 1;
        if self.read == self.count {
            wire::expect_tag(&mut self.inner, &TAG_END, "endend  ")?;
            self.finished = true;
        }

        Ok(Some(EquationRecord {
            position: synch,
            divisor_shift,
            terms,
        }))
    }

    fn read_byte(&mut self) -> CodecResult<u8> {
        let mut byte = [0u8; 1];
        self.inner.read_exact(&mut byte).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                CodecError::Format("unexpected end of file".into())
            } else {
                CodecError::Io(e)
            }
        })?;
        Ok(byte[0])
    }

    fn read_coefficient(&mut self, position: u64) -> CodecResult<Coeff> {
        let mut raw = Vec::new();
        self.inner.read_until(0, &mut raw)?;
        if raw.pop() != Some(0) {
            return Err(CodecError::Format("unexpected end of file".into()));
        }
        let text = std::str::from_utf8(&raw).map_err(|_| {
            CodecError::Format(format!("non-ascii coefficient in equation {position}"))
        })?;
        coeff::from_decimal_str(text).ok_or_else(|| {
            CodecError::Format(format!(
                "unparseable coefficient '{text}' in equation {position}"
            ))
        })
    }
}

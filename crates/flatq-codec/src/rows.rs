//! The row-chunk exchange format.
//!
//! A generator converts the equation file into one dense matrix row per
//! equation so a consumer can build its matrix without ever holding two
//! copies of the system in memory. Each row is
//! `[byte length][equation index][column values...]`; the consumer reads
//! multi-row blocks whose total length must be an exact multiple of the
//! row stride.
//!
//! Column layout: unknown inputs, temporaries, constants excluding unity,
//! unity. Coefficients arrive as mod-2 rationals with power-of-two
//! denominators; each is lifted to the word modulus `2^(W+1)` by scaling
//! with `2^W`, which clears every denominator the flattener can produce
//! and turns the defined temporary's implicit coefficient into the sign
//! constant `2^W`.

use std::io::{Read, Write};

use flatq_core::coeff::Coeff;
use flatq_core::{EquationRecord, TermRef};
use hashbrown::HashMap;
use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, ToPrimitive, Zero};

use crate::error::{CodecError, CodecResult};
use crate::wire::{self, TAG_PROBLEM};

/// Target size for a read block; rounded to a whole number of rows.
const BLOCK_BYTES: u64 = 8 * 1024 * 1024;

/// The row file's header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFileHeader {
    /// Number of equations (= temporaries = rows).
    pub equation_count: u64,
    /// Number of unknown input bits.
    pub input_count: u64,
    /// Number of matrix columns, including unity.
    pub column_count: u64,
    /// Output bit -> equation position mapping.
    pub targets: Vec<u64>,
    /// Constant bit values; entry 0 is unity.
    pub constants: Vec<u64>,
}

impl RowFileHeader {
    /// Words per row record: length, equation index, then the columns.
    pub fn row_words(&self) -> u64 {
        self.column_count + 2
    }

    /// Bytes per row record.
    pub fn row_bytes(&self) -> u64 {
        8 * self.row_words()
    }

    fn byte_len(&self) -> u64 {
        8 * (11 + self.targets.len() as u64 + self.constants.len() as u64)
    }

    fn write<W: Write>(&self, out: &mut W) -> CodecResult<()> {
        wire::write_u64(out, self.byte_len())?;
        wire::write_tag(out, &TAG_PROBLEM)?;
        wire::write_u64(out, self.equation_count)?;
        wire::write_u64(out, self.input_count)?;
        for _ in 0..4 {
            wire::write_u64(out, 0)?;
        }
        wire::write_u64(out, self.column_count)?;
        wire::write_u64(out, self.targets.len() as u64)?;
        for &target in &self.targets {
            wire::write_u64(out, target)?;
        }
        wire::write_u64(out, self.constants.len() as u64)?;
        for &constant in &self.constants {
            wire::write_u64(out, constant)?;
        }
        Ok(())
    }

    fn read<R: Read>(input: &mut R) -> CodecResult<Self> {
        let size = wire::read_u64(input)?;
        wire::expect_tag(input, &TAG_PROBLEM, "problemd")?;
        let equation_count = wire::read_u64(input)?;
        let input_count = wire::read_u64(input)?;
        for _ in 0..4 {
            wire::read_u64(input)?;
        }
        let column_count = wire::read_u64(input)?;

        let target_count = wire::read_u64(input)?;
        if target_count > (1 << 32) {
            return Err(CodecError::Format(format!(
                "implausible target count {target_count}"
            )));
        }
        let mut targets = Vec::with_capacity(target_count as usize);
        for _ in 0..target_count {
            targets.push(wire::read_u64(input)?);
        }

        let constant_count = wire::read_u64(input)?;
        if constant_count > (1 << 32) {
            return Err(CodecError::Format(format!(
                "implausible constant count {constant_count}"
            )));
        }
        let mut constants = Vec::with_capacity(constant_count as usize);
        for _ in 0..constant_count {
            constants.push(wire::read_u64(input)?);
        }

        let header = RowFileHeader {
            equation_count,
            input_count,
            column_count,
            targets,
            constants,
        };
        if size != header.byte_len() {
            return Err(CodecError::Format(format!(
                "header size {size} disagrees with its contents"
            )));
        }
        Ok(header)
    }
}

/// Writes the header and one dense row per equation.
pub struct RowFileWriter<W: Write> {
    out: W,
    header: RowFileHeader,
    word_bits: u32,
    columns: HashMap<TermColumn, u64>,
    row: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TermColumn {
    Unity,
    Input(u64),
    Constant(u64),
    Temporary(u64),
}

impl From<&TermRef> for TermColumn {
    fn from(term: &TermRef) -> Self {
        match term {
            TermRef::Unity => TermColumn::Unity,
            TermRef::Input(i) => TermColumn::Input(*i),
            TermRef::Constant(i) => TermColumn::Constant(*i),
            TermRef::Temporary(p) => TermColumn::Temporary(*p),
        }
    }
}

impl<W: Write> RowFileWriter<W> {
    /// Write the header and prepare the operand-to-column mapping.
    pub fn new(mut out: W, header: RowFileHeader, word_bits: u32) -> CodecResult<Self> {
        let expected_columns =
            header.input_count + header.equation_count + header.constants.len() as u64;
        if header.column_count != expected_columns {
            return Err(CodecError::Format(format!(
                "column count {} disagrees with {} inputs + {} temporaries + {} constants",
                header.column_count,
                header.input_count,
                header.equation_count,
                header.constants.len()
            )));
        }

        let mut columns = HashMap::new();
        let mut next = 0u64;
        for i in 0..header.input_count {
            columns.insert(TermColumn::Input(i), next);
            next += 1;
        }
        for i in 0..header.equation_count {
            columns.insert(TermColumn::Temporary(i), next);
            next += 1;
        }
        for i in 1..header.constants.len() as u64 {
            // constant 0 is unity, which takes the final column
            columns.insert(TermColumn::Constant(i), next);
            next += 1;
        }
        columns.insert(TermColumn::Unity, next);

        header.write(&mut out)?;
        let row = vec![0u64; header.row_words() as usize];
        Ok(RowFileWriter {
            out,
            header,
            word_bits,
            columns,
            row,
        })
    }

    /// Convert one equation into a dense row and write it.
    pub fn write_equation(&mut self, record: &EquationRecord) -> CodecResult<()> {
        if record.divisor_shift != 0 {
            return Err(CodecError::Format(format!(
                "equation {} has divisor shift {}; expected mod-2 input",
                record.position, record.divisor_shift
            )));
        }
        if record.position >= self.header.equation_count {
            return Err(CodecError::Format(format!(
                "equation index {} out of range",
                record.position
            )));
        }

        self.row.fill(0);
        self.row[0] = self.header.row_bytes();
        self.row[1] = record.position;

        // the operand this equation defines carries the sign constant
        let definer = 2 + self.header.input_count + record.position;
        self.row[definer as usize] = 1u64 << self.word_bits;

        for (term, scalar) in &record.terms {
            if scalar.is_zero() {
                continue;
            }
            let column = *self
                .columns
                .get(&TermColumn::from(term))
                .ok_or_else(|| {
                    CodecError::Format(format!(
                        "equation {} references an unmapped operand",
                        record.position
                    ))
                })?;
            self.row[(2 + column) as usize] = self.lift(scalar, record.position)?;
        }

        self.out
            .write_all(&words_to_bytes(&self.row))
            .map_err(CodecError::Io)?;
        Ok(())
    }

    /// Lift a mod-2 rational coefficient into `[0, 2^(W+1))`.
    fn lift(&self, scalar: &Coeff, position: u64) -> CodecResult<u64> {
        let scaled = scalar * Coeff::from_integer(BigInt::one() << (self.word_bits as usize));
        if !scaled.denom().is_one() {
            return Err(CodecError::Format(format!(
                "coefficient in equation {position} does not clear to a {}-bit base",
                self.word_bits + 1
            )));
        }
        let modulus = BigInt::one() << (self.word_bits as usize + 1);
        let value = scaled.numer().mod_floor(&modulus);
        value.to_u64().ok_or_else(|| {
            CodecError::Format(format!("coefficient overflow in equation {position}"))
        })
    }

    /// Flush and hand back the underlying writer.
    pub fn finish(mut self) -> CodecResult<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

fn words_to_bytes(words: &[u64]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(words.len() * 8);
    for word in words {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    bytes
}

/// Reads rows back in large blocks.
pub struct RowFileReader<R: Read> {
    inner: R,
    header: RowFileHeader,
    block: Vec<u8>,
}

impl<R: Read> RowFileReader<R> {
    /// Read the header and size the block buffer: the row stride, scaled
    /// up to the largest multiple that fits the block target.
    pub fn new(mut inner: R) -> CodecResult<Self> {
        let header = RowFileHeader::read(&mut inner)?;
        let stride = header.row_bytes();
        if stride == 0 {
            return Err(CodecError::Format("zero-width rows".into()));
        }
        let block_bytes = if stride >= BLOCK_BYTES {
            stride
        } else {
            stride * (BLOCK_BYTES / stride)
        };
        Ok(RowFileReader {
            inner,
            header,
            block: vec![0u8; block_bytes as usize],
        })
    }

    /// The parsed header.
    pub fn header(&self) -> &RowFileHeader {
        &self.header
    }

    /// Stream every row through `handle(equation_index, column_values)`.
    ///
    /// Blocks are read at full buffer size; a final block that is not an
    /// exact multiple of the row stride means the file ended early.
    pub fn for_each_row<F, E>(&mut self, mut handle: F) -> Result<(), E>
    where
        F: FnMut(u64, &[u64]) -> Result<(), E>,
        E: From<CodecError>,
    {
        let stride = self.header.row_bytes() as usize;
        let mut scratch: Vec<u64> = Vec::with_capacity(self.header.row_words() as usize);

        loop {
            let filled = fill_block(&mut self.inner, &mut self.block).map_err(E::from)?;
            if filled == 0 {
                return Ok(());
            }
            if filled % stride != 0 {
                return Err(E::from(CodecError::Format(
                    "read an incorrect number of bytes; does the file end early?".into(),
                )));
            }

            for raw in self.block[..filled].chunks_exact(stride) {
                scratch.clear();
                for word in raw.chunks_exact(8) {
                    let mut bytes = [0u8; 8];
                    bytes.copy_from_slice(word);
                    scratch.push(u64::from_le_bytes(bytes));
                }
                if scratch[0] != stride as u64 {
                    return Err(E::from(CodecError::Format(format!(
                        "invalid row length {}; expected {stride}",
                        scratch[0]
                    ))));
                }
                handle(scratch[1], &scratch[2..])?;
            }
        }
    }
}

/// Read until the buffer is full or the stream ends.
fn fill_block<R: Read>(input: &mut R, block: &mut [u8]) -> CodecResult<usize> {
    let mut filled = 0;
    while filled < block.len() {
        match input.read(&mut block[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CodecError::Io(e)),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigInt;
    use std::io::Cursor;

    fn q(n: i64, d: i64) -> Coeff {
        Coeff::new(BigInt::from(n), BigInt::from(d))
    }

    fn header() -> RowFileHeader {
        RowFileHeader {
            equation_count: 2,
            input_count: 2,
            column_count: 2 + 2 + 1, // inputs, temporaries, unity
            targets: vec![1],
            constants: vec![1],
        }
    }

    fn toy_records() -> Vec<EquationRecord> {
        vec![
            EquationRecord {
                position: 0,
                divisor_shift: 0,
                terms: vec![(TermRef::Input(0), q(1, 1)), (TermRef::Input(1), q(1, 1))],
            },
            EquationRecord {
                position: 1,
                divisor_shift: 0,
                terms: vec![
                    (TermRef::Input(0), q(1, 2)),
                    (TermRef::Input(1), q(1, 2)),
                    (TermRef::Temporary(0), q(-1, 2)),
                ],
            },
        ]
    }

    #[test]
    fn test_rows_round_trip() {
        let mut writer = RowFileWriter::new(Vec::new(), header(), 32).unwrap();
        for record in &toy_records() {
            writer.write_equation(record).unwrap();
        }
        let bytes = writer.finish().unwrap();

        let mut reader = RowFileReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.header(), &header());

        let mut rows = Vec::new();
        reader
            .for_each_row::<_, CodecError>(|position, values| {
                rows.push((position, values.to_vec()));
                Ok(())
            })
            .unwrap();

        assert_eq!(rows.len(), 2);
        // x0 + x1 scaled by 2^32, with the sign constant on t0's column
        let (position, values) = &rows[0];
        assert_eq!(*position, 0);
        assert_eq!(values[0], 1u64 << 32);
        assert_eq!(values[1], 1u64 << 32);
        assert_eq!(values[2], 1u64 << 32); // definer
        assert_eq!(values[3], 0);
        assert_eq!(values[4], 0); // unity column

        // x0/2 + x1/2 - t0/2: halves become 2^31, the negative half wraps
        let (position, values) = &rows[1];
        assert_eq!(*position, 1);
        assert_eq!(values[0], 1u64 << 31);
        assert_eq!(values[1], 1u64 << 31);
        assert_eq!(values[2], (1u64 << 33) - (1u64 << 31)); // -2^31 mod 2^33
        assert_eq!(values[3], 1u64 << 32); // definer
    }

    #[test]
    fn test_short_file_is_rejected() {
        let mut writer = RowFileWriter::new(Vec::new(), header(), 32).unwrap();
        for record in &toy_records() {
            writer.write_equation(record).unwrap();
        }
        let mut bytes = writer.finish().unwrap();
        bytes.truncate(bytes.len() - 4); // tear the last row

        let mut reader = RowFileReader::new(Cursor::new(bytes)).unwrap();
        let result = reader.for_each_row::<_, CodecError>(|_, _| Ok(()));
        assert!(matches!(result, Err(CodecError::Format(_))));
    }

    #[test]
    fn test_fractional_overflow_is_rejected() {
        let mut writer = RowFileWriter::new(Vec::new(), header(), 32).unwrap();
        let record = EquationRecord {
            position: 0,
            divisor_shift: 0,
            // 2^-33 cannot clear to an integer after the 2^32 lift
            terms: vec![(TermRef::Input(0), q(1, 1i64 << 33))],
        };
        assert!(matches!(
            writer.write_equation(&record),
            Err(CodecError::Format(_))
        ));
    }

    #[test]
    fn test_nonzero_divisor_shift_is_rejected() {
        let mut writer = RowFileWriter::new(Vec::new(), header(), 32).unwrap();
        let record = EquationRecord {
            position: 0,
            divisor_shift: 1,
            terms: vec![],
        };
        assert!(matches!(
            writer.write_equation(&record),
            Err(CodecError::Format(_))
        ));
    }
}

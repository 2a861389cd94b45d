//! Matrix construction and solution checking.
//!
//! The matrix holds one row per compiled equation plus one extra row per
//! output target demanding that output's temporary be zero. Construction
//! streams the row-chunk file: each row is written into the staging row
//! and accepted into place through the [`AcceptRow`] contract.
//!
//! Checking is a single ascending row-at-a-time sweep: each equation row
//! is evaluated over the already-known columns and thereby defines its
//! temporary, which later rows then consume. There is no revisiting; the
//! whole pass is O(rows x width).

use std::io::Read;

use flatq_codec::{RowFileHeader, RowFileReader, TARGET_ALWAYS_ZERO};

use crate::error::{MatrixError, MatrixResult};
use crate::matrix::Matrix;
use crate::word::{Word, SIGN};

/// The row acceptance contract: a producer fills the staging row, then the
/// acceptor moves it into its final position.
pub trait AcceptRow {
    /// Called once with the parsed header before any row arrives.
    fn begin(&mut self, _header: &RowFileHeader) {}

    /// Move the staging row into row `position` and clear the staging row.
    fn accept_row(&mut self, matrix: &mut Matrix, position: u64) -> MatrixResult<()> {
        let staging = matrix.staging_row();
        for col in 0..matrix.logical_width() {
            let value = matrix.get(staging, col);
            matrix.set(position as usize, col, value)?;
            matrix.set(staging, col, Word::default())?;
        }
        Ok(())
    }

    /// Called once after the last row.
    fn end(&mut self, _matrix: &Matrix) {}
}

/// The plain acceptor: rows land exactly where the file says.
#[derive(Debug, Default)]
pub struct RawAcceptor;

impl AcceptRow for RawAcceptor {}

/// Build the verification matrix from a row-chunk file.
///
/// Sizes the matrix at `equations + targets` rows by `columns`, places one
/// "this output must be zero" row per real target before the equation
/// rows stream in, and hands every row to the acceptor.
pub fn build_matrix<R: Read, A: AcceptRow>(
    reader: &mut RowFileReader<R>,
    acceptor: &mut A,
) -> MatrixResult<Matrix> {
    let header = reader.header().clone();
    let rows = (header.equation_count + header.targets.len() as u64) as usize;
    let columns = header.column_count as usize;
    let mut matrix = Matrix::new(rows, columns);

    acceptor.begin(&header);

    for (i, &target) in header.targets.iter().enumerate().rev() {
        if target == TARGET_ALWAYS_ZERO {
            continue;
        }
        let staging = matrix.staging_row();
        matrix.zero_row(staging)?;
        // demand the output temporary be zero: a single 1 in its column
        matrix.set(
            staging,
            (header.input_count + target) as usize,
            Word::new(1),
        )?;
        acceptor.accept_row(&mut matrix, header.equation_count + i as u64)?;
    }

    reader.for_each_row(|position, values| -> MatrixResult<()> {
        if position >= header.equation_count {
            return Err(MatrixError::Format(format!(
                "equation index {position} out of range"
            )));
        }
        if values.len() != columns {
            return Err(MatrixError::Format(format!(
                "row {position} has {} columns; expected {columns}",
                values.len()
            )));
        }
        let staging = matrix.staging_row();
        matrix.zero_row(staging)?;
        for (col, &value) in values.iter().enumerate() {
            matrix.set(staging, col, Word::new(value))?;
        }
        acceptor.accept_row(&mut matrix, position)
    })?;

    acceptor.end(&matrix);

    log::debug!(
        "built {}x{} matrix, active height {}",
        matrix.logical_height(),
        matrix.logical_width(),
        matrix.active_height()
    );

    Ok(matrix)
}

/// Everything the checking sweep derives.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    /// Value per logical column, where known.
    pub values: Vec<Option<bool>>,
    /// Equation rows whose residue was neither 0 nor the sign constant.
    pub failed_rows: Vec<u64>,
    /// Derived output bits, one per target.
    pub outputs: Vec<Option<bool>>,
}

impl CheckOutcome {
    /// True iff every equation row checked out.
    pub fn passed(&self) -> bool {
        self.failed_rows.is_empty()
    }
}

/// Run the checking sweep against a candidate input assignment.
///
/// Loads constants and the candidate inputs into the column value vector,
/// then walks the equation rows in ascending order. Each row's definer
/// coefficient must be exactly the sign constant `2^32`; the sum of
/// `coefficient * value` over the known columns must then land on 0
/// (temporary is 0) or cancel the definer modulo `2^33` (temporary is 1).
/// Any other residue marks the row failed and leaves the temporary
/// unknown; a later row that needs an unknown value is a hard error.
///
/// The matrix is not mutated: checking twice gives identical outcomes.
pub fn check_solution(
    matrix: &Matrix,
    header: &RowFileHeader,
    inputs: &[bool],
) -> MatrixResult<CheckOutcome> {
    let width = matrix.logical_width();
    let equations = header.equation_count as usize;
    let input_count = header.input_count as usize;

    if inputs.len() != input_count {
        return Err(MatrixError::Format(format!(
            "solution holds {} bits; the system has {input_count} unknown inputs",
            inputs.len()
        )));
    }

    let mut values: Vec<Option<bool>> = vec![None; width];
    for (i, &bit) in inputs.iter().enumerate() {
        values[i] = Some(bit);
    }

    // constants follow the temporaries; unity is the rightmost column
    let mut next = input_count + equations;
    for (i, &constant) in header.constants.iter().enumerate() {
        if i == 0 {
            continue; // unity
        }
        values[next] = Some(constant != 0);
        next += 1;
    }
    values[next] = Some(true);

    let mut failed_rows = Vec::new();

    for row in 0..equations {
        let definer_col = input_count + row;
        let definer = matrix.get(row, definer_col);
        if definer.value() != SIGN {
            return Err(MatrixError::Format(format!(
                "row {row} defines its temporary with {definer} instead of the sign constant"
            )));
        }

        let mut sum = Word::default();
        for col in 0..width {
            if col == definer_col {
                continue;
            }
            let scalar = matrix.get(row, col);
            if scalar.is_zero() {
                continue;
            }
            let value = values[col].ok_or(MatrixError::UnknownValue {
                row: row as u64,
                column: col as u64,
            })?;
            if value {
                sum = sum + scalar;
            }
        }

        if sum.is_zero() {
            values[definer_col] = Some(false);
        } else if (sum + definer).is_zero() {
            values[definer_col] = Some(true);
        } else {
            log::debug!(
                "row {row}: residue {:#x} is neither 0 nor the sign constant",
                sum.value()
            );
            failed_rows.push(row as u64);
        }
    }

    let outputs = header
        .targets
        .iter()
        .map(|&target| {
            if target == TARGET_ALWAYS_ZERO {
                Some(false)
            } else {
                values[input_count + target as usize]
            }
        })
        .collect();

    Ok(CheckOutcome {
        values,
        failed_rows,
        outputs,
    })
}

/// Verify that every nonzero row of the matrix sums to zero under the
/// given column values. Used after checking (the zero-target rows) and
/// after elimination (reduced rows are combinations of the originals, so
/// a satisfying assignment must still clear them).
pub fn verify_rows_zero(matrix: &Matrix, values: &[Option<bool>]) -> MatrixResult<()> {
    if values.len() < matrix.logical_width() {
        return Err(MatrixError::Format(format!(
            "{} column values supplied; the matrix has {}",
            values.len(),
            matrix.logical_width()
        )));
    }

    for row in 0..matrix.logical_height() {
        if matrix.row_is_all_zeros(row) {
            continue;
        }
        let mut sum = Word::default();
        for col in 0..matrix.logical_width() {
            let scalar = matrix.get(row, col);
            if scalar.is_zero() {
                continue;
            }
            let value = values[col].ok_or(MatrixError::UnknownValue {
                row: row as u64,
                column: col as u64,
            })?;
            if value {
                sum = sum + scalar;
            }
        }
        if !sum.is_zero() {
            return Err(MatrixError::InconsistentEquation {
                row: row as u64,
                residue: sum.value(),
            });
        }
    }

    Ok(())
}

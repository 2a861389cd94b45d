//! Logical matrix view and row reduction.
//!
//! [`Matrix`] layers three things over the dense buffer:
//! - a column indirection `actual_columns[logical] -> physical`, so
//!   deleting or promoting a logical column is an O(width) index update
//!   and never moves row data;
//! - a per-row unity accumulator folded into reads of the rightmost
//!   logical column, so a known-constant term can be absorbed into every
//!   row without rewriting the buffer;
//! - the staging row, written by a producer and copied into place through
//!   the accept-row contract.
//!
//! The rightmost logical column is always the unity column.
//!
//! [`Matrix::row_reduce`] is Gaussian elimination adapted to the modulus
//! `2^33`. A candidate row cannot simply be divided by its leading value
//! (the modulus is not prime); instead each row is scaled so its leading
//! value becomes a power of two, rows are grouped by that power, and the
//! lowest power is swapped into the pivot slot. Every leading value then
//! divides the ones below it, so ordinary subtract-a-multiple elimination
//! clears the column.

use crate::error::{MatrixError, MatrixResult};
use crate::dense::DenseMatrix;
use crate::word::{Word, MODULUS_BITS};

/// A logical view over a dense modular matrix.
#[derive(Debug, Clone)]
pub struct Matrix {
    storage: DenseMatrix,
    unity_adder: Vec<Word>,
    actual_columns: Vec<Option<usize>>,
    logical_height: usize,
    logical_width: usize,
}

impl Matrix {
    /// Create a zeroed matrix with `height` visible rows plus the staging
    /// row, and `width` columns whose rightmost is unity.
    pub fn new(height: usize, width: usize) -> Self {
        Matrix {
            storage: DenseMatrix::new(height, width),
            unity_adder: vec![Word::default(); height + 1],
            actual_columns: (0..width).map(Some).collect(),
            logical_height: height + 1,
            logical_width: width,
        }
    }

    /// Logical height, staging row included.
    pub fn logical_height(&self) -> usize {
        self.logical_height
    }

    /// Logical width, unity column included.
    pub fn logical_width(&self) -> usize {
        self.logical_width
    }

    /// Index of the staging row.
    pub fn staging_row(&self) -> usize {
        self.logical_height - 1
    }

    /// The physical column a logical column maps to, if it still exists.
    pub fn physical_column(&self, logical: usize) -> Option<usize> {
        self.actual_columns.get(logical).copied().flatten()
    }

    /// Read entry `(row, col)`. Out-of-range and deleted columns read as
    /// zero; the rightmost column folds the row's unity accumulator in.
    pub fn get(&self, row: usize, col: usize) -> Word {
        if row >= self.logical_height || col >= self.logical_width {
            return Word::default();
        }
        let Some(physical) = self.actual_columns[col] else {
            return Word::default();
        };
        let mut value = self.storage.get(row, physical);
        if col == self.logical_width - 1 {
            value = value + self.unity_adder[row];
        }
        value
    }

    /// Write entry `(row, col)`. Writing the rightmost column clears that
    /// row's unity accumulator, since the stored value now stands alone.
    pub fn set(&mut self, row: usize, col: usize, value: Word) -> MatrixResult<()> {
        if row >= self.logical_height || col >= self.logical_width {
            return Err(MatrixError::InvalidAccess(format!(
                "set({row}, {col}) outside {}x{}",
                self.logical_height, self.logical_width
            )));
        }
        let Some(physical) = self.actual_columns[col] else {
            return Err(MatrixError::InvalidAccess(format!(
                "set({row}, {col}) targets a deleted column"
            )));
        };
        self.storage.set(row, physical, value);
        if col == self.logical_width - 1 {
            self.unity_adder[row] = Word::default();
        }
        Ok(())
    }

    /// Add `value` into a cell.
    pub fn add(&mut self, row: usize, col: usize, value: Word) -> MatrixResult<()> {
        let sum = self.get(row, col) + value;
        self.set(row, col, sum)
    }

    /// Fold `adder` into the row's unity accumulator.
    pub fn add_to_row(&mut self, row: usize, adder: Word) -> MatrixResult<()> {
        if row >= self.logical_height {
            return Err(MatrixError::InvalidAccess(format!(
                "add_to_row({row}) outside height {}",
                self.logical_height
            )));
        }
        self.unity_adder[row] = self.unity_adder[row] + adder;
        Ok(())
    }

    /// Zero the row in physical storage (the unity accumulator is left
    /// untouched, matching a raw buffer wipe).
    pub fn zero_row(&mut self, row: usize) -> MatrixResult<()> {
        if row >= self.logical_height {
            return Err(MatrixError::InvalidAccess(format!(
                "zero_row({row}) outside height {}",
                self.logical_height
            )));
        }
        self.storage.zero_row(row);
        Ok(())
    }

    /// True iff every logical entry of the row reads zero.
    pub fn row_is_all_zeros(&self, row: usize) -> bool {
        (0..self.logical_width).all(|col| self.get(row, col).is_zero())
    }

    /// One past the last row that is not all zeros.
    pub fn active_height(&self) -> usize {
        let mut rows = 0;
        for row in 0..self.logical_height {
            if !self.row_is_all_zeros(row) {
                rows = row + 1;
            }
        }
        rows
    }

    /// Shrink or grow the logical height within the allocated capacity.
    pub fn set_logical_height(&mut self, height: usize) -> MatrixResult<()> {
        if height > self.storage.height() + 1 {
            return Err(MatrixError::InvalidAccess(format!(
                "logical height {height} exceeds capacity {}",
                self.storage.height() + 1
            )));
        }
        self.logical_height = height;
        Ok(())
    }

    /// Delete a logical column in O(width). The data is not moved; later
    /// columns shift left in the index array. The unity column must stay.
    pub fn erase_column(&mut self, col: usize) -> MatrixResult<()> {
        if col >= self.logical_width {
            return Err(MatrixError::InvalidAccess(format!(
                "erase_column({col}) outside width {}",
                self.logical_width
            )));
        }
        if col == self.logical_width - 1 {
            return Err(MatrixError::InvalidAccess(
                "the unity column cannot be deleted".into(),
            ));
        }
        for x in col..self.logical_width - 1 {
            self.actual_columns[x] = self.actual_columns[x + 1];
        }
        self.actual_columns[self.logical_width - 1] = None;
        self.logical_width -= 1;
        Ok(())
    }

    /// Move a logical column to the far right, just left of unity, in
    /// O(width). Used to park columns whose value has become known.
    pub fn promote_constant_column(&mut self, col: usize) -> MatrixResult<()> {
        if col + 1 >= self.logical_width {
            return Err(MatrixError::InvalidAccess(
                "the unity column cannot be promoted".into(),
            ));
        }
        let former = self.actual_columns[col];
        for x in col..self.logical_width - 1 {
            self.actual_columns[x] = self.actual_columns[x + 1];
        }
        self.actual_columns[self.logical_width - 1] = former;
        // return the unity column to its rightmost slot
        self.actual_columns
            .swap(self.logical_width - 1, self.logical_width - 2);
        Ok(())
    }

    /// Fold `col * value` into every row's unity accumulator, then delete
    /// the column. Not applicable to unity itself.
    pub fn set_column_value(&mut self, col: usize, value: Word) -> MatrixResult<()> {
        if col == self.logical_width - 1 {
            return Err(MatrixError::InvalidAccess(
                "the unity column's value is fixed".into(),
            ));
        }
        for row in 0..self.logical_height {
            let scalar = self.get(row, col);
            if scalar.is_zero() {
                continue;
            }
            self.add_to_row(row, scalar * value)?;
        }
        self.erase_column(col)
    }

    /// Add `scalar` times row `src` into row `dest`.
    pub fn add_rows(&mut self, dest: usize, src: usize, scalar: Word) -> MatrixResult<()> {
        if scalar.is_zero() {
            return Ok(());
        }
        for col in 0..self.logical_width {
            let value = self.get(src, col) * scalar;
            self.add(dest, col, value)?;
        }
        Ok(())
    }

    /// Scale a row in place.
    pub fn multiply_row(&mut self, row: usize, scalar: Word) -> MatrixResult<()> {
        for col in 0..self.logical_width {
            let value = self.get(row, col) * scalar;
            self.set(row, col, value)?;
        }
        Ok(())
    }

    /// Leftmost column of row `row` holding a nonzero value, or `width`.
    pub fn leading_nonzero_column(&self, row: usize) -> usize {
        (0..self.logical_width)
            .find(|&col| !self.get(row, col).is_zero())
            .unwrap_or(self.logical_width)
    }

    fn leftmost_nonzero_column(&self, skip: usize, height: usize) -> usize {
        for col in 0..self.logical_width {
            for row in skip..height {
                if !self.get(row, col).is_zero() {
                    return col;
                }
            }
        }
        self.logical_width
    }

    /// Gaussian elimination over `Z / 2^33`.
    ///
    /// Rows at or below the skip line are normalized so their leading
    /// values become powers of two, the lowest power is swapped into the
    /// pivot slot, and every row below has a scaled pivot row subtracted.
    /// A nonzero row whose leading value lands in the unity column is a
    /// contradiction.
    pub fn row_reduce(&mut self) -> MatrixResult<()> {
        let height = self.active_height();
        let width = self.logical_width;
        log::debug!("reducing {height} active rows x {width} columns");
        if height == 0 || width == 0 {
            return Ok(());
        }

        let mut skip = 0;
        while skip < height {
            if skip % 64 == 0 {
                log::trace!("reduction at row {skip}/{height}");
            }

            if (skip..height).all(|row| self.row_is_all_zeros(row)) {
                break;
            }

            let pivot_col = self.leftmost_nonzero_column(skip, height);
            if pivot_col >= width - 1 {
                if pivot_col == width {
                    continue;
                }
                // a row reduces to "unity * nonzero = 0"
                log::debug!(
                    "contradiction: column {pivot_col} value {}",
                    self.get(skip, pivot_col)
                );
                return Err(MatrixError::Contradiction {
                    column: pivot_col as u64,
                });
            }

            // group rows by the power of two their leading value
            // normalizes to
            let mut powers = [height; MODULUS_BITS as usize];
            let mut lowest_power = MODULUS_BITS as usize;

            for row in skip..height {
                let leading = self.leading_nonzero_column(row);
                if leading >= width - 1 {
                    continue;
                }
                let value = self.get(row, leading);
                let scalar = value.scalar_for_power_of_two().ok_or_else(|| {
                    MatrixError::Internal(format!(
                        "value {value} in row {row} could not be scaled to a power of two"
                    ))
                })?;
                if scalar.value() != 1 {
                    self.multiply_row(row, scalar)?;
                }

                let value = self.get(row, pivot_col);
                if value.is_zero() {
                    continue;
                }
                let shift = value.value().trailing_zeros() as usize;
                if powers[shift] != height {
                    continue;
                }
                powers[shift] = row;
                if shift < lowest_power {
                    lowest_power = shift;
                }
            }

            if lowest_power == MODULUS_BITS as usize {
                return Err(MatrixError::Internal(format!(
                    "no usable pivot in column {pivot_col}"
                )));
            }

            // swap the lowest-power row into the pivot slot
            let pivot_row = skip;
            let src_row = powers[lowest_power];
            if src_row != pivot_row {
                for col in 0..width {
                    let tmp = self.get(src_row, col);
                    let other = self.get(pivot_row, col);
                    self.set(src_row, col, other)?;
                    self.set(pivot_row, col, tmp)?;
                }
            }

            // clear the column below the pivot
            let pivot_value = self.get(pivot_row, pivot_col);
            for row in pivot_row + 1..height {
                let below = self.get(row, pivot_col);
                if below.is_zero() {
                    continue;
                }
                let scalar = Word::new(below.value() / pivot_value.value());
                for col in 0..width {
                    let value = self.get(row, col) - self.get(pivot_row, col) * scalar;
                    self.set(row, col, value)?;
                }
                if !self.get(row, pivot_col).is_zero() {
                    return Err(MatrixError::Internal(format!(
                        "column {pivot_col} did not clear below the pivot"
                    )));
                }
            }

            if !self.row_is_all_zeros(skip) {
                skip += 1;
            }
        }

        log::debug!("reduction complete, active height {}", self.active_height());
        Ok(())
    }
}

//! Symbolic machine words.
//!
//! A [`SymWord`] carries the same value in two shapes: a single "gather"
//! operator holding `sum(bit_i * 2^i) / 2^(W-1)` for whole-word
//! arithmetic, and one operator per bit for bitwise access. Scattering a
//! gathered sum back into bits introduces one fresh mod-2 temporary per
//! bit; the division chain peels bits off from the bottom, and any carry
//! overflow past the top bit lands on even terms that vanish modulo 2.

use flatq_core::coeff::Coeff;
use flatq_core::{OperatorId, System};
use num_bigint::BigInt;
use num_traits::One;

/// An immutable word of `system.word_bits()` bits.
#[derive(Debug, Clone)]
pub struct SymWord {
    gather: OperatorId,
    bits: Vec<OperatorId>,
}

impl SymWord {
    /// A word holding a literal value.
    pub fn literal(system: &mut System, value: u32) -> SymWord {
        let width = system.word_bits() as usize;
        let mask = if width == 32 {
            u32::MAX
        } else {
            (1u32 << width) - 1
        };
        let value = value & mask;

        if value == 0 {
            // all bits are the canonical zero; the gather sum is empty
            let bits = vec![system.zero(); width];
            let gather = system.new_operator();
            return SymWord { gather, bits };
        }

        let bits: Vec<OperatorId> = (0..width)
            .map(|i| {
                if (value >> i) & 1 != 0 {
                    system.one()
                } else {
                    system.zero()
                }
            })
            .collect();
        let gather = do_gather(system, &bits);
        SymWord { gather, bits }
    }

    /// A word assembled from single-bit operators (missing high bits are
    /// zero).
    pub fn from_bits(system: &mut System, provided: &[OperatorId]) -> SymWord {
        let width = system.word_bits() as usize;
        let mut bits = vec![system.zero(); width];
        for (slot, &bit) in bits.iter_mut().zip(provided.iter()) {
            *slot = bit;
        }
        let gather = do_gather(system, &bits);
        SymWord { gather, bits }
    }

    /// A word taking its value from an existing gather operator, with the
    /// bits rederived by scattering.
    pub fn from_gather(system: &mut System, gather: OperatorId) -> SymWord {
        let bits = do_scatter(system, gather);
        SymWord { gather, bits }
    }

    /// The operator holding bit `i`.
    pub fn bit(&self, i: usize) -> OperatorId {
        self.bits[i]
    }

    /// The whole-word gather operator.
    pub fn gather(&self) -> OperatorId {
        self.gather
    }

    /// The sum `self + scalar * src`, as a fresh word.
    pub fn add_word(&self, system: &mut System, src: &SymWord, scalar: i64) -> SymWord {
        let gather = system.operator_of_operator(self.gather, Coeff::one());
        system.add_operator_term(gather, src.gather, Coeff::from_integer(BigInt::from(scalar)));
        let bits = do_scatter(system, gather);
        SymWord { gather, bits }
    }

    /// The sum `self + f(src)` for an XOR-linear `f` given by its action
    /// on single bits: `table[x]` is `f(1 << x)`.
    pub fn add_linear_table(
        &self,
        system: &mut System,
        src: &SymWord,
        table: &[u32; 32],
    ) -> SymWord {
        let width = system.word_bits() as usize;
        let mut values = vec![system.zero(); width];

        for (y, value) in values.iter_mut().enumerate() {
            // output bit y is the mod-2 sum of the contributing input bits
            let sum = system.new_operator();
            for (x, &entry) in table.iter().enumerate().take(width) {
                if (entry >> y) & 1 != 0 {
                    system.add_operator_term(sum, src.bit(x), Coeff::one());
                }
            }
            let (_, wrapper) = system.temporary_of(sum);
            *value = wrapper;
        }

        let folded = SymWord::from_bits(system, &values);
        self.add_word(system, &folded, 1)
    }
}

/// Build the gather operator `sum(bit_i * 2^i / 2^(W-1))`.
fn do_gather(system: &mut System, bits: &[OperatorId]) -> OperatorId {
    let width = system.word_bits() as usize;
    let gather = system.new_operator();
    for (i, &bit) in bits.iter().enumerate().take(width) {
        let scalar = Coeff::new(BigInt::one() << i, BigInt::one() << (width - 1));
        system.add_operator_term(gather, bit, scalar);
    }
    gather
}

/// Derive single-bit operators from a gather operator.
///
/// Bit 0 is the gathered sum scaled back to integers and reduced mod 2;
/// bit i subtracts the lower bits and halves i times before reducing.
fn do_scatter(system: &mut System, gather: OperatorId) -> Vec<OperatorId> {
    let width = system.word_bits() as usize;
    let mut bits = Vec::with_capacity(width);

    let source = system.operator_of_operator(
        gather,
        Coeff::from_integer(BigInt::one() << (width - 1)),
    );
    let (_, wrapper) = system.temporary_of(source);
    bits.push(wrapper);

    for i in 1..width {
        let partial = system.operator_of_operator(
            gather,
            Coeff::from_integer(BigInt::one() << (width - 1 - i)),
        );
        for (j, &bit) in bits.iter().enumerate() {
            let scalar = Coeff::new(-BigInt::one(), BigInt::one() << (i - j));
            system.add_operator_term(partial, bit, scalar);
        }
        let source = system.operator_of_operator(partial, Coeff::one());
        let (_, wrapper) = system.temporary_of(source);
        bits.push(wrapper);
    }

    bits
}

#[cfg(test)]
mod tests {
    use super::*;
    use flatq_core::evaluate_operator;
    use num_traits::Zero;

    fn bit_values(system: &System, word: &SymWord, inputs: &[bool], constants: &[bool]) -> u32 {
        let mut value = 0u32;
        for i in 0..system.word_bits() as usize {
            let bit = evaluate_operator(system, word.bit(i), inputs, constants).unwrap();
            assert!(bit.denom().is_one());
            if !(bit.numer() % 2i32).is_zero() {
                value |= 1 << i;
            }
        }
        value
    }

    #[test]
    fn test_literal_round_trips_through_bits() {
        let mut system = System::new(32);
        let word = SymWord::literal(&mut system, 0xdead_beef);
        assert_eq!(bit_values(&system, &word, &[], &[true]), 0xdead_beef);
    }

    #[test]
    fn test_add_word_carries() {
        let mut system = System::new(32);
        let a = SymWord::literal(&mut system, 0xffff_ffff);
        let b = SymWord::literal(&mut system, 1);
        let sum = a.add_word(&mut system, &b, 1);
        // 0xffffffff + 1 wraps to 0
        assert_eq!(bit_values(&system, &sum, &[], &[true]), 0);

        let c = SymWord::literal(&mut system, 0x0123_4567);
        let d = SymWord::literal(&mut system, 0x89ab_cdef);
        let sum = c.add_word(&mut system, &d, 1);
        assert_eq!(
            bit_values(&system, &sum, &[], &[true]),
            0x0123_4567u32.wrapping_add(0x89ab_cdef)
        );
    }

    #[test]
    fn test_from_gather_rederives_bits() {
        let mut system = System::new(32);
        let word = SymWord::literal(&mut system, 0x8000_0001);
        let rederived = SymWord::from_gather(&mut system, word.gather());
        assert_eq!(bit_values(&system, &rederived, &[], &[true]), 0x8000_0001);
    }

    #[test]
    fn test_add_word_with_negative_scalar() {
        let mut system = System::new(32);
        let a = SymWord::literal(&mut system, 1000);
        let b = SymWord::literal(&mut system, 999);
        let diff = a.add_word(&mut system, &b, -1);
        assert_eq!(bit_values(&system, &diff, &[], &[true]), 1);
    }

    #[test]
    fn test_add_linear_table_applies_rotations() {
        use crate::util::big_sigma0;
        let mut system = System::new(32);
        let table: [u32; 32] = std::array::from_fn(|i| big_sigma0(1 << i));

        let zero = SymWord::literal(&mut system, 0);
        let x = SymWord::literal(&mut system, 0x6a09_e667);
        let result = zero.add_linear_table(&mut system, &x, &table);
        assert_eq!(
            bit_values(&system, &result, &[], &[true]),
            big_sigma0(0x6a09_e667)
        );
    }
}

//! Rational coefficient arithmetic.
//!
//! All coefficients in the system are exact rationals whose denominators
//! are expected to be powers of two. After every additive merge a
//! coefficient is canonicalized into the range implied by the working
//! modulus: `2` when the term is defining a fresh boolean, or `2^W` (W =
//! word width) for intermediate word-level sums. Reduction truncates
//! toward zero, matching arbitrary-precision integer remainder semantics.

use std::str::FromStr;

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::One;

/// An exact rational coefficient.
pub type Coeff = BigRational;

/// Upper bound on the configurable word width, plus one bookkeeping bit
/// everywhere a word-sized value is carried through the matrix engine.
pub const WORD_BITS_MAX: u32 = 32;

/// The working modulus a coefficient is canonicalized against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modulus {
    /// Mod 2: the coefficient weights a term that defines a boolean.
    Two,
    /// Mod `2^bits`: an intermediate word-level sum.
    Word(u32),
}

impl Modulus {
    fn shift(self) -> usize {
        match self {
            Modulus::Two => 1,
            Modulus::Word(bits) => bits as usize,
        }
    }
}

/// Canonicalize `c` into the range implied by `modulus`.
///
/// The numerator is reduced modulo `denominator << shift`, so the value
/// keeps its denominator while the integer part wraps. The remainder keeps
/// the numerator's sign (truncated division).
pub fn normalize(c: Coeff, modulus: Modulus) -> Coeff {
    let denom = c.denom().clone();
    let range: BigInt = &denom << modulus.shift();
    let numer = c.numer() % range;
    Coeff::new(numer, denom)
}

/// Returns `Some(k)` iff the denominator of `c` is exactly `2^k`.
pub fn pow2_denominator_shift(c: &Coeff) -> Option<u64> {
    let denom = c.denom();
    if denom.is_one() {
        return Some(0);
    }
    let shift = denom.trailing_zeros()?;
    if (denom >> (shift as usize)).is_one() {
        Some(shift)
    } else {
        None
    }
}

/// Render a coefficient as an exact decimal string: `numer` when the
/// denominator is one, `numer/denom` otherwise.
pub fn to_decimal_string(c: &Coeff) -> String {
    if c.denom().is_one() {
        c.numer().to_string()
    } else {
        format!("{}/{}", c.numer(), c.denom())
    }
}

/// Parse a coefficient previously rendered by [`to_decimal_string`].
pub fn from_decimal_str(s: &str) -> Option<Coeff> {
    Coeff::from_str(s).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::Zero;

    fn q(n: i64, d: i64) -> Coeff {
        Coeff::new(BigInt::from(n), BigInt::from(d))
    }

    #[test]
    fn test_normalize_mod_two() {
        // 5 mod 2 = 1
        assert_eq!(normalize(q(5, 1), Modulus::Two), q(1, 1));
        // 3/2 mod 2 keeps the denominator: numerator reduced mod 4
        assert_eq!(normalize(q(3, 2), Modulus::Two), q(3, 2));
        assert_eq!(normalize(q(7, 2), Modulus::Two), q(3, 2));
        // 2 mod 2 = 0
        assert!(normalize(q(2, 1), Modulus::Two).is_zero());
    }

    #[test]
    fn test_normalize_keeps_sign() {
        // truncated remainder: -5 mod 2 = -1, not +1
        assert_eq!(normalize(q(-5, 1), Modulus::Two), q(-1, 1));
        assert_eq!(normalize(q(-7, 2), Modulus::Two), q(-3, 2));
    }

    #[test]
    fn test_normalize_word() {
        let big = q(1, 1) * Coeff::from_integer(BigInt::from(1u64 << 33));
        // 2^33 mod 2^32 = 0
        assert!(normalize(big, Modulus::Word(32)).is_zero());
        // 2^32 + 3 mod 2^32 = 3
        let v = Coeff::from_integer(BigInt::from((1u64 << 32) + 3));
        assert_eq!(normalize(v, Modulus::Word(32)), q(3, 1));
    }

    #[test]
    fn test_pow2_denominator_shift() {
        assert_eq!(pow2_denominator_shift(&q(3, 1)), Some(0));
        assert_eq!(pow2_denominator_shift(&q(3, 2)), Some(1));
        assert_eq!(pow2_denominator_shift(&q(-1, 8)), Some(3));
        assert_eq!(pow2_denominator_shift(&q(1, 3)), None);
        assert_eq!(pow2_denominator_shift(&q(1, 6)), None);
    }

    #[test]
    fn test_decimal_round_trip() {
        for c in [q(0, 1), q(7, 1), q(-3, 2), q(1, 1 << 31)] {
            let s = to_decimal_string(&c);
            assert_eq!(from_decimal_str(&s), Some(c));
        }
        assert_eq!(to_decimal_string(&q(7, 1)), "7");
        assert_eq!(to_decimal_string(&q(-1, 2)), "-1/2");
    }

    mod properties {
        use super::*;
        use num_traits::Signed;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_decimal_round_trip(n in -1_000_000i64..1_000_000, shift in 0usize..32) {
                let c = Coeff::new(BigInt::from(n), BigInt::from(1) << shift);
                let s = to_decimal_string(&c);
                prop_assert_eq!(from_decimal_str(&s), Some(c));
            }

            #[test]
            fn prop_normalize_bounds_numerator(n in -1_000_000i64..1_000_000, d in 0usize..8) {
                let c = normalize(
                    Coeff::new(BigInt::from(n), BigInt::from(1) << d),
                    Modulus::Two,
                );
                prop_assert!(c.numer().abs() < (c.denom() << 1usize));
            }
        }
    }
}

//! The operand/operator DAG.
//!
//! Operands are boolean-valued variables: constants (known at solve time),
//! unknown inputs, and temporaries introduced whenever a sum is reduced
//! modulo 2. Operators are rational-weighted linear combinations of
//! operands and other operators. Nodes live in arenas owned by [`System`]
//! and are addressed by dense ids; term maps are ordered by arena id so
//! every walk over the graph is deterministic.
//!
//! Columns are labeled in evaluation order: once flattening has assigned a
//! temporary its position, any equation may refer to values defined at
//! smaller positions but never to later ones.

use std::collections::BTreeMap;
use std::fmt;

use num_traits::Zero;

use crate::coeff::{self, Coeff, Modulus, WORD_BITS_MAX};
use crate::uid::{Uid, UidAllocator};

/// Index of an operand in the system arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperandId(pub u32);

impl fmt::Display for OperandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Index of an operator in the system arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperatorId(pub u32);

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op{}", self.0)
    }
}

/// What kind of variable an operand stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// Known at solve time; bit 0 is the built-in unity constant.
    Constant,
    /// Unknown input variable, to be solved for.
    Input,
    /// Defined by an operator; becomes a column once flattening runs.
    Temporary,
}

/// A boolean-valued variable.
#[derive(Debug, Clone)]
pub struct Operand {
    /// Creation-unique identity stamp.
    pub uid: Uid,
    /// Variable kind.
    pub kind: OperandKind,
    /// For constants and inputs, the bit this operand refers to. For
    /// temporaries, set only on designated outputs (the output bit).
    pub bit_index: Option<u32>,
    /// Dense evaluation-order index, assigned by flattening.
    pub position: Option<u64>,
    /// The operator that defines this operand's value. Always absent for
    /// constants and inputs, which are already known.
    pub source: Option<OperatorId>,
    /// An operator this operand's value is required to equal, making the
    /// operand an "output". Must reduce to the canonical Zero or One.
    pub target: Option<OperatorId>,
}

/// A rational-weighted linear combination of operands and operators.
#[derive(Debug, Clone)]
pub struct Operator {
    /// Creation-unique identity stamp.
    pub uid: Uid,
    /// Operand terms, keyed by arena id. Zero coefficients are removed
    /// eagerly, so an empty operator means the value 0.
    pub operands: BTreeMap<OperandId, Coeff>,
    /// Nested operator terms, merged away by flattening.
    pub operators: BTreeMap<OperatorId, Coeff>,
    /// Compiled form, filled in by the flattening pass. Owned exclusively
    /// by this operator and consumed by back-substitution.
    pub flattened: Option<FlattenedOperator>,
}

/// The compiled form of an operator: base terms and positioned
/// temporaries only, no nested operators.
#[derive(Debug, Clone, Default)]
pub struct FlattenedOperator {
    /// Count of doublings applied to clear fractional denominators. The
    /// equation's effective modulus is `2^(divisor_shift + 1)` and its
    /// value before truncation must be exactly 0 or `2^divisor_shift`.
    pub divisor_shift: u64,
    /// Terms, keyed by arena id.
    pub terms: BTreeMap<OperandId, Coeff>,
}

impl FlattenedOperator {
    /// Empty (zero-valued) flattened operator.
    pub fn new() -> Self {
        FlattenedOperator::default()
    }

    /// Merge `scalar * operand` into the terms, mod 2, dropping the entry
    /// if the result cancels to zero.
    pub fn add_term(&mut self, operand: OperandId, scalar: Coeff) {
        if scalar.is_zero() {
            return;
        }
        let current = self
            .terms
            .get(&operand)
            .cloned()
            .unwrap_or_else(Coeff::zero);
        let sum = coeff::normalize(current + scalar, Modulus::Two);
        if sum.is_zero() {
            self.terms.remove(&operand);
        } else {
            self.terms.insert(operand, sum);
        }
    }

    /// Fold `scalar` times another flattened operator into this one.
    pub fn add_flattened(&mut self, src: &FlattenedOperator, scalar: &Coeff) {
        if scalar.is_zero() {
            return;
        }
        for (&operand, c) in &src.terms {
            if !c.is_zero() {
                self.add_term(operand, c * scalar);
            }
        }
    }
}

/// The arena holding one symbolic system.
#[derive(Debug)]
pub struct System {
    word_bits: u32,
    uids: UidAllocator,
    operands: Vec<Operand>,
    operators: Vec<Operator>,
    unity: OperandId,
    zero: OperatorId,
    one: OperatorId,
    /// Constant operands in bit order; entry 0 is unity.
    pub constants: Vec<OperandId>,
    /// Unknown input operands in bit order.
    pub inputs: Vec<OperandId>,
    /// User-designated output operands, in output-bit order.
    pub outputs: Vec<OperandId>,
    /// Temporaries in position order; filled by flattening.
    pub temps: Vec<OperandId>,
    /// Output index -> position in `temps`; filled by flattening.
    pub output_positions: Vec<Option<u64>>,
}

impl System {
    /// Create a system with the given word width (1..=32 bits).
    ///
    /// The built-in unity constant operand and the canonical Zero and One
    /// operators are created here; One's flattened form is `1 * unity`.
    pub fn new(word_bits: u32) -> Self {
        assert!(
            (1..=WORD_BITS_MAX).contains(&word_bits),
            "word width must be between 1 and {WORD_BITS_MAX} bits"
        );

        let mut system = System {
            word_bits,
            uids: UidAllocator::new(),
            operands: Vec::new(),
            operators: Vec::new(),
            unity: OperandId(0),
            zero: OperatorId(0),
            one: OperatorId(0),
            constants: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            temps: Vec::new(),
            output_positions: Vec::new(),
        };

        system.unity = system.new_operand(OperandKind::Constant, Some(0));
        system.constants.push(system.unity);

        system.zero = system.new_operator();
        system.one = system.new_operator();
        let one = system.one;
        let unity = system.unity;
        system.add_operand_term(one, unity, Coeff::from_integer(1.into()), Modulus::Word(word_bits));

        // pre-flattened forms of the canonical operators
        system.operators[system.zero.0 as usize].flattened = Some(FlattenedOperator::new());
        let mut flat_one = FlattenedOperator::new();
        flat_one.add_term(unity, Coeff::from_integer(1.into()));
        system.operators[system.one.0 as usize].flattened = Some(flat_one);

        system
    }

    /// Configured word width in bits.
    pub fn word_bits(&self) -> u32 {
        self.word_bits
    }

    /// The built-in unity constant operand (constant bit 0, value 1).
    pub fn unity(&self) -> OperandId {
        self.unity
    }

    /// The canonical always-zero operator.
    pub fn zero(&self) -> OperatorId {
        self.zero
    }

    /// The canonical always-one operator.
    pub fn one(&self) -> OperatorId {
        self.one
    }

    /// Number of operators in the arena.
    pub fn operator_count(&self) -> usize {
        self.operators.len()
    }

    /// Number of operands in the arena.
    pub fn operand_count(&self) -> usize {
        self.operands.len()
    }

    /// Allocate a new operand. The caller registers inputs/constants in
    /// the corresponding bit-order vectors.
    pub fn new_operand(&mut self, kind: OperandKind, bit_index: Option<u32>) -> OperandId {
        let id = OperandId(self.operands.len() as u32);
        self.operands.push(Operand {
            uid: self.uids.allocate(),
            kind,
            bit_index,
            position: None,
            source: None,
            target: None,
        });
        id
    }

    /// Allocate a new, empty (zero-valued) operator.
    pub fn new_operator(&mut self) -> OperatorId {
        let id = OperatorId(self.operators.len() as u32);
        self.operators.push(Operator {
            uid: self.uids.allocate(),
            operands: BTreeMap::new(),
            operators: BTreeMap::new(),
            flattened: None,
        });
        id
    }

    /// Allocate an operator holding `scalar * operand`.
    pub fn operator_of_operand(&mut self, operand: OperandId, scalar: Coeff) -> OperatorId {
        let id = self.new_operator();
        let bits = self.word_bits;
        self.add_operand_term(id, operand, scalar, Modulus::Word(bits));
        id
    }

    /// Allocate an operator holding `scalar * src`.
    pub fn operator_of_operator(&mut self, src: OperatorId, scalar: Coeff) -> OperatorId {
        let id = self.new_operator();
        self.add_operator_term(id, src, scalar);
        id
    }

    /// Borrow an operand.
    pub fn operand(&self, id: OperandId) -> &Operand {
        &self.operands[id.0 as usize]
    }

    /// Mutably borrow an operand.
    pub fn operand_mut(&mut self, id: OperandId) -> &mut Operand {
        &mut self.operands[id.0 as usize]
    }

    /// Borrow an operator.
    pub fn operator(&self, id: OperatorId) -> &Operator {
        &self.operators[id.0 as usize]
    }

    /// Mutably borrow an operator.
    pub fn operator_mut(&mut self, id: OperatorId) -> &mut Operator {
        &mut self.operators[id.0 as usize]
    }

    /// True if the operator has no terms at all (the value 0).
    pub fn operator_is_zero(&self, id: OperatorId) -> bool {
        let node = self.operator(id);
        node.operands.is_empty() && node.operators.is_empty()
    }

    /// Merge `scalar * operand` into `op`'s operand terms, canonicalizing
    /// against `modulus` and dropping the entry if it cancels.
    pub fn add_operand_term(
        &mut self,
        op: OperatorId,
        operand: OperandId,
        scalar: Coeff,
        modulus: Modulus,
    ) {
        if scalar.is_zero() {
            return;
        }
        let terms = &mut self.operators[op.0 as usize].operands;
        let current = terms.get(&operand).cloned().unwrap_or_else(Coeff::zero);
        let sum = coeff::normalize(current + scalar, modulus);
        if sum.is_zero() {
            terms.remove(&operand);
        } else {
            terms.insert(operand, sum);
        }
    }

    /// Merge `scalar * src` into `op`'s nested operator terms. Nested
    /// sums are word-level, so canonicalization is mod `2^W`.
    pub fn add_operator_term(&mut self, op: OperatorId, src: OperatorId, scalar: Coeff) {
        if scalar.is_zero() {
            return;
        }
        let modulus = Modulus::Word(self.word_bits);
        let terms = &mut self.operators[op.0 as usize].operators;
        let current = terms.get(&src).cloned().unwrap_or_else(Coeff::zero);
        let sum = coeff::normalize(current + scalar, modulus);
        if sum.is_zero() {
            terms.remove(&src);
        } else {
            terms.insert(src, sum);
        }
    }

    /// Set the operator that defines `operand`'s value.
    pub fn set_source(&mut self, operand: OperandId, source: OperatorId) {
        self.operand_mut(operand).source = Some(source);
    }

    /// Require `operand` to equal `target` (normally Zero or One).
    pub fn set_target(&mut self, operand: OperandId, target: OperatorId) {
        self.operand_mut(operand).target = Some(target);
    }

    /// Convenience: a fresh temporary operand defined by `source`, wrapped
    /// in an operator of its own so the reduction modulo 2 is observable.
    pub fn temporary_of(&mut self, source: OperatorId) -> (OperandId, OperatorId) {
        let operand = self.new_operand(OperandKind::Temporary, None);
        self.set_source(operand, source);
        let wrapper = self.operator_of_operand(operand, Coeff::from_integer(1.into()));
        (operand, wrapper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigInt;

    fn q(n: i64, d: i64) -> Coeff {
        Coeff::new(BigInt::from(n), BigInt::from(d))
    }

    #[test]
    fn test_new_system_singletons() {
        let system = System::new(32);
        assert!(system.operator_is_zero(system.zero()));
        let one = system.operator(system.one());
        assert_eq!(one.operands.len(), 1);
        assert_eq!(one.operands.get(&system.unity()), Some(&q(1, 1)));
        assert_eq!(system.constants, vec![system.unity()]);
    }

    #[test]
    fn test_add_merges_and_cancels() {
        let mut system = System::new(32);
        let x = system.new_operand(OperandKind::Input, Some(0));
        let op = system.new_operator();

        system.add_operand_term(op, x, q(1, 2), Modulus::Word(32));
        system.add_operand_term(op, x, q(1, 2), Modulus::Word(32));
        assert_eq!(system.operator(op).operands.get(&x), Some(&q(1, 1)));

        // adding -1 cancels the entry entirely
        system.add_operand_term(op, x, q(-1, 1), Modulus::Word(32));
        assert!(system.operator(op).operands.is_empty());
    }

    #[test]
    fn test_add_mod_two_wraps() {
        let mut system = System::new(32);
        let x = system.new_operand(OperandKind::Input, Some(0));
        let op = system.new_operator();

        system.add_operand_term(op, x, q(1, 1), Modulus::Two);
        system.add_operand_term(op, x, q(1, 1), Modulus::Two);
        // 1 + 1 = 2 = 0 (mod 2)
        assert!(system.operator(op).operands.is_empty());
    }

    #[test]
    fn test_zero_scalar_is_ignored() {
        let mut system = System::new(32);
        let x = system.new_operand(OperandKind::Input, Some(0));
        let op = system.new_operator();
        system.add_operand_term(op, x, q(0, 1), Modulus::Word(32));
        assert!(system.operator_is_zero(op));
    }

    #[test]
    fn test_flattened_add_term() {
        let mut flat = FlattenedOperator::new();
        let v = OperandId(3);
        flat.add_term(v, q(3, 2));
        // 3/2 + 3/2 = 3 = 1 (mod 2) with denominator 1
        flat.add_term(v, q(3, 2));
        assert_eq!(flat.terms.get(&v), Some(&q(1, 1)));
    }
}

//! The symbolic SHA-256 round circuit.
//!
//! Constant layout (bit indices into the constant value vector):
//! - c\[0\]: unity (always 1)
//! - c\[1..=512\]: the message block W, bit by bit; the first
//!   `unknown_w_bits` of these are shadowed by unknown input variables
//!   x\[0..unknown_w_bits\] and their constant slots are left unused
//! - c\[513..=768\]: the initial H values
//! - c\[769..=1024\]: the expected output H values (used only when the
//!   outputs are constrained; 0 for discarded bits)
//!
//! Outputs are 256 temporaries in output-bit order. Unconstrained, each
//! is simply the corresponding final H bit. Constrained, each becomes
//! `H bit + expected bit (mod 2)` with a required value of zero, which
//! demands the hash land on the expected digest.
//!
//! Discarding applies to whole 32-bit words only: the bit-granular
//! discard path inherited from the round structure does not account for
//! output word endianness, so partial words are rejected up front rather
//! than silently misassembled. Full 256-bit output is the supported
//! configuration.

use flatq_core::coeff::Coeff;
use flatq_core::{OperandId, OperandKind, OperatorId, System};
use num_bigint::BigInt;
use num_traits::One;

use crate::error::{CircuitError, CircuitResult};
use crate::util::{
    big_sigma0, big_sigma1, compress, small_sigma0, small_sigma1, INITIAL_H, ROUND_K,
};
use crate::word::SymWord;

/// Shape of the circuit to build.
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// How many leading W bits are unknown inputs to solve for (0..=512).
    pub unknown_w_bits: u32,
    /// How many output H bits are kept (a multiple of 32, up to 256).
    pub target_h_bits: u32,
    /// How many times the hash is applied (output re-fed as input).
    pub apply_count: u32,
    /// Rounds per application, a multiple of 8 between 8 and 64.
    pub rounds: u32,
    /// Constrain each kept output bit to the expected-output constants.
    pub constrain_outputs: bool,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        CircuitConfig {
            unknown_w_bits: 0,
            target_h_bits: 256,
            apply_count: 1,
            rounds: 64,
            constrain_outputs: false,
        }
    }
}

impl CircuitConfig {
    fn validate(&self) -> CircuitResult<()> {
        if self.unknown_w_bits > 512 {
            return Err(CircuitError::InvalidConfig(format!(
                "{} unknown W bits; the block has 512",
                self.unknown_w_bits
            )));
        }
        if self.target_h_bits > 256 || self.target_h_bits % 32 != 0 {
            return Err(CircuitError::InvalidConfig(format!(
                "target width {} must be a multiple of 32 up to 256",
                self.target_h_bits
            )));
        }
        if self.apply_count == 0 {
            return Err(CircuitError::InvalidConfig(
                "the hash must be applied at least once".into(),
            ));
        }
        if self.rounds < 8 || self.rounds > 64 || self.rounds % 8 != 0 {
            return Err(CircuitError::InvalidConfig(format!(
                "round count {} must be a multiple of 8 between 8 and 64",
                self.rounds
            )));
        }
        Ok(())
    }
}

/// Single-bit table of an XOR-linear 32-bit function: entry x is f(1<<x).
fn linear_table(f: impl Fn(u32) -> u32) -> [u32; 32] {
    std::array::from_fn(|i| f(1u32 << i))
}

/// Build the circuit into `system`, registering inputs, constants and
/// outputs.
pub fn build_circuit(system: &mut System, config: &CircuitConfig) -> CircuitResult<()> {
    config.validate()?;
    if system.word_bits() != 32 {
        return Err(CircuitError::InvalidConfig(format!(
            "the round function needs 32-bit words, system has {}",
            system.word_bits()
        )));
    }

    // the 512 W bits, as constants with the leading ones shadowed by
    // unknown inputs
    let mut w_bits: Vec<OperatorId> = Vec::with_capacity(512);
    for i in 0..512u32 {
        let operand = system.new_operand(OperandKind::Constant, Some(i + 1));
        system.constants.push(operand);
        w_bits.push(system.operator_of_operand(operand, Coeff::one()));
    }
    for i in 0..config.unknown_w_bits {
        let operand = system.new_operand(OperandKind::Input, Some(i));
        system.inputs.push(operand);
        w_bits[i as usize] = system.operator_of_operand(operand, Coeff::one());
    }
    let mut w: Vec<SymWord> = (0..16)
        .map(|i| SymWord::from_bits(system, &w_bits[32 * i..32 * (i + 1)]))
        .collect();

    // the 256 initial H bits
    let mut h_bits: Vec<OperatorId> = Vec::with_capacity(256);
    for i in 0..256u32 {
        let operand = system.new_operand(OperandKind::Constant, Some(i + 513));
        system.constants.push(operand);
        h_bits.push(system.operator_of_operand(operand, Coeff::one()));
    }
    let mut h: Vec<SymWord> = (0..8)
        .map(|i| SymWord::from_bits(system, &h_bits[32 * i..32 * (i + 1)]))
        .collect();

    // the 256 expected-output bits
    let mut expected: Vec<OperandId> = Vec::with_capacity(256);
    for i in 0..256u32 {
        let operand = system.new_operand(OperandKind::Constant, Some(i + 769));
        system.constants.push(operand);
        expected.push(operand);
    }

    // output operands, rewired to the final H bits below
    let zero = system.zero();
    let mut outputs: Vec<OperandId> = Vec::with_capacity(256);
    for i in 0..256u32 {
        let operand = system.new_operand(OperandKind::Temporary, Some(i));
        system.set_source(operand, zero);
        outputs.push(operand);
    }

    for application in 0..config.apply_count {
        expand_schedule(system, &mut w, config.rounds);
        update(system, &mut h, &w, config.rounds);

        if application + 1 < config.apply_count {
            // feed the digest back in as the next message block
            for i in 0..8 {
                let bits: Vec<OperatorId> = (0..32).map(|j| h[i].bit(j)).collect();
                w[i] = SymWord::from_bits(system, &bits);
                w[i + 8] = SymWord::literal(system, 0);
            }
            w[8] = SymWord::literal(system, 0x8000_0000);
            w[15] = SymWord::literal(system, 256);
            for (i, slot) in h.iter_mut().enumerate() {
                *slot = SymWord::literal(system, INITIAL_H[i]);
            }
        }
    }

    // wire the outputs, discarding whole words past the target width
    for i in 0..256usize {
        let discard = i >= config.target_h_bits as usize;
        let source = if discard {
            zero
        } else {
            h[i / 32].bit(i & 31)
        };
        system.operand_mut(outputs[i]).source = Some(source);
    }

    if config.constrain_outputs {
        for i in 0..256usize {
            let current = system
                .operand(outputs[i])
                .source
                .unwrap_or(zero);
            let demand = system.operator_of_operator(current, Coeff::one());
            system.add_operand_term(
                demand,
                expected[i],
                Coeff::one(),
                flatq_core::Modulus::Word(32),
            );
            system.set_source(outputs[i], demand);
            system.set_target(outputs[i], zero);
        }
    }

    for operand in outputs {
        system.outputs.push(operand);
    }

    log::debug!(
        "circuit built: {} operators, {} operands",
        system.operator_count(),
        system.operand_count()
    );

    Ok(())
}

/// Expand w[16..rounds] symbolically.
fn expand_schedule(system: &mut System, w: &mut Vec<SymWord>, rounds: u32) {
    let ks0 = linear_table(small_sigma0);
    let ks1 = linear_table(small_sigma1);

    for i in 16..rounds as usize {
        let mut next = w[i - 16].add_word(system, &w[i - 7], 1);
        next = next.add_linear_table(system, &w[i - 15], &ks0);
        next = next.add_linear_table(system, &w[i - 2], &ks1);
        if w.len() <= i {
            w.push(next);
        } else {
            w[i] = next;
        }
    }
}

/// The round loop, operating on a rotating register file.
fn update(system: &mut System, h_entry: &mut [SymWord], w: &[SymWord], rounds: u32) {
    const A: usize = 0;
    const B: usize = 1;
    const C: usize = 2;
    const D: usize = 3;
    const E: usize = 4;
    const F: usize = 5;
    const G: usize = 6;
    const H: usize = 7;

    let hs0 = linear_table(big_sigma0);
    let hs1 = linear_table(big_sigma1);

    let mut h: Vec<SymWord> = h_entry.to_vec();

    for i in 0..rounds as usize {
        // registers rotate instead of shuffling: logical X lives in
        // slot (X - i) mod 8
        let var = |x: usize| (x + 8 - (i & 7)) & 7;

        let mut new_h = h[var(H)].clone();
        new_h = new_h.add_linear_table(system, &h[var(E)], &hs1);

        let choose = ch_word(system, &h[var(E)], &h[var(F)], &h[var(G)]);
        new_h = new_h.add_word(system, &choose, 1);

        let round_k = SymWord::literal(system, ROUND_K[i]);
        new_h = new_h.add_word(system, &round_k, 1);
        new_h = new_h.add_word(system, &w[i], 1);

        let new_d = h[var(D)].add_word(system, &new_h, 1);

        new_h = new_h.add_linear_table(system, &h[var(A)], &hs0);
        let majority = maj_word(system, &h[var(A)], &h[var(B)], &h[var(C)]);
        new_h = new_h.add_word(system, &majority, 1);

        h[var(H)] = new_h;
        h[var(D)] = new_d;
    }

    for (i, entry) in h_entry.iter_mut().enumerate() {
        *entry = entry.add_word(system, &h[i], 1);
    }
}

/// Bitwise choose via 2 Ch(e,f,g) = f + g + T(e+g) - T(e+f).
fn ch_word(system: &mut System, e: &SymWord, f: &SymWord, g: &SymWord) -> SymWord {
    let half = Coeff::new(BigInt::one(), BigInt::from(2));
    let word = flatq_core::Modulus::Word(32);
    let mut bits = Vec::with_capacity(32);

    for i in 0..32 {
        let fg = system.new_operator();
        system.add_operator_term(fg, f.bit(i), half.clone());
        system.add_operator_term(fg, g.bit(i), half.clone());

        let eg = system.new_operator();
        system.add_operator_term(eg, e.bit(i), Coeff::one());
        system.add_operator_term(eg, g.bit(i), Coeff::one());

        let ef = system.new_operator();
        system.add_operator_term(ef, e.bit(i), Coeff::one());
        system.add_operator_term(ef, f.bit(i), Coeff::one());

        let dest = system.operator_of_operator(fg, Coeff::one());

        let eg_bit = system.new_operand(OperandKind::Temporary, None);
        system.set_source(eg_bit, eg);
        system.add_operand_term(dest, eg_bit, half.clone(), word);

        let ef_bit = system.new_operand(OperandKind::Temporary, None);
        system.set_source(ef_bit, ef);
        system.add_operand_term(dest, ef_bit, -half.clone(), word);

        bits.push(dest);
    }

    SymWord::from_bits(system, &bits)
}

/// Bitwise majority via 2 Maj(a,b,c) = a + b + c - T(a+b+c).
fn maj_word(system: &mut System, a: &SymWord, b: &SymWord, c: &SymWord) -> SymWord {
    let half = Coeff::new(BigInt::one(), BigInt::from(2));
    let mut bits = Vec::with_capacity(32);

    for i in 0..32 {
        let sum = system.new_operator();
        system.add_operator_term(sum, a.bit(i), Coeff::one());
        system.add_operator_term(sum, b.bit(i), Coeff::one());
        system.add_operator_term(sum, c.bit(i), Coeff::one());

        let wrapped = system.operator_of_operator(sum, Coeff::one());
        let parity = system.new_operand(OperandKind::Temporary, None);
        system.set_source(parity, wrapped);

        let dest = system.new_operator();
        system.add_operand_term(
            dest,
            parity,
            -half.clone(),
            flatq_core::Modulus::Word(32),
        );
        system.add_operator_term(dest, a.bit(i), half.clone());
        system.add_operator_term(dest, b.bit(i), half.clone());
        system.add_operator_term(dest, c.bit(i), half.clone());

        bits.push(dest);
    }

    SymWord::from_bits(system, &bits)
}

/// A concrete assignment for the circuit's inputs and constants.
#[derive(Debug, Clone)]
pub struct Assignment {
    /// The unknown input bits (the withheld leading W bits).
    pub inputs: Vec<bool>,
    /// All constant bits in bit-index order.
    pub constants: Vec<bool>,
}

/// The digest the configured circuit computes for a message block,
/// discarded words zeroed.
pub fn expected_digest(config: &CircuitConfig, block: &[u32; 16]) -> [u32; 8] {
    let mut h = INITIAL_H;
    let mut w = *block;
    for application in 0..config.apply_count {
        compress(&mut h, &w, config.rounds);
        if application + 1 < config.apply_count {
            w[..8].copy_from_slice(&h);
            w[8] = 0x8000_0000;
            w[9..15].fill(0);
            w[15] = 256;
            h = INITIAL_H;
        }
    }
    for i in config.target_h_bits..256 {
        h[(i / 32) as usize] &= !(1u32 << (i & 31));
    }
    h
}

/// Build the input/constant assignment embedding a concrete block.
pub fn assignment_for_block(config: &CircuitConfig, block: &[u32; 16]) -> Assignment {
    let mut constants = vec![false; 1 + 512 + 256 + 256];
    constants[0] = true; // unity

    let mut inputs = vec![false; config.unknown_w_bits as usize];
    for n in 0..512usize {
        let bit = (block[n / 32] >> (n & 31)) & 1 != 0;
        if n < config.unknown_w_bits as usize {
            inputs[n] = bit;
        } else {
            constants[n + 1] = bit;
        }
    }

    for n in 0..256usize {
        constants[513 + n] = (INITIAL_H[n / 32] >> (n & 31)) & 1 != 0;
    }

    if config.constrain_outputs {
        let digest = expected_digest(config, block);
        for n in 0..256usize {
            constants[769 + n] = (digest[n / 32] >> (n & 31)) & 1 != 0;
        }
    }

    Assignment { inputs, constants }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        let mut config = CircuitConfig::default();
        assert!(config.validate().is_ok());

        config.rounds = 12;
        assert!(config.validate().is_err());
        config.rounds = 64;

        config.target_h_bits = 100; // not a multiple of 32
        assert!(config.validate().is_err());
        config.target_h_bits = 256;

        config.apply_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expected_digest_masks_discarded_words() {
        let config = CircuitConfig {
            target_h_bits: 64,
            rounds: 8,
            ..CircuitConfig::default()
        };
        let digest = expected_digest(&config, &crate::util::test_block());
        assert_eq!(&digest[2..], &[0u32; 6]);
        assert_ne!(digest[0], 0);
    }

    #[test]
    fn test_assignment_splits_unknown_bits() {
        let config = CircuitConfig {
            unknown_w_bits: 8,
            rounds: 8,
            ..CircuitConfig::default()
        };
        let block = crate::util::test_block();
        let assignment = assignment_for_block(&config, &block);

        assert_eq!(assignment.inputs.len(), 8);
        // 't' = 0x74: bits 2, 4, 5, 6 set (LSB first)
        assert_eq!(
            assignment.inputs,
            vec![false, false, true, false, true, true, true, false]
        );
        // the shadowed constant slots stay clear
        assert!(!assignment.constants[1..9].iter().any(|&b| b));
        // the rest of w[0] lands in constants
        assert!(assignment.constants[9]); // bit 8 of 0x74657374 ('s' = 0x73, bit 0)
    }
}

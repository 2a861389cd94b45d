//! The flattening engine.
//!
//! Flattening compiles the recursively-defined operator graph into one
//! linear equation per temporary, over base terms (unity, inputs,
//! constants) and strictly-earlier temporaries only. Discovery order is
//! the topological order: a temporary's position is assigned the first
//! time the walk reaches it, strictly before any equation that refers to
//! it.
//!
//! Worked example. Starting from
//! `x0 = (1/2 + 1/2 u) mod 2` and `x1 = (1 + x0) mod 2`, doubling clears
//! the fractions: `2 x0 = (1 + u) mod 4`, and substituting x0's definition
//! into x1 gives `2 x1 = (3 + u) mod 4`. The doubled equation's value is
//! always exactly 0 or the divisor, so truncating back to one bit never
//! divides with a remainder.
//!
//! [`Backsubstitution`] is the finalization pass: walking positions from
//! highest to lowest, it removes every whole-number reference to another
//! temporary by substituting that temporary's own terms, so the serialized
//! system never needs dereferencing at verification time. Each finished
//! equation is handed out and its storage freed immediately; a compiled
//! system with tens of thousands of columns is never resident twice.

use std::collections::BTreeMap;

use num_bigint::BigInt;
use num_traits::{One, Zero};

use crate::coeff::{self, Coeff};
use crate::error::{FlattenError, FlattenResult};
use crate::system::{FlattenedOperator, OperandId, OperandKind, OperatorId, System};

/// A serializable reference to one term of a compiled equation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermRef {
    /// The unity constant (value 1).
    Unity,
    /// Unknown input bit `n`.
    Input(u64),
    /// Constant bit `n`.
    Constant(u64),
    /// The temporary compiled at position `n`.
    Temporary(u64),
}

/// One compiled equation, ready for serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EquationRecord {
    /// The position of the temporary this equation defines.
    pub position: u64,
    /// Doublings applied to the equation; its modulus is
    /// `2^(divisor_shift + 1)`.
    pub divisor_shift: u64,
    /// The equation's terms, in deterministic operand order.
    pub terms: Vec<(TermRef, Coeff)>,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    id: OperatorId,
    entered: bool,
}

/// Flatten every designated output's defining subgraph.
///
/// On success, `system.temps` holds all temporaries in position order
/// (outputs last, in output order) and `system.output_positions` maps each
/// output index to its position.
pub fn flatten(system: &mut System) -> FlattenResult<()> {
    system.output_positions = vec![None; system.outputs.len()];
    system.temps.clear();

    for n in 0..system.outputs.len() {
        let output = system.outputs[n];
        let source = system
            .operand(output)
            .source
            .ok_or_else(|| FlattenError::Dependency(format!("output {n} has no defining operator")))?;

        flatten_operator(system, source)?;

        let position = system.temps.len() as u64;
        system.output_positions[n] = Some(position);
        system.operand_mut(output).position = Some(position);
        system.temps.push(output);
    }

    log::debug!(
        "flattened {} outputs into {} equations",
        system.outputs.len(),
        system.temps.len()
    );

    Ok(())
}

/// Depth-first, memoized post-order compilation of one operator subgraph.
fn flatten_operator(system: &mut System, root: OperatorId) -> FlattenResult<()> {
    let mut in_progress = vec![false; system.operator_count()];
    let mut stack = vec![Frame {
        id: root,
        entered: false,
    }];

    while let Some(frame) = stack.pop() {
        let index = frame.id.0 as usize;
        if system.operator(frame.id).flattened.is_some() {
            continue;
        }
        if !frame.entered {
            if in_progress[index] {
                return Err(FlattenError::Dependency(format!(
                    "operator {} depends on itself",
                    frame.id
                )));
            }
            in_progress[index] = true;
            stack.push(Frame {
                id: frame.id,
                entered: true,
            });

            let node = system.operator(frame.id);
            let mut children: Vec<OperatorId> = node.operators.keys().copied().collect();
            for operand_id in node.operands.keys() {
                let operand = system.operand(*operand_id);
                if let Some(source) = operand.source {
                    // an operand with a required target folds the target
                    // subgraph in; everything else compiles its source
                    children.push(operand.target.unwrap_or(source));
                }
            }
            // reverse push: children compile in term order
            for child in children.into_iter().rev() {
                if system.operator(child).flattened.is_none() {
                    stack.push(Frame {
                        id: child,
                        entered: false,
                    });
                }
            }
        } else {
            build_flattened(system, frame.id)?;
            in_progress[index] = false;
        }
    }

    Ok(())
}

/// Combine an operator's (already compiled) children into its own
/// flattened form, assigning positions to newly discovered temporaries.
fn build_flattened(system: &mut System, id: OperatorId) -> FlattenResult<()> {
    let mut flat = FlattenedOperator::new();

    let operator_terms: Vec<(OperatorId, Coeff)> = system
        .operator(id)
        .operators
        .iter()
        .map(|(&child, scalar)| (child, scalar.clone()))
        .collect();
    for (child, scalar) in operator_terms {
        let child_flat = system
            .operator(child)
            .flattened
            .as_ref()
            .ok_or_else(|| FlattenError::Internal(format!("{child} compiled out of order")))?;
        flat.add_flattened(child_flat, &scalar);
    }

    let operand_terms: Vec<(OperandId, Coeff)> = system
        .operator(id)
        .operands
        .iter()
        .map(|(&operand, scalar)| (operand, scalar.clone()))
        .collect();
    for (operand_id, scalar) in operand_terms {
        let operand = system.operand(operand_id);
        match (operand.source, operand.target) {
            (None, _) => {
                // input or constant: a base term
                flat.add_term(operand_id, scalar);
            }
            (Some(_), Some(target)) => {
                let target_flat = system
                    .operator(target)
                    .flattened
                    .as_ref()
                    .ok_or_else(|| {
                        FlattenError::Internal(format!("{target} compiled out of order"))
                    })?;
                flat.add_flattened(target_flat, &scalar);
            }
            (Some(_), None) => {
                if system.operand(operand_id).position.is_none() {
                    let position = system.temps.len() as u64;
                    system.operand_mut(operand_id).position = Some(position);
                    system.temps.push(operand_id);
                }
                flat.add_term(operand_id, scalar);
            }
        }
    }

    for (operand_id, scalar) in &flat.terms {
        if coeff::pow2_denominator_shift(scalar).is_none() {
            return Err(FlattenError::Denominator(format!(
                "coefficient {} of {} in {}",
                coeff::to_decimal_string(scalar),
                operand_id,
                id
            )));
        }
    }

    system.operator_mut(id).flattened = Some(flat);
    Ok(())
}

/// Resolve an operand to its serializable term reference.
fn term_ref(system: &System, operand_id: OperandId) -> FlattenResult<TermRef> {
    if operand_id == system.unity() {
        return Ok(TermRef::Unity);
    }
    let operand = system.operand(operand_id);
    match operand.kind {
        OperandKind::Input => operand
            .bit_index
            .map(|bit| TermRef::Input(bit as u64))
            .ok_or_else(|| FlattenError::Dependency(format!("input {operand_id} has no bit index"))),
        OperandKind::Constant => operand
            .bit_index
            .map(|bit| TermRef::Constant(bit as u64))
            .ok_or_else(|| {
                FlattenError::Dependency(format!("constant {operand_id} has no bit index"))
            }),
        OperandKind::Temporary => operand.position.map(TermRef::Temporary).ok_or_else(|| {
            FlattenError::Dependency(format!("temporary {operand_id} has no position"))
        }),
    }
}

/// The single-shot finalization walk, highest position first.
///
/// Pull equations with [`Backsubstitution::next_equation`]; each pull
/// consumes the temporary's flattened form.
pub struct Backsubstitution<'a> {
    system: &'a mut System,
    next: Option<u64>,
}

impl<'a> Backsubstitution<'a> {
    /// Start the walk over a flattened system.
    pub fn new(system: &'a mut System) -> Self {
        let next = system.temps.len().checked_sub(1).map(|n| n as u64);
        Backsubstitution { system, next }
    }

    /// Number of equations the walk will produce.
    pub fn equation_count(&self) -> u64 {
        self.system.temps.len() as u64
    }

    /// Produce the next equation (descending positions), or `None` once
    /// position 0 has been emitted.
    pub fn next_equation(&mut self) -> FlattenResult<Option<EquationRecord>> {
        let Some(position) = self.next else {
            return Ok(None);
        };
        self.next = position.checked_sub(1);

        let record = self.finalize_one(position)?;
        Ok(Some(record))
    }

    fn finalize_one(&mut self, position: u64) -> FlattenResult<EquationRecord> {
        let system = &mut *self.system;
        let operand_id = system.temps[position as usize];
        let source = system.operand(operand_id).source.ok_or_else(|| {
            FlattenError::Dependency(format!("temporary at position {position} has no source"))
        })?;
        let mut flat = system
            .operator_mut(source)
            .flattened
            .take()
            .ok_or_else(|| {
                FlattenError::Dependency(format!(
                    "equation {position} was already finalized or never compiled"
                ))
            })?;

        if flat.divisor_shift != 0 {
            return Err(FlattenError::Arithmetic(format!(
                "equation {position} has divisor shift {}",
                flat.divisor_shift
            )));
        }

        // split off every whole-number reference to another temporary
        let mut pending: BTreeMap<u64, BigInt> = BTreeMap::new();
        let terms = std::mem::take(&mut flat.terms);
        for (term_id, scalar) in terms {
            if scalar.is_zero() {
                continue;
            }
            let operand = system.operand(term_id);
            if operand.source.is_none() || !scalar.denom().is_one() {
                flat.terms.insert(term_id, scalar);
                continue;
            }
            let target = operand.position.ok_or_else(|| {
                FlattenError::Dependency(format!("{term_id} has no position in equation {position}"))
            })?;
            if pending.insert(target, scalar.numer().clone()).is_some() {
                return Err(FlattenError::Internal(format!(
                    "duplicate reference to position {target} in equation {position}"
                )));
            }
        }

        // substitute, deepest reference first, until none remain
        while let Some((&target, _)) = pending.iter().next_back() {
            let scalar = pending
                .remove(&target)
                .ok_or_else(|| FlattenError::Internal("pending set corrupted".into()))?;
            if scalar.is_zero() {
                continue;
            }

            let target_operand = system.temps[target as usize];
            let target_source = system.operand(target_operand).source.ok_or_else(|| {
                FlattenError::Dependency(format!("position {target} has no source"))
            })?;
            let target_terms: Vec<(OperandId, Coeff)> = system
                .operator(target_source)
                .flattened
                .as_ref()
                .ok_or_else(|| {
                    FlattenError::Dependency(format!(
                        "equation {position} substitutes already-freed position {target}"
                    ))
                })?
                .terms
                .iter()
                .map(|(&k, v)| (k, v.clone()))
                .collect();

            for (term_id, term_scalar) in target_terms {
                let operand = system.operand(term_id);
                if operand.source.is_none() || !term_scalar.denom().is_one() {
                    // free to fold straight in
                    flat.add_term(
                        term_id,
                        term_scalar * Coeff::from_integer(scalar.clone()),
                    );
                } else {
                    let deeper = operand.position.ok_or_else(|| {
                        FlattenError::Dependency(format!(
                            "{term_id} has no position in equation {position}"
                        ))
                    })?;
                    let product = term_scalar.numer() * &scalar;
                    pending
                        .entry(deeper)
                        .and_modify(|current| *current = (&*current + &product) % 2)
                        .or_insert(product);
                }
            }
        }

        let mut terms = Vec::with_capacity(flat.terms.len());
        for (term_id, scalar) in &flat.terms {
            terms.push((term_ref(system, *term_id)?, scalar.clone()));
        }

        Ok(EquationRecord {
            position,
            divisor_shift: flat.divisor_shift,
            terms,
        })
    }
}

/// Re-derive every temporary from its compiled equation and verify the
/// system against its required outputs.
///
/// Walks positions in ascending order, so each equation only ever needs
/// values defined earlier. Returns the number of target-checked outputs.
/// The walk is read-only: running it twice produces identical results.
pub fn check_flattened(
    system: &System,
    inputs: &[bool],
    constants: &[bool],
) -> FlattenResult<u64> {
    let mut values = vec![false; system.temps.len()];
    let mut known = vec![false; system.temps.len()];
    let mut target_count = 0u64;

    for (n, &operand_id) in system.temps.iter().enumerate() {
        let operand = system.operand(operand_id);
        let source = operand.source.ok_or_else(|| {
            FlattenError::Dependency(format!("temporary at position {n} has no source"))
        })?;
        let flat = system
            .operator(source)
            .flattened
            .as_ref()
            .ok_or_else(|| FlattenError::Dependency(format!("position {n} was never compiled")))?;

        if flat.divisor_shift != 0 {
            return Err(FlattenError::Arithmetic(format!(
                "position {n} has unsupported divisor shift {}",
                flat.divisor_shift
            )));
        }
        let position = operand.position.ok_or_else(|| {
            FlattenError::Dependency(format!("temporary at position {n} has no position"))
        })?;
        if position != n as u64 {
            return Err(FlattenError::Internal(format!(
                "position mismatch at {n}: recorded {position}"
            )));
        }

        let mut value = Coeff::zero();
        for (&term_id, scalar) in &flat.terms {
            let term = system.operand(term_id);
            let set = if term_id == system.unity() {
                true
            } else {
                match term.kind {
                    OperandKind::Input => {
                        let bit = term.bit_index.ok_or_else(|| {
                            FlattenError::Dependency(format!("input {term_id} has no bit index"))
                        })?;
                        inputs.get(bit as usize).copied().unwrap_or(false)
                    }
                    OperandKind::Constant => {
                        let bit = term.bit_index.ok_or_else(|| {
                            FlattenError::Dependency(format!("constant {term_id} has no bit index"))
                        })?;
                        constants.get(bit as usize).copied().unwrap_or(false)
                    }
                    OperandKind::Temporary => {
                        let reference = term.position.ok_or_else(|| {
                            FlattenError::Dependency(format!(
                                "{term_id} has no position in equation {n}"
                            ))
                        })?;
                        if reference >= n as u64 {
                            return Err(FlattenError::Cycle {
                                position: n as u64,
                                reference,
                            });
                        }
                        if !known[reference as usize] {
                            return Err(FlattenError::Dependency(format!(
                                "equation {n} reads unknown position {reference}"
                            )));
                        }
                        values[reference as usize]
                    }
                }
            };
            if set {
                value += scalar;
            }
        }

        if !value.denom().is_one() {
            return Err(FlattenError::Arithmetic(format!(
                "equation {n} evaluated to the fractional value {}",
                coeff::to_decimal_string(&value)
            )));
        }

        // +/-1 after reduction modulo 2 both mean the bit is set
        let bit = !(value.numer() % 2i32).is_zero();
        values[n] = bit;
        known[n] = true;

        if let Some(target) = operand.target {
            let expected = if target == system.zero() {
                false
            } else if target == system.one() {
                true
            } else {
                return Err(FlattenError::Arithmetic(format!(
                    "equation {n} has a complex target (not the 0 or 1 operator)"
                )));
            };
            target_count += 1;
            if bit != expected {
                return Err(FlattenError::TargetMismatch {
                    position: n as u64,
                    expected,
                    computed: bit,
                });
            }
        }
    }

    Ok(target_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coeff::Modulus;
    use crate::system::OperandKind;
    use num_bigint::BigInt;

    const W: Modulus = Modulus::Word(32);

    fn q(n: i64, d: i64) -> Coeff {
        Coeff::new(BigInt::from(n), BigInt::from(d))
    }

    struct Toy {
        system: System,
        t0: OperandId,
        t1: OperandId,
    }

    /// t0 = x0 XOR x1, t1 = x0 AND x1, both designated outputs.
    fn toy() -> Toy {
        let mut system = System::new(32);
        let x0 = system.new_operand(OperandKind::Input, Some(0));
        let x1 = system.new_operand(OperandKind::Input, Some(1));
        system.inputs.push(x0);
        system.inputs.push(x1);

        let sum = system.new_operator();
        system.add_operand_term(sum, x0, q(1, 1), W);
        system.add_operand_term(sum, x1, q(1, 1), W);
        let t0 = system.new_operand(OperandKind::Temporary, Some(0));
        system.set_source(t0, sum);

        let and = system.new_operator();
        system.add_operand_term(and, x0, q(1, 2), W);
        system.add_operand_term(and, x1, q(1, 2), W);
        system.add_operand_term(and, t0, q(-1, 2), W);
        let t1 = system.new_operand(OperandKind::Temporary, Some(1));
        system.set_source(t1, and);

        system.outputs.push(t0);
        system.outputs.push(t1);
        Toy { system, t0, t1 }
    }

    #[test]
    fn test_flatten_assigns_topological_positions() {
        let Toy { mut system, t0, t1 } = toy();
        flatten(&mut system).unwrap();

        // t0 and t1 are themselves the outputs, so they take the final
        // positions in output order
        assert_eq!(system.temps.len(), 2);
        assert_eq!(system.operand(t0).position, Some(0));
        assert_eq!(system.operand(t1).position, Some(1));
        assert_eq!(system.output_positions, vec![Some(0), Some(1)]);

        // every temporary reference inside an equation points strictly
        // backwards
        for (n, &temp) in system.temps.iter().enumerate() {
            let source = system.operand(temp).source.unwrap();
            let flat = system.operator(source).flattened.as_ref().unwrap();
            for (&term_id, _) in &flat.terms {
                let term = system.operand(term_id);
                if term.source.is_some() && term_id != temp {
                    assert!(term.position.unwrap() < n as u64);
                }
            }
        }
    }

    #[test]
    fn test_flatten_missing_source_fails() {
        let mut system = System::new(32);
        let orphan = system.new_operand(OperandKind::Temporary, Some(0));
        system.outputs.push(orphan);
        assert!(matches!(
            flatten(&mut system),
            Err(FlattenError::Dependency(_))
        ));
    }

    #[test]
    fn test_check_flattened_values_and_targets() {
        let Toy { mut system, t1, .. } = toy();
        let one = system.one();
        system.set_target(t1, one);
        flatten(&mut system).unwrap();

        // x0 = 1, x1 = 1: t0 = 0, t1 = 1 and the target holds
        let checked = check_flattened(&system, &[true, true], &[true]).unwrap();
        assert_eq!(checked, 1);

        // running the identical check twice yields the same outcome
        let again = check_flattened(&system, &[true, true], &[true]).unwrap();
        assert_eq!(again, 1);

        // x0 = 0, x1 = 1: t1 = 0, which violates the required 1
        let err = check_flattened(&system, &[false, true], &[true]).unwrap_err();
        assert!(matches!(
            err,
            FlattenError::TargetMismatch {
                position: 1,
                expected: true,
                computed: false,
            }
        ));
    }

    #[test]
    fn test_target_folds_into_referencing_equation() {
        // y references an output operand t (t has a target); flattening
        // must fold the target's terms in instead of referencing t
        let mut system = System::new(32);
        let x0 = system.new_operand(OperandKind::Input, Some(0));
        system.inputs.push(x0);

        let def = system.operator_of_operand(x0, q(1, 1));
        let t = system.new_operand(OperandKind::Temporary, Some(0));
        system.set_source(t, def);
        let one = system.one();
        system.set_target(t, one);

        let use_op = system.new_operator();
        system.add_operand_term(use_op, t, q(1, 1), W);
        system.add_operand_term(use_op, x0, q(1, 1), W);
        let y = system.new_operand(OperandKind::Temporary, Some(1));
        system.set_source(y, use_op);

        system.outputs.push(t);
        system.outputs.push(y);
        flatten(&mut system).unwrap();

        // y's equation contains unity (from t's target One) and x0, but no
        // reference to t
        let source = system.operand(y).source.unwrap();
        let flat = system.operator(source).flattened.as_ref().unwrap();
        assert!(flat.terms.contains_key(&system.unity()));
        assert!(!flat.terms.contains_key(&t));
    }

    #[test]
    fn test_backsubstitute_removes_whole_number_references() {
        // t2 = t0 + x0 references t0 with a whole-number coefficient;
        // finalization must substitute t0's definition
        let mut system = System::new(32);
        let x0 = system.new_operand(OperandKind::Input, Some(0));
        let x1 = system.new_operand(OperandKind::Input, Some(1));
        system.inputs.push(x0);
        system.inputs.push(x1);

        let sum = system.new_operator();
        system.add_operand_term(sum, x0, q(1, 1), W);
        system.add_operand_term(sum, x1, q(1, 1), W);
        let t0 = system.new_operand(OperandKind::Temporary, None);
        system.set_source(t0, sum);

        let use_op = system.new_operator();
        system.add_operand_term(use_op, t0, q(1, 1), W);
        system.add_operand_term(use_op, x0, q(1, 1), W);
        let t2 = system.new_operand(OperandKind::Temporary, Some(0));
        system.set_source(t2, use_op);

        system.outputs.push(t2);
        flatten(&mut system).unwrap();
        assert_eq!(system.temps.len(), 2);

        let mut records = Vec::new();
        let mut walk = Backsubstitution::new(&mut system);
        while let Some(record) = walk.next_equation().unwrap() {
            records.push(record);
        }
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].position, 1);
        assert_eq!(records[1].position, 0);

        // the finalized t2 equation: t0 + x0 with t0 = x0 + x1 becomes
        // 2 x0 + x1 = 0 + x1 (mod 2), so only x1 survives
        let finalized = &records[0];
        assert_eq!(finalized.terms.len(), 1);
        assert_eq!(finalized.terms[0].0, TermRef::Input(1));
        assert_eq!(finalized.terms[0].1, q(1, 1));

        // the walk is single-shot: the flattened forms were consumed
        let source = system.operand(t2).source.unwrap();
        assert!(system.operator(source).flattened.is_none());
    }

    #[test]
    fn test_backsubstitute_keeps_fractional_references() {
        let Toy { mut system, t0, .. } = toy();
        flatten(&mut system).unwrap();

        let mut records = Vec::new();
        let mut walk = Backsubstitution::new(&mut system);
        while let Some(record) = walk.next_equation().unwrap() {
            records.push(record);
        }

        // t1 = x0/2 + x1/2 - t0/2: the -1/2 reference to t0 is a genuine
        // fraction and must survive finalization
        let t0_position = system.operand(t0).position.unwrap();
        let t1_record = &records[0];
        assert!(t1_record
            .terms
            .iter()
            .any(|(term, scalar)| *term == TermRef::Temporary(t0_position)
                && *scalar == q(-1, 2)));
    }
}

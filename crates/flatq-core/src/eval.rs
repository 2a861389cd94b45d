//! Memoized symbolic evaluation.
//!
//! Evaluates operator nodes bottom-up under a concrete 0/1 assignment for
//! inputs and constants. Memoization lives in a per-run side table indexed
//! by arena id, so no state leaks between runs and two evaluations of the
//! same system are independent by construction. The walk is an explicit
//! stack; circuits routinely reach tens of thousands of nodes.

use num_traits::{One, Zero};

use crate::coeff::Coeff;
use crate::error::{EvalError, EvalResult};
use crate::system::{OperandKind, OperatorId, System};

#[derive(Debug, Clone)]
enum Slot {
    Untouched,
    InProgress,
    Done(Coeff),
}

struct Evaluation<'a> {
    system: &'a System,
    inputs: &'a [bool],
    constants: &'a [bool],
    cache: Vec<Slot>,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    id: OperatorId,
    entered: bool,
}

impl<'a> Evaluation<'a> {
    fn new(system: &'a System, inputs: &'a [bool], constants: &'a [bool]) -> Self {
        Evaluation {
            system,
            inputs,
            constants,
            cache: vec![Slot::Untouched; system.operator_count()],
        }
    }

    fn value_of(&mut self, root: OperatorId) -> EvalResult<Coeff> {
        let mut stack = vec![Frame {
            id: root,
            entered: false,
        }];

        while let Some(frame) = stack.pop() {
            if matches!(self.cache[frame.id.0 as usize], Slot::Done(_)) {
                continue;
            }
            if !frame.entered {
                if matches!(self.cache[frame.id.0 as usize], Slot::InProgress) {
                    // the node is its own ancestor
                    return Err(EvalError::Cycle { operator: frame.id });
                }
                self.cache[frame.id.0 as usize] = Slot::InProgress;
                stack.push(Frame {
                    id: frame.id,
                    entered: true,
                });

                let node = self.system.operator(frame.id);
                // push in reverse so children evaluate in term order
                let mut children: Vec<OperatorId> = node.operators.keys().copied().collect();
                for operand_id in node.operands.keys() {
                    if let Some(source) = self.system.operand(*operand_id).source {
                        children.push(source);
                    }
                }
                for child in children.into_iter().rev() {
                    if !matches!(self.cache[child.0 as usize], Slot::Done(_)) {
                        stack.push(Frame {
                            id: child,
                            entered: false,
                        });
                    }
                }
            } else {
                let value = self.combine(frame.id)?;
                self.cache[frame.id.0 as usize] = Slot::Done(value);
            }
        }

        match &self.cache[root.0 as usize] {
            Slot::Done(value) => Ok(value.clone()),
            _ => Err(EvalError::Cycle { operator: root }),
        }
    }

    fn done(&self, id: OperatorId) -> EvalResult<&Coeff> {
        match &self.cache[id.0 as usize] {
            Slot::Done(value) => Ok(value),
            _ => Err(EvalError::Cycle { operator: id }),
        }
    }

    fn combine(&self, id: OperatorId) -> EvalResult<Coeff> {
        let node = self.system.operator(id);
        let mut value = Coeff::zero();

        for (&child, scalar) in &node.operators {
            value += scalar * self.done(child)?;
        }

        for (&operand_id, scalar) in &node.operands {
            let operand = self.system.operand(operand_id);
            if let Some(source) = operand.source {
                let inner = self.done(source)?;
                if !inner.denom().is_one() {
                    return Err(EvalError::FractionalValue {
                        operand: operand_id,
                    });
                }
                // the operand's value is the sum reduced modulo 2
                if !(inner.numer() % 2i32).is_zero() {
                    value += scalar;
                }
            } else {
                let bit_index = operand.bit_index.ok_or(EvalError::UnassignedBit {
                    operand: operand_id,
                })?;
                let bits = match operand.kind {
                    OperandKind::Input => self.inputs,
                    OperandKind::Constant => self.constants,
                    OperandKind::Temporary => {
                        return Err(EvalError::MissingSource {
                            operand: operand_id,
                        })
                    }
                };
                let bit = *bits.get(bit_index as usize).ok_or(EvalError::BitOutOfRange {
                    operand: operand_id,
                    bit_index,
                })?;
                if bit {
                    value += scalar;
                }
            }
        }

        Ok(value)
    }
}

/// Evaluate a single operator node to its exact rational value.
pub fn evaluate_operator(
    system: &System,
    id: OperatorId,
    inputs: &[bool],
    constants: &[bool],
) -> EvalResult<Coeff> {
    Evaluation::new(system, inputs, constants).value_of(id)
}

/// Evaluate every designated output operand to a boolean.
///
/// Each output's defining sum must reduce to an integer; the output bit is
/// that integer modulo 2 (a remainder of +/-1 both mean 1).
pub fn evaluate_outputs(
    system: &System,
    inputs: &[bool],
    constants: &[bool],
) -> EvalResult<Vec<bool>> {
    let mut evaluation = Evaluation::new(system, inputs, constants);
    let mut outputs = Vec::with_capacity(system.outputs.len());

    for &operand_id in &system.outputs {
        let source = system
            .operand(operand_id)
            .source
            .ok_or(EvalError::MissingSource {
                operand: operand_id,
            })?;
        let value = evaluation.value_of(source)?;
        if !value.denom().is_one() {
            return Err(EvalError::FractionalValue {
                operand: operand_id,
            });
        }
        outputs.push(!(value.numer() % 2i32).is_zero());
    }

    Ok(outputs)
}

//! End-to-end: a hand-built two-gate system is flattened, serialized,
//! converted to rows, rebuilt as a matrix and checked against candidate
//! solutions.
//!
//! The system: t0 = x0 XOR x1, t1 = x0 AND x1, and one output demanding
//! t1 = 1 (expressed as out = t1 + 1, which must be zero). With
//! x0 = x1 = 1 the demand holds; flipping x0 breaks it.

use std::io::Cursor;

use flatq_codec::{
    EquationFileHeader, EquationFileReader, EquationFileWriter, EquationOrder, RowFileHeader,
    RowFileReader, RowFileWriter,
};
use flatq_core::coeff::{Coeff, Modulus};
use flatq_core::{evaluate_outputs, flatten, Backsubstitution, OperandKind, System};
use flatq_matrix::{build_matrix, check_solution, verify_rows_zero, MatrixError, RawAcceptor, Word};
use num_bigint::BigInt;

const W: Modulus = Modulus::Word(32);

fn q(n: i64, d: i64) -> Coeff {
    Coeff::new(BigInt::from(n), BigInt::from(d))
}

/// Build, flatten and serialize the system; returns the row file bytes.
fn compile() -> (Vec<u8>, RowFileHeader) {
    let mut system = System::new(32);
    let x0 = system.new_operand(OperandKind::Input, Some(0));
    let x1 = system.new_operand(OperandKind::Input, Some(1));
    system.inputs.push(x0);
    system.inputs.push(x1);

    // t0 = (x0 + x1) mod 2
    let sum = system.new_operator();
    system.add_operand_term(sum, x0, q(1, 1), W);
    system.add_operand_term(sum, x1, q(1, 1), W);
    let t0 = system.new_operand(OperandKind::Temporary, None);
    system.set_source(t0, sum);

    // t1 = (x0/2 + x1/2 - t0/2) mod 2 = x0 AND x1
    let and = system.new_operator();
    system.add_operand_term(and, x0, q(1, 2), W);
    system.add_operand_term(and, x1, q(1, 2), W);
    system.add_operand_term(and, t0, q(-1, 2), W);
    let t1 = system.new_operand(OperandKind::Temporary, None);
    system.set_source(t1, and);

    // out = (t1 + 1) mod 2, demanded to be zero
    let unity = system.unity();
    let demand = system.new_operator();
    system.add_operand_term(demand, t1, q(1, 1), W);
    system.add_operand_term(demand, unity, q(1, 1), W);
    let out = system.new_operand(OperandKind::Temporary, Some(0));
    system.set_source(out, demand);
    let zero = system.zero();
    system.set_target(out, zero);
    system.outputs.push(out);

    // the satisfying assignment drives the output demand to zero
    let outputs = evaluate_outputs(&system, &[true, true], &[true]).unwrap();
    assert_eq!(outputs, vec![false]);

    flatten(&mut system).unwrap();
    assert_eq!(system.temps.len(), 3);

    let targets: Vec<u64> = system
        .output_positions
        .iter()
        .map(|p| p.unwrap())
        .collect();
    let constants: Vec<u64> = vec![1];
    let equation_count = system.temps.len() as u64;
    let input_count = system.inputs.len() as u64;
    let column_count = input_count + equation_count + constants.len() as u64;

    let header = EquationFileHeader {
        magic: *b"xorand  ",
        description: *b"toydemo ",
        input_count,
        column_count,
        targets: targets.clone(),
        constants: constants.clone(),
    };

    let mut writer = EquationFileWriter::new(
        Vec::new(),
        header,
        EquationOrder::Descending,
        equation_count,
    );
    let mut walk = Backsubstitution::new(&mut system);
    while let Some(record) = walk.next_equation().unwrap() {
        writer.write_equation(&record).unwrap();
    }
    let equation_bytes = writer.finish().unwrap();

    // convert the equation file into the row-chunk exchange format
    let mut reader = EquationFileReader::new(Cursor::new(&equation_bytes[..])).unwrap();
    let row_header = RowFileHeader {
        equation_count: reader.equation_count(),
        input_count: reader.header().input_count,
        column_count: reader.header().column_count,
        targets: reader.header().targets.clone(),
        constants: reader.header().constants.clone(),
    };
    let mut rows = RowFileWriter::new(Vec::new(), row_header.clone(), 32).unwrap();
    while let Some(record) = reader.next_equation().unwrap() {
        rows.write_equation(&record).unwrap();
    }
    (rows.finish().unwrap(), row_header)
}

#[test]
fn test_satisfying_solution_checks_out() {
    let (bytes, header) = compile();
    let mut reader = RowFileReader::new(Cursor::new(bytes)).unwrap();
    let matrix = build_matrix(&mut reader, &mut RawAcceptor).unwrap();

    let outcome = check_solution(&matrix, &header, &[true, true]).unwrap();
    assert!(outcome.passed());
    // t0 = 0, t1 = 1, out = 0
    assert_eq!(outcome.values[2], Some(false));
    assert_eq!(outcome.values[3], Some(true));
    assert_eq!(outcome.values[4], Some(false));
    assert_eq!(outcome.outputs, vec![Some(false)]);

    // the zero-demand rows hold as well
    verify_rows_zero(&matrix, &outcome.values).unwrap();
}

#[test]
fn test_checking_is_idempotent() {
    let (bytes, header) = compile();
    let mut reader = RowFileReader::new(Cursor::new(bytes)).unwrap();
    let matrix = build_matrix(&mut reader, &mut RawAcceptor).unwrap();

    let first = check_solution(&matrix, &header, &[true, true]).unwrap();
    let second = check_solution(&matrix, &header, &[true, true]).unwrap();
    assert_eq!(first.values, second.values);
    assert_eq!(first.failed_rows, second.failed_rows);
    assert_eq!(first.outputs, second.outputs);
}

#[test]
fn test_wrong_solution_fails_the_demand() {
    let (bytes, header) = compile();
    let mut reader = RowFileReader::new(Cursor::new(bytes)).unwrap();
    let matrix = build_matrix(&mut reader, &mut RawAcceptor).unwrap();

    // x0 = 0, x1 = 1: every equation still defines its temporary, but
    // out = 1 and the "out must be zero" row is violated
    let outcome = check_solution(&matrix, &header, &[false, true]).unwrap();
    assert!(outcome.passed());
    assert_eq!(outcome.outputs, vec![Some(true)]);

    let err = verify_rows_zero(&matrix, &outcome.values).unwrap_err();
    assert!(matches!(err, MatrixError::InconsistentEquation { .. }));
}

#[test]
fn test_corrupted_row_is_reported_inconsistent() {
    let (bytes, header) = compile();
    let mut reader = RowFileReader::new(Cursor::new(bytes)).unwrap();
    let mut matrix = build_matrix(&mut reader, &mut RawAcceptor).unwrap();

    // poison the last equation row's unity column: its residue can no
    // longer land on 0 or the sign constant
    let unity_col = matrix.logical_width() - 1;
    matrix.set(2, unity_col, Word::new(3)).unwrap();

    let outcome = check_solution(&matrix, &header, &[true, true]).unwrap();
    assert!(!outcome.passed());
    assert_eq!(outcome.failed_rows, vec![2]);
    // the poisoned row defines nothing, so its output stays unknown
    assert_eq!(outcome.outputs, vec![None]);
}

#[test]
fn test_row_reduction_preserves_solutions() {
    let (bytes, header) = compile();
    let mut reader = RowFileReader::new(Cursor::new(bytes)).unwrap();
    let mut matrix = build_matrix(&mut reader, &mut RawAcceptor).unwrap();

    let outcome = check_solution(&matrix, &header, &[true, true]).unwrap();
    assert!(outcome.passed());

    matrix.row_reduce().unwrap();

    // reduced rows are linear combinations of the originals, so the
    // satisfying assignment still clears every one of them
    verify_rows_zero(&matrix, &outcome.values).unwrap();
}

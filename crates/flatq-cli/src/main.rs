//! flatq command line.
//!
//! # Commands
//!
//! - `flatq compile` - build the symbolic round circuit, flatten it and
//!   write the equation file plus the matching solution file
//! - `flatq convert` - turn an equation file into the row-chunk exchange
//!   format a verifier consumes
//! - `flatq check` - rebuild the matrix from a row-chunk file and check a
//!   candidate solution against it
//! - `flatq selftest` - run the reference implementation against its
//!   embedded vectors
//!
//! The compiler and the verifier communicate only through the files; any
//! format or consistency error aborts the run with a nonzero status.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use flatq_codec::{
    read_solution, write_solution, EquationFileHeader, EquationFileReader, EquationFileWriter,
    EquationOrder, RowFileHeader, RowFileReader, RowFileWriter,
};
use flatq_core::{check_flattened, evaluate_outputs, flatten, Backsubstitution, System};
use flatq_matrix::{build_matrix, check_solution, verify_rows_zero, RawAcceptor};
use flatq_sha256::util::{compress, test_block, INITIAL_H};
use flatq_sha256::{assignment_for_block, build_circuit, CircuitConfig};

#[derive(Parser)]
#[command(name = "flatq")]
#[command(about = "Algebraic linearization of hash round functions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and flatten the circuit; write equations and solution files
    Compile {
        /// Equation file to write
        #[arg(long, default_value = "problem.bin")]
        output: PathBuf,
        /// Solution file to write
        #[arg(long, default_value = "solution.bin")]
        solution: PathBuf,
        /// Rounds per application (multiple of 8, up to 64)
        #[arg(long, default_value_t = 64)]
        rounds: u32,
        /// Leading W bits withheld as unknowns
        #[arg(long, default_value_t = 0)]
        unknown_bits: u32,
        /// Number of hash applications
        #[arg(long, default_value_t = 1)]
        applications: u32,
        /// Demand the outputs equal the embedded block's digest
        #[arg(long)]
        constrain_outputs: bool,
    },
    /// Convert an equation file to the row-chunk exchange format
    Convert {
        /// Equation file to read
        #[arg(long, default_value = "problem.bin")]
        input: PathBuf,
        /// Row-chunk file to write
        #[arg(long, default_value = "problem.dat")]
        output: PathBuf,
    },
    /// Check a candidate solution against a row-chunk file
    Check {
        /// Row-chunk file to read
        #[arg(long, default_value = "problem.dat")]
        rows: PathBuf,
        /// Solution file to read
        #[arg(long, default_value = "solution.bin")]
        solution: PathBuf,
    },
    /// Run the reference implementation self-test
    Selftest,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Compile {
            output,
            solution,
            rounds,
            unknown_bits,
            applications,
            constrain_outputs,
        } => compile(
            &output,
            &solution,
            rounds,
            unknown_bits,
            applications,
            constrain_outputs,
        ),
        Commands::Convert { input, output } => convert(&input, &output),
        Commands::Check { rows, solution } => check(&rows, &solution),
        Commands::Selftest => selftest(),
    }
}

fn compile(
    output: &PathBuf,
    solution: &PathBuf,
    rounds: u32,
    unknown_bits: u32,
    applications: u32,
    constrain_outputs: bool,
) -> anyhow::Result<()> {
    let config = CircuitConfig {
        unknown_w_bits: unknown_bits,
        target_h_bits: 256,
        apply_count: applications,
        rounds,
        constrain_outputs,
    };

    log::info!("building the round circuit ({rounds} rounds, {applications} applications)");
    let mut system = System::new(32);
    build_circuit(&mut system, &config)?;

    let block = test_block();
    let assignment = assignment_for_block(&config, &block);

    log::info!("evaluating the circuit as a sanity check");
    let bits = evaluate_outputs(&system, &assignment.inputs, &assignment.constants)?;
    let mut digest = [0u32; 8];
    for (i, &bit) in bits.iter().enumerate().take(256) {
        if bit {
            digest[i / 32] |= 1 << (i % 32);
        }
    }
    println!(
        "circuit digest: {}",
        digest.map(|w| format!("{w:08X}")).join(" ")
    );

    log::info!("flattening");
    flatten(&mut system)?;
    log::info!("{} equations", system.temps.len());

    check_flattened(&system, &assignment.inputs, &assignment.constants)
        .context("the flattened system disagrees with the circuit")?;

    let equation_count = system.temps.len() as u64;
    let input_count = system.inputs.len() as u64;
    let constants: Vec<u64> = assignment.constants.iter().map(|&b| u64::from(b)).collect();
    let targets = system
        .output_positions
        .iter()
        .map(|p| p.context("flatten left an output unplaced"))
        .collect::<anyhow::Result<Vec<u64>>>()?;
    let column_count = input_count + equation_count + constants.len() as u64;

    let mut description = *b"        ";
    let text = format!("-{unknown_bits}equ256");
    for (slot, byte) in description.iter_mut().zip(text.bytes()) {
        *slot = byte;
    }
    let header = EquationFileHeader {
        magic: *b"sha256xn",
        description,
        input_count,
        column_count,
        targets,
        constants,
    };

    log::info!("finalizing equations into {}", output.display());
    let file = File::create(output)
        .with_context(|| format!("unable to create {}", output.display()))?;
    let mut writer = EquationFileWriter::new(
        BufWriter::new(file),
        header,
        EquationOrder::Descending,
        equation_count,
    );
    let mut walk = Backsubstitution::new(&mut system);
    while let Some(record) = walk.next_equation()? {
        writer.write_equation(&record)?;
    }
    writer.finish()?;

    log::info!("writing {}", solution.display());
    let file = File::create(solution)
        .with_context(|| format!("unable to create {}", solution.display()))?;
    write_solution(BufWriter::new(file), &assignment.inputs)?;

    println!("compiled {equation_count} equations over {column_count} columns");
    Ok(())
}

fn convert(input: &PathBuf, output: &PathBuf) -> anyhow::Result<()> {
    let file =
        File::open(input).with_context(|| format!("unable to open {}", input.display()))?;
    let mut reader = EquationFileReader::new(BufReader::new(file))?;
    log::info!(
        "converting {} equations from {}",
        reader.equation_count(),
        input.display()
    );

    let row_header = RowFileHeader {
        equation_count: reader.equation_count(),
        input_count: reader.header().input_count,
        column_count: reader.header().column_count,
        targets: reader.header().targets.clone(),
        constants: reader.header().constants.clone(),
    };
    let file = File::create(output)
        .with_context(|| format!("unable to create {}", output.display()))?;
    let mut writer = RowFileWriter::new(BufWriter::new(file), row_header, 32)?;

    let mut converted = 0u64;
    while let Some(record) = reader.next_equation()? {
        writer.write_equation(&record)?;
        converted += 1;
    }
    writer.finish()?;

    println!("converted {converted} equations into {}", output.display());
    Ok(())
}

fn check(rows: &PathBuf, solution: &PathBuf) -> anyhow::Result<()> {
    let file = File::open(rows).with_context(|| format!("unable to open {}", rows.display()))?;
    let mut reader = RowFileReader::new(BufReader::new(file))?;
    let header = reader.header().clone();

    log::info!(
        "{} equations, {} unknown inputs, {} columns",
        header.equation_count,
        header.input_count,
        header.column_count
    );

    let matrix = build_matrix(&mut reader, &mut RawAcceptor)?;

    let file = File::open(solution)
        .with_context(|| format!("unable to open {}", solution.display()))?;
    let inputs = read_solution(BufReader::new(file))?;

    let outcome = check_solution(&matrix, &header, &inputs)?;
    if !outcome.passed() {
        for row in &outcome.failed_rows {
            eprintln!("inconsistent equation at row {row}");
        }
        bail!("{} equation rows failed", outcome.failed_rows.len());
    }

    verify_rows_zero(&matrix, &outcome.values).context("an output demand was violated")?;

    let mut digest = [0u32; 8];
    for (i, bit) in outcome.outputs.iter().enumerate().take(256) {
        if bit.unwrap_or(false) {
            digest[i / 32] |= 1 << (i % 32);
        }
    }
    println!(
        "all {} rows check out; outputs: {}",
        header.equation_count,
        digest.map(|w| format!("{w:08X}")).join(" ")
    );
    Ok(())
}

fn selftest() -> anyhow::Result<()> {
    let w = test_block();
    let mut h = INITIAL_H;
    compress(&mut h, &w, 64);
    let rendered = h.map(|x| format!("{x:08X}")).join(" ");
    println!("{rendered}");
    let expected = "9F86D081 884C7D65 9A2FEAA0 C55AD015 A3BF4F1B 2B0B822C D15D6C15 B0F00A08";
    if rendered != expected {
        bail!("self-test mismatch: expected {expected}");
    }
    println!("self-test passed");
    Ok(())
}

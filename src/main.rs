use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::Colorize;
use miette::{IntoDiagnostic, Result};

use rivet::runtime::DEFAULT_MEM_SIZE;
use rivet::{AsmParser, RunState, StdIo};

/// Rivet is an assembler & virtual machine toolchain for the RASM
/// assembly dialect.
#[derive(Parser)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Assemble a `.rasm` source file into a `.rvm` bytecode image
    Asm {
        /// `.rasm` file to assemble
        src: PathBuf,
        /// Destination for the bytecode image
        dest: Option<PathBuf>,
    },
    /// Execute a compiled `.rvm` bytecode image
    Exec {
        /// Bytecode image to execute
        bin: PathBuf,
        /// Memory image size in bytes
        #[arg(long, default_value_t = DEFAULT_MEM_SIZE)]
        memory: usize,
    },
    /// Assemble a `.rasm` file and run it immediately
    Run {
        /// `.rasm` file to run
        name: PathBuf,
        /// Memory image size in bytes
        #[arg(long, default_value_t = DEFAULT_MEM_SIZE)]
        memory: usize,
    },
    /// Check a `.rasm` file without running or outputting bytecode
    Check {
        /// File to check
        name: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let Some(command) = args.command else {
        println!("\n~ rivet v{VERSION} ~");
        println!("{SHORT_INFO}");
        return Ok(());
    };

    match command {
        Command::Asm { src, dest } => {
            let bytes = assemble_file(&src)?;
            let out = dest.unwrap_or_else(|| src.with_extension("rvm"));
            fs::write(&out, &bytes).into_diagnostic()?;
            println!("{:>12} binary", "Finished".green().bold());
            println!("{:>12} {}", "Saved to".green().bold(), out.display());
            Ok(())
        }
        Command::Exec { bin, memory } => {
            let bytes = fs::read(&bin).into_diagnostic()?;
            execute(&bytes, memory, &bin)
        }
        Command::Run { name, memory } => {
            let bytes = assemble_file(&name)?;
            execute(&bytes, memory, &name)
        }
        Command::Check { name } => {
            assemble_file(&name)?;
            println!("{:>12} with 0 errors", "Finished".green().bold());
            Ok(())
        }
    }
}

fn assemble_file(name: &Path) -> Result<Vec<u8>> {
    // Diagnostics borrow the source for the rest of the process
    let contents: &'static str =
        Box::leak(fs::read_to_string(name).into_diagnostic()?.into_boxed_str());
    println!(
        "{:>12} target {}",
        "Assembling".green().bold(),
        name.display()
    );
    match AsmParser::new(contents).assemble() {
        Ok(bytes) => Ok(bytes),
        Err(diags) => {
            eprintln!("Errors: {}", diags.len());
            for (i, err) in diags.iter().enumerate() {
                eprintln!("[{:>6}] {:?}", i + 1, err);
            }
            std::process::exit(1);
        }
    }
}

fn execute(bytes: &[u8], memory: usize, name: &Path) -> Result<()> {
    println!("{:>12} binary", "Running".green().bold());
    let mut program = RunState::with_mem_size(bytes, memory)?;
    program.run(&mut StdIo)?;
    println!(
        "{:>12} target {}",
        "Completed".green().bold(),
        name.display()
    );
    Ok(())
}

const SHORT_INFO: &str = r"
Welcome to rivet, an all-in-one toolchain for working with RASM assembly
code and RVM bytecode images.
Please use `-h` or `--help` to access the usage instructions.
";

const VERSION: &str = env!("CARGO_PKG_VERSION");

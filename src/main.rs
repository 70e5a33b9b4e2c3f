use anyhow::{Context, Result};
use clap::Parser;
use microbrew::config::{RuntimeConfig, DEFAULT_MAX_CALL_DEPTH};
use microbrew::disasm::Disassembly;
use microbrew::jvm::{read_class_file, JVMParser};
use microbrew::program::Program;
use microbrew::runtime::{Runtime, MAIN_DESCRIPTOR, MAIN_METHOD};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Run the static entry method of a Java class file.
///
/// Only the integer subset of the JVM is supported: int arithmetic, int
/// arrays, static calls within the class and `System.out.println(int)`.
#[derive(Parser, Debug)]
#[command(name = "microbrew")]
#[command(version)]
struct Cli {
    /// Path to the `.class` file
    class_file: PathBuf,
    /// Name of the entry method
    #[arg(long, default_value = MAIN_METHOD)]
    entry: String,
    /// Descriptor of the entry method
    #[arg(long, default_value = MAIN_DESCRIPTOR)]
    descriptor: String,
    /// Maximum number of nested frames
    #[arg(long, default_value_t = DEFAULT_MAX_CALL_DEPTH)]
    max_call_depth: usize,
    /// Abort after executing this many instructions
    #[arg(long)]
    max_steps: Option<u64>,
    /// Print the bytecode of every method instead of running
    #[arg(long)]
    disassemble: bool,
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let class_file_bytes = read_class_file(&cli.class_file)?;
    let class_file = JVMParser::parse(&class_file_bytes)
        .with_context(|| format!("failed to parse {}", cli.class_file.display()))?;
    let program = Program::new(&class_file)
        .with_context(|| format!("failed to load {}", cli.class_file.display()))?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if cli.disassemble {
        write!(out, "{}", Disassembly(&program))?;
        return Ok(());
    }

    let config = RuntimeConfig::new()
        .with_max_call_depth(cli.max_call_depth)
        .with_max_steps(cli.max_steps);
    let mut runtime = Runtime::with_config(program, config);
    runtime.run_entry(&cli.entry, &cli.descriptor, &mut out)?;
    out.flush()?;
    Ok(())
}

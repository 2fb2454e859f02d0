//! Blaze compiler CLI.
//!
//! A single `compile` action: read a source file, run it through the
//! driver's lex → parse → resolve → codegen → emit pipeline, and write
//! the resulting executable.

use std::path::PathBuf;
use std::process;

use clap::Parser as ClapParser;

use blaze::config::{CompilerConfig, Target};
use blaze::driver;

#[derive(ClapParser)]
#[command(name = "blazec")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Blaze compiler - compile .blz programs to freestanding executables", long_about = None)]
struct Cli {
    /// Input source file
    input: PathBuf,

    /// Output executable path (defaults to the input filename without its extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Target platform and binary format
    #[arg(long, default_value_t = Target::host_default())]
    target: Target,

    /// Emit a disassembly-style text listing alongside the binary; has no
    /// effect on the binary itself
    #[arg(long)]
    keep_asm: bool,

    /// Raise the compiler's own log verbosity (equivalent to RUST_LOG=debug)
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default_directive = if verbose { "blaze=debug" } else { "blaze=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn default_output_path(input: &std::path::Path, target: Target) -> PathBuf {
    let stem = input
        .file_stem()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("a.out"));
    match target {
        Target::Windows => stem.with_extension("exe"),
        Target::Linux => stem,
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&cli.input, cli.target));

    let config = CompilerConfig::new(cli.target);

    if cli.keep_asm {
        if let Err(e) = write_asm_listing(&cli.input, &output, &config) {
            eprintln!("blazec: {e}");
        }
    }

    match driver::compile_file(&cli.input, &output, &config) {
        Ok(()) => {}
        Err(e) => {
            let source = std::fs::read_to_string(&cli.input).unwrap_or_default();
            eprintln!("{}", e.render(&cli.input.display().to_string(), &source));
            process::exit(1);
        }
    }
}

/// `--keep-asm`: dump a best-effort disassembly-style listing of the
/// generated code next to the output path. This never influences
/// the emitted binary — it's a debugging aid, written before the real
/// compile so a failed compile still leaves a listing of what codegen
/// produced up to the point it gave up.
fn write_asm_listing(
    input: &std::path::Path,
    output: &std::path::Path,
    config: &CompilerConfig,
) -> Result<(), blaze::CompileError> {
    let source = std::fs::read_to_string(input)
        .map_err(|e| blaze::CompileError::emit(format!("cannot read {}: {e}", input.display())))?;
    let code = driver::compile_to_bytes(&source, config)?;
    let listing_path = output.with_extension("asm.txt");
    let mut listing = String::new();
    for (i, byte) in code.iter().enumerate() {
        if i % 16 == 0 {
            if i != 0 {
                listing.push('\n');
            }
            listing.push_str(&format!("{i:06x}: "));
        }
        listing.push_str(&format!("{byte:02x} "));
    }
    listing.push('\n');
    std::fs::write(&listing_path, listing)
        .map_err(|e| blaze::CompileError::emit(format!("cannot write {}: {e}", listing_path.display())))?;
    Ok(())
}

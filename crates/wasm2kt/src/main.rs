use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use wasm2kt::{transpile, Features, TranspileOptions};

/// wasm2kt — read a WebAssembly binary and convert it to a Kotlin source file.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Input WebAssembly binary (.wasm)
    input: PathBuf,

    /// Use multiple times for more info
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output file for the generated Kotlin source, by default stdout
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Package for the generated Kotlin source file, by default none
    #[arg(long, short)]
    package: Option<String>,

    /// Class for the generated module, by default derived from the output
    /// filename
    #[arg(long, short)]
    class: Option<String>,

    /// Ignore debug names in the binary file
    #[arg(long)]
    no_debug_names: bool,

    /// Enable exception handling
    #[arg(long)]
    enable_exceptions: bool,

    /// Enable bulk memory operations
    #[arg(long)]
    enable_bulk_memory: bool,

    /// Enable multi-value blocks and results
    #[arg(long)]
    enable_multi_value: bool,

    /// Enable tail calls
    #[arg(long)]
    enable_tail_call: bool,

    /// Enable multiple linear memories
    #[arg(long)]
    enable_multi_memory: bool,
}

/// Derive the output class name from a path: basename, minus a `.kt` suffix.
fn class_name_from(path: &Path) -> String {
    let stem = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    stem.strip_suffix(".kt").unwrap_or(&stem).to_string()
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose > 0 {
        let level = if cli.verbose > 1 { "trace" } else { "debug" };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
            .init();
    }

    let wasm_bytes =
        fs::read(&cli.input).with_context(|| format!("failed to read {}", cli.input.display()))?;

    let mut features = Features::default();
    features.exceptions |= cli.enable_exceptions;
    features.bulk_memory |= cli.enable_bulk_memory;
    features.multi_value |= cli.enable_multi_value;
    features.tail_call |= cli.enable_tail_call;
    features.multi_memory |= cli.enable_multi_memory;

    let class_name = match (&cli.class, &cli.output) {
        (Some(class), _) => class.clone(),
        (None, Some(out)) => class_name_from(out),
        (None, None) => "Wasm".to_string(),
    };

    let options = TranspileOptions {
        class_name,
        package_name: cli.package.clone(),
        read_debug_names: !cli.no_debug_names,
        features,
    };

    let kotlin = transpile(&wasm_bytes, &options).context("translation failed")?;

    if let Some(output_path) = cli.output {
        fs::write(&output_path, &kotlin)
            .with_context(|| format!("failed to write {}", output_path.display()))?;
    } else {
        print!("{}", kotlin);
    }

    Ok(())
}

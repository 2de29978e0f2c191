use std::{path::PathBuf, process::ExitCode};

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Compile device tree source into a flattened device tree blob.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Device tree source file
    input: PathBuf,
    /// Path of the blob to write
    output: PathBuf,
}

fn init_logging() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("dtc=warn,dts_compiler=warn"))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("failed to install the log subscriber")
}

fn run(cli: Cli) -> anyhow::Result<()> {
    init_logging()?;

    dts_compiler::compile(&cli.input, &cli.output)?;
    tracing::debug!(output = %cli.output.display(), "done");

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

//! Datamap: build the datamap tile pyramid and publish it to S3.
//!
//! # Usage
//!
//! ```text
//! datamap run [--create] [--upload] [--output <dir>] [--concurrency <n>]
//!             [--bucket <name>] [--db-url <url>]
//! datamap plan --output <dir> [--bucket <name>] [--list | --json]
//! ```
//!
//! Global flags: `--config <path>`, `-v/--verbose`.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use commands::{plan::PlanArgs, run::RunArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "datamap",
    version,
    about = "Generate datamap tiles and sync them to an S3 bucket",
    long_about = None,
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Flags accepted by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Config file (default: ~/.datamap/config.yaml, if present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging, overriding RUST_LOG.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate tiles from the datamap tables and/or upload them.
    Run(RunArgs),

    /// Show what an upload would change in the bucket, without changing it.
    Plan(PlanArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose);
    match cli.command {
        Commands::Run(args) => args.run(&cli.global),
        Commands::Plan(args) => args.run(&cli.global).map(|()| ExitCode::SUCCESS),
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

//! `datamap run`: generate tiles and/or upload them.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, CommandFactory};

use datamap_core::{config, Interrupt, LogReporter, RunSummary, StageContext, Timer};
use datamap_export::SqlRowSource;
use datamap_sync::{check_bucket, Phases, Pipeline, PipelineError, S3StoreFactory, WorkDirs};

use super::{absolute, bucket_name};
use crate::GlobalArgs;

/// Exit code of a run stopped by Ctrl-C.
const EXIT_INTERRUPTED: u8 = 130;

/// Arguments for `datamap run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Create tiles from the datamap tables.
    #[arg(long)]
    pub create: bool,

    /// Upload tiles to the S3 bucket.
    #[arg(long)]
    pub upload: bool,

    /// Worker count per stage (default: all available CPUs).
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Directory for generated tiles and working files. A temporary
    /// directory is used if omitted.
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Bucket to sync tiles to.
    #[arg(long, env = "ASSET_BUCKET")]
    pub bucket: Option<String>,

    /// Read-only database URL for the datamap tables.
    #[arg(long, env = "DB_READONLY_URI", hide_env_values = true)]
    pub db_url: Option<String>,
}

impl RunArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<ExitCode> {
        let config = config::load(global.config.as_deref()).context("failed to load config")?;

        let max_concurrency = available_concurrency();
        let concurrency = self.concurrency.unwrap_or(max_concurrency);
        if !(1..=max_concurrency).contains(&concurrency) {
            bail!("--concurrency must be between 1 and {max_concurrency}, got {concurrency}");
        }

        let phases = Phases {
            create: self.create,
            upload: self.upload,
        };
        let output = self.output.as_deref().map(absolute).transpose()?;
        check_phases(phases, output.as_deref())?;
        if !phases.create && !phases.upload {
            print_help()?;
            return Ok(ExitCode::SUCCESS);
        }

        let bucket = bucket_name(self.bucket.as_deref());
        let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
        let interrupt = Interrupt::new();
        interrupt
            .install_ctrlc()
            .context("failed to install Ctrl-C handler")?;
        let stage = StageContext::new(concurrency)
            .with_progress_interval(config.progress_interval())
            .with_interrupt(interrupt.clone())
            .with_reporter(Arc::new(LogReporter::new("datamap")));
        let mut pipeline = Pipeline::new(config, stage);

        if phases.upload {
            let Some(bucket) = bucket.as_deref() else {
                bail!("unable to determine the upload bucket; pass --bucket or set ASSET_BUCKET");
            };
            let factory = S3StoreFactory::from_env(bucket, runtime.handle().clone());
            check_bucket(&factory.store())?;
            pipeline = pipeline.with_store(Arc::new(factory));
        }
        if phases.create {
            let Some(url) = self.db_url.as_deref() else {
                bail!("--create needs the datamap database; pass --db-url or set DB_READONLY_URI");
            };
            let connections = u32::try_from(concurrency).unwrap_or(u32::MAX);
            let source = SqlRowSource::connect(url, connections, runtime.handle().clone())
                .context("failed to connect to the datamap database")?;
            pipeline = pipeline.with_source(Arc::new(source));
        }

        // Removed when dropped at the end of the run.
        let temp_dir = match output {
            Some(_) => None,
            None => Some(
                tempfile::Builder::new()
                    .prefix("datamap-")
                    .tempdir()
                    .context("failed to create temporary output directory")?,
            ),
        };
        let output_dir = match (&output, &temp_dir) {
            (Some(dir), _) => dir.clone(),
            (None, Some(temp)) => temp.path().to_path_buf(),
            (None, None) => bail!("no output directory"),
        };

        let task = phases.task();
        let timer = Timer::start();
        let result = pipeline.generate(&output_dir, phases);
        let duration_s = timer.duration_s();

        let outcome = Outcome::of(&result, &interrupt);
        let success = outcome == Outcome::Complete;
        let outcome_name = outcome.as_str();
        let summary = result.as_ref().cloned().unwrap_or_default();
        tracing::info!(
            target: "canonical-log-line",
            success,
            duration_s,
            create = phases.create,
            upload = phases.upload,
            concurrency,
            bucket = bucket.as_deref().unwrap_or(""),
            summary = %serde_json::to_string(&summary).unwrap_or_default(),
            "Datamap tile {task} {outcome_name} in {duration_s:.1} seconds."
        );

        match (outcome, result) {
            (Outcome::Interrupted, _) => Ok(ExitCode::from(EXIT_INTERRUPTED)),
            (_, Ok(_)) => Ok(ExitCode::SUCCESS),
            (_, Err(err)) => {
                Err(anyhow::Error::new(err).context(format!("datamap tile {task} failed")))
            }
        }
    }
}

/// How a run ended, for the canonical log line and the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Complete,
    Interrupted,
    Failed,
}

impl Outcome {
    /// A failure once Ctrl-C was seen is an interrupt, whatever the error:
    /// the signal also reaches the tool processes.
    fn of(result: &Result<RunSummary, PipelineError>, interrupt: &Interrupt) -> Self {
        match result {
            Ok(_) => Outcome::Complete,
            Err(err) if err.is_interrupted() || interrupt.is_raised() => Outcome::Interrupted,
            Err(_) => Outcome::Failed,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Outcome::Complete => "complete",
            Outcome::Interrupted => "interrupted",
            Outcome::Failed => "failed",
        }
    }
}

/// CPUs this process may run on.
fn available_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Reject phase and output combinations that would lose work or wipe the
/// bucket.
fn check_phases(phases: Phases, output: Option<&Path>) -> Result<()> {
    match output {
        Some(output) => {
            let tiles = WorkDirs::new(output).tiles;
            if !phases.create && !tiles.is_dir() {
                bail!(
                    "the tiles subfolder of --output ({}) must already exist when using \
                     --upload without --create, to avoid deleting files from the bucket",
                    tiles.display()
                );
            }
        }
        None if phases.create && !phases.upload => bail!(
            "--output is required with --create but without --upload, since the \
             temporary folder is removed at exit"
        ),
        None if phases.upload && !phases.create => bail!(
            "--output is required with --upload but without --create, to avoid \
             deleting all tiles in the bucket"
        ),
        None => {}
    }
    Ok(())
}

fn print_help() -> Result<()> {
    let mut cli = crate::Cli::command();
    if let Some(run) = cli.find_subcommand_mut("run") {
        run.print_help().context("failed to print help")?;
    }
    Ok(())
}

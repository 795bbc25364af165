//! `datamap plan`: show what `run --upload` would change, without changing it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use datamap_core::{config, StageContext};
use datamap_sync::{Pipeline, S3StoreFactory, SyncPlan, WorkDirs};

use super::{absolute, bucket_name};
use crate::GlobalArgs;

/// Arguments for `datamap plan`.
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Output directory of an earlier run; its tiles subfolder is compared.
    #[arg(long)]
    pub output: PathBuf,

    /// Bucket to compare against.
    #[arg(long, env = "ASSET_BUCKET")]
    pub bucket: Option<String>,

    /// List every path to upload, update or delete.
    #[arg(long, conflicts_with = "json")]
    pub list: bool,

    /// Emit the plan as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "action")]
    action: &'static str,
    #[tabled(rename = "tiles")]
    tiles: u64,
}

impl PlanArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let config = config::load(global.config.as_deref()).context("failed to load config")?;
        let tiles = WorkDirs::new(&absolute(&self.output)?).tiles;
        if !tiles.is_dir() {
            bail!("no tiles to compare: {} is not a directory", tiles.display());
        }
        let Some(bucket) = bucket_name(self.bucket.as_deref()) else {
            bail!("unable to determine the bucket; pass --bucket or set ASSET_BUCKET");
        };

        let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
        let factory = S3StoreFactory::from_env(bucket.as_str(), runtime.handle().clone());
        let prefix = config.bucket_prefix.clone();
        let plan = Pipeline::new(config, StageContext::new(1))
            .with_store(Arc::new(factory))
            .plan(&tiles)
            .with_context(|| format!("failed to plan sync with bucket {bucket}"))?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&plan).context("failed to serialize plan JSON")?
            );
            return Ok(());
        }
        print_plan(&plan, &bucket, &prefix, self.list);
        Ok(())
    }
}

fn print_plan(plan: &SyncPlan, bucket: &str, prefix: &str, list: bool) {
    println!("Sync plan for s3://{bucket}/{prefix}");
    let rows = vec![
        PlanRow {
            action: "upload",
            tiles: plan.upload.len() as u64,
        },
        PlanRow {
            action: "update",
            tiles: plan.update.len() as u64,
        },
        PlanRow {
            action: "delete",
            tiles: plan.delete.len() as u64,
        },
        PlanRow {
            action: "unchanged",
            tiles: plan.unchanged,
        },
    ];
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    if list {
        for path in &plan.upload {
            println!("{} {path}", "+".green().bold());
        }
        for path in &plan.update {
            println!("{} {path}", "~".yellow().bold());
        }
        for path in &plan.delete {
            println!("{} {path}", "-".red().bold());
        }
    }

    if plan.is_empty() {
        println!("{}", "Bucket is in sync.".green());
    } else {
        println!("Run 'datamap run --upload --output <dir>' to apply.");
    }
}

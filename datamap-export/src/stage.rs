//! Export stage: one job per shard on a stage-scoped pool.

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use datamap_core::{plural, ShardName, StageContext};

use crate::error::{io_err, ExportError};
use crate::jitter::Jitter;
use crate::source::RowSource;
use crate::writer::{export_shard, ExportLimits, ShardExport};

/// Totals across every exported shard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportTotals {
    pub rows: u64,
    pub csvs: u64,
}

/// Export all `shards` into a freshly emptied `csv_dir`.
///
/// A failing shard aborts the stage.
pub fn export_to_csvs(
    stage: &StageContext,
    source: Arc<dyn RowSource>,
    jitter: Arc<dyn Jitter>,
    shards: &[ShardName],
    csv_dir: &Path,
    limits: ExportLimits,
) -> Result<ExportTotals, ExportError> {
    reset_dir(csv_dir)?;

    let pool = stage.pool("export")?;
    let jobs: Vec<_> = shards
        .iter()
        .map(|shard| {
            let source = source.clone();
            let jitter = jitter.clone();
            let shard = shard.clone();
            let dir: PathBuf = csv_dir.to_path_buf();
            pool.submit(move |_| {
                export_shard(source.as_ref(), jitter.as_ref(), &shard, &dir, limits)
            })
        })
        .collect();

    let rows = Cell::new(0u64);
    let csvs = Cell::new(0u64);
    stage
        .watcher::<ShardExport>()
        .on_success(|shard| {
            rows.set(rows.get() + shard.rows);
            csvs.set(csvs.get() + shard.files as u64);
        })
        .on_progress(|done, fraction| {
            let (rows, csvs) = (rows.get(), csvs.get());
            tracing::debug!(
                "  Exported {rows} row{} from {done} shard{} to {csvs} CSV file{} ({:.1}%)",
                plural(rows),
                plural(done),
                plural(csvs),
                fraction * 100.0
            );
        })
        .watch(jobs)?;

    Ok(ExportTotals {
        rows: rows.get(),
        csvs: csvs.get(),
    })
}

/// Remove `dir` if present and recreate it empty.
pub(crate) fn reset_dir(dir: &Path) -> Result<(), ExportError> {
    if dir.exists() {
        std::fs::remove_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))
}

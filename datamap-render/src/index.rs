//! Spatial index build: CSV → per-shard artifact → global artifact.
//!
//! ```text
//! csv/map_ne.csv            ──encode──► quadtrees/map_ne
//! csv/submap_sw_0001.csv    ──encode──► quadtrees/submap_sw/submap_sw_0001 ─┐
//! csv/submap_sw_0002.csv    ──encode──► quadtrees/submap_sw/submap_sw_0002 ─┴─merge──► quadtrees/map_sw
//! quadtrees/map*            ──merge -u──► shapes
//! ```
//!
//! Only the final merge removes duplicates. Points repeated across segments
//! of one shard survive the shard merge and are collapsed together with
//! points repeated across shards.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use datamap_core::{plural, JobHandle, StageContext};

use crate::error::{io_err, RenderError};
use crate::tools::{Duplicates, Toolchain};

/// Artifact counts from [`csv_to_quadtrees`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexCounts {
    /// CSV files encoded.
    pub csv_converted: u64,
    /// Encoded rotated segments.
    pub intermediate: u64,
    /// Per-shard artifacts, direct or merged.
    pub shard: u64,
}

/// Encode every CSV in `csv_dir` and merge rotated segments per shard.
///
/// `quadtree_dir` is emptied first.
pub fn csv_to_quadtrees(
    stage: &StageContext,
    tools: Arc<Toolchain>,
    csv_dir: &Path,
    quadtree_dir: &Path,
) -> Result<IndexCounts, RenderError> {
    reset_dir(quadtree_dir)?;

    let mut names: Vec<String> = std::fs::read_dir(csv_dir)
        .map_err(|e| io_err(csv_dir, e))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".csv"))
        .collect();
    names.sort();

    let mut counts = IndexCounts::default();
    let mut segmented: BTreeMap<String, PathBuf> = BTreeMap::new();
    let pool = stage.pool("encode")?;
    let mut jobs: Vec<JobHandle<()>> = Vec::new();

    for name in &names {
        let stem = name.trim_end_matches(".csv");
        let out_dir = if name.starts_with("map_") {
            counts.shard += 1;
            quadtree_dir.to_path_buf()
        } else if name.starts_with("submap_") {
            counts.intermediate += 1;
            let shard = segment_shard(name)?;
            let submap_dir = quadtree_dir.join(format!("submap_{shard}"));
            if !submap_dir.is_dir() {
                std::fs::create_dir(&submap_dir).map_err(|e| io_err(&submap_dir, e))?;
            }
            segmented.insert(shard.to_string(), submap_dir.clone());
            submap_dir
        } else {
            continue;
        };

        let tools = tools.clone();
        let csv = csv_dir.join(name);
        let out = out_dir.join(stem);
        jobs.push(pool.submit(move |_| tools.encode(&csv, &out)));
    }
    counts.csv_converted = jobs.len() as u64;

    stage
        .watcher::<()>()
        .on_progress(|converted, fraction| {
            tracing::debug!(
                "  Converted {converted} CSV{} to quadtree{} ({:.1}%)",
                plural(converted),
                plural(converted),
                fraction * 100.0
            );
        })
        .watch(jobs)?;

    let merges: Vec<JobHandle<()>> = segmented
        .into_iter()
        .map(|(shard, submap_dir)| {
            counts.shard += 1;
            let tools = tools.clone();
            let out = quadtree_dir.join(format!("map_{shard}"));
            pool.submit(move |_| -> Result<(), RenderError> {
                let inputs = artifacts_matching(&submap_dir, "submap")?;
                tools.merge(&inputs, &out, Duplicates::Keep)?;
                Ok(())
            })
        })
        .collect();

    stage
        .watcher::<()>()
        .on_progress(|merged, fraction| {
            tracing::debug!(
                "  Merged intermediate quadtrees to {merged} quadtree{} ({:.1}%)",
                plural(merged),
                fraction * 100.0
            );
        })
        .watch(merges)?;

    Ok(counts)
}

/// Merge every `map*` artifact in `quadtree_dir` into `shapes_dir`,
/// removing duplicates. A stale `shapes_dir` is removed first.
pub fn merge_quadtrees(
    tools: &Toolchain,
    quadtree_dir: &Path,
    shapes_dir: &Path,
) -> Result<(), RenderError> {
    remove_path(shapes_dir)?;
    let inputs = artifacts_matching(quadtree_dir, "map")?;
    tracing::debug!(inputs = inputs.len(), "merging shard quadtrees");
    tools.merge(&inputs, shapes_dir, Duplicates::Remove)?;
    Ok(())
}

/// Entries of `dir` whose names start with `prefix`, sorted. Empty is an error.
pub fn artifacts_matching(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>, RenderError> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| io_err(dir, e))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(prefix))
        .map(|entry| entry.path())
        .collect();
    if paths.is_empty() {
        return Err(RenderError::NoInputs {
            dir: dir.to_path_buf(),
            pattern: format!("{prefix}*"),
        });
    }
    paths.sort();
    Ok(paths)
}

/// `submap_<shard>_<serial>.csv` → `<shard>`.
fn segment_shard(name: &str) -> Result<&str, RenderError> {
    let bad = || RenderError::SegmentName {
        name: name.to_string(),
    };
    let stem = name.strip_suffix(".csv").ok_or_else(bad)?;
    match stem.split('_').collect::<Vec<_>>().as_slice() {
        ["submap", shard, serial]
            if !shard.is_empty()
                && !serial.is_empty()
                && serial.chars().all(|c| c.is_ascii_digit()) =>
        {
            Ok(*shard)
        }
        _ => Err(bad()),
    }
}

pub(crate) fn reset_dir(dir: &Path) -> Result<(), RenderError> {
    remove_path(dir)?;
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))
}

/// Remove a file or directory tree if it exists.
fn remove_path(path: &Path) -> Result<(), RenderError> {
    let removed = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else if path.exists() {
        std::fs::remove_file(path)
    } else {
        return Ok(());
    };
    removed.map_err(|e| io_err(path, e))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Shard export with CSV segment rotation.
//!
//! ## Naming
//!
//! - No rotation: `map_<shard>.csv`
//! - Rotation: `submap_<shard>_0001.csv`, `submap_<shard>_0002.csv`, …
//!   The first segment is written as `map_<shard>.csv` and renamed once a
//!   second segment holds rows.
//!
//! A segment is closed after the page that brings its emitted row count to
//! the file limit. A trailing segment that received no rows is removed and
//! not counted.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use datamap_core::ShardName;

use crate::error::{io_err, ExportError};
use crate::grid;
use crate::jitter::Jitter;
use crate::source::RowSource;

/// Page and file sizes for one export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportLimits {
    /// Rows requested from the source per page.
    pub page_rows: usize,
    /// Emitted lines per segment before rotating.
    pub file_rows: u64,
}

/// Outcome of exporting one shard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShardExport {
    /// Point lines written across all segments.
    pub rows: u64,
    /// CSV files left on disk.
    pub files: usize,
}

struct Segment {
    path: PathBuf,
    out: BufWriter<File>,
    rows: u64,
}

impl Segment {
    fn create(path: PathBuf) -> Result<Self, ExportError> {
        let file = File::create(&path).map_err(|e| io_err(&path, e))?;
        Ok(Self {
            path,
            out: BufWriter::new(file),
            rows: 0,
        })
    }

    fn append(&mut self, lines: &str, count: u64) -> Result<(), ExportError> {
        self.out
            .write_all(lines.as_bytes())
            .map_err(|e| io_err(&self.path, e))?;
        self.rows += count;
        Ok(())
    }

    /// Flush and close; returns the path and the rows it holds.
    fn finish(mut self) -> Result<(PathBuf, u64), ExportError> {
        self.out.flush().map_err(|e| io_err(&self.path, e))?;
        Ok((self.path, self.rows))
    }
}

/// Export every row of `shard` into CSV segments under `csv_dir`.
pub fn export_shard(
    source: &dyn RowSource,
    jitter: &dyn Jitter,
    shard: &ShardName,
    csv_dir: &Path,
    limits: ExportLimits,
) -> Result<ShardExport, ExportError> {
    let first_path = csv_dir.join(shard.csv_file_name());
    let mut segment = Segment::create(first_path.clone())?;
    let mut file_count = 1usize;
    let mut total_rows = 0u64;
    let mut cursor: Vec<u8> = Vec::new();
    let mut lines = String::new();

    loop {
        let page = source.fetch_page(shard, &cursor, limits.page_rows)?;
        let Some(last) = page.last() else { break };
        if !cursor.is_empty() && last.grid <= cursor {
            return Err(ExportError::CursorStalled {
                shard: shard.clone(),
            });
        }

        lines.clear();
        let mut emitted = 0u64;
        for row in &page {
            emitted += jitter.expand(grid::decode(&row.grid)?, row.age_bucket, &mut lines);
        }
        segment.append(&lines, emitted)?;
        total_rows += emitted;

        if segment.rows >= limits.file_rows {
            segment.finish()?;
            file_count += 1;
            let next = csv_dir.join(shard.segment_file_name(file_count));
            segment = Segment::create(next)?;
        }

        cursor = last.grid.clone();
    }

    let (last_path, last_rows) = segment.finish()?;
    if last_rows == 0 {
        std::fs::remove_file(&last_path).map_err(|e| io_err(&last_path, e))?;
        file_count -= 1;
    }

    if file_count > 1 {
        let renamed = csv_dir.join(shard.segment_file_name(1));
        std::fs::rename(&first_path, &renamed).map_err(|e| io_err(&renamed, e))?;
    }

    tracing::debug!(
        shard = %shard,
        rows = total_rows,
        files = file_count,
        "exported shard"
    );
    Ok(ShardExport {
        rows: total_rows,
        files: file_count,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

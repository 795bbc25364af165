//! Pipeline orchestrator: export → index → merge → render → sync.
//!
//! Stages run strictly in sequence, each on its own pool built from the
//! shared [`StageContext`]. Every stage that runs fills in its part of the
//! returned [`RunSummary`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;

use datamap_core::{plural, timed, DatamapConfig, RunSummary, StageContext};
use datamap_export::{export_to_csvs, AgeJitter, ExportLimits, Jitter, RowSource};
use datamap_render::{csv_to_quadtrees, merge_quadtrees, render_tiles, Toolchain};

use crate::error::{PipelineError, SyncError};
use crate::execute::{sync_tiles, SyncSettings};
use crate::hash::{ContentHasher, Md5Hasher};
use crate::inventory::fetch_inventory;
use crate::plan::{compute_plan, SyncPlan};
use crate::status::upload_status_file;
use crate::store::{ObjectStore, StoreFactory};

/// Working directories under the output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkDirs {
    pub csv: PathBuf,
    pub quadtrees: PathBuf,
    pub shapes: PathBuf,
    pub tiles: PathBuf,
}

impl WorkDirs {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            csv: output_dir.join("csv"),
            quadtrees: output_dir.join("quadtrees"),
            shapes: output_dir.join("shapes"),
            tiles: output_dir.join("tiles"),
        }
    }
}

/// Which halves of the pipeline a run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phases {
    pub create: bool,
    pub upload: bool,
}

impl Phases {
    /// Human name of the run, for the final log line.
    pub fn task(&self) -> &'static str {
        match (self.create, self.upload) {
            (true, true) => "generation and upload",
            (true, false) => "generation",
            (false, true) => "upload",
            (false, false) => "nothing",
        }
    }
}

/// A configured pipeline and its external collaborators.
pub struct Pipeline {
    config: DatamapConfig,
    stage: StageContext,
    source: Option<Arc<dyn RowSource>>,
    jitter: Arc<dyn Jitter>,
    store: Option<Arc<dyn StoreFactory>>,
    hasher: Arc<dyn ContentHasher>,
}

impl Pipeline {
    pub fn new(config: DatamapConfig, stage: StageContext) -> Self {
        Self {
            config,
            stage,
            source: None,
            jitter: Arc::new(AgeJitter),
            store: None,
            hasher: Arc::new(Md5Hasher),
        }
    }

    /// Row source for the create phase.
    pub fn with_source(mut self, source: Arc<dyn RowSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn Jitter>) -> Self {
        self.jitter = jitter;
        self
    }

    /// Remote store for the upload phase.
    pub fn with_store(mut self, store: Arc<dyn StoreFactory>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn ContentHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn config(&self) -> &DatamapConfig {
        &self.config
    }

    /// Run the requested phases against `output_dir`.
    ///
    /// A create phase that exports no rows ends the run: there is nothing to
    /// render, and syncing would only delete remote tiles.
    ///
    /// Any failure once the interrupt flag is up is reported as
    /// [`PipelineError::Interrupted`]: the tool processes share the terminal's
    /// Ctrl-C, so a stage outside a watched pool fails instead of waiting.
    pub fn generate(&self, output_dir: &Path, phases: Phases) -> Result<RunSummary, PipelineError> {
        self.run_phases(output_dir, phases).map_err(|err| {
            if self.stage.interrupt.is_raised() {
                tracing::debug!(error = %err, "stage failed after interrupt");
                PipelineError::Interrupted
            } else {
                err
            }
        })
    }

    /// Diff `tiles_dir` against the remote inventory without changing
    /// anything.
    pub fn plan(&self, tiles_dir: &Path) -> Result<SyncPlan, PipelineError> {
        let factory = self.store.as_ref().ok_or(PipelineError::Missing("an object store"))?;
        let store = factory.connect().map_err(SyncError::from)?;
        Ok(self.plan_with(store.as_ref(), tiles_dir)?)
    }

    fn run_phases(&self, output_dir: &Path, phases: Phases) -> Result<RunSummary, PipelineError> {
        std::fs::create_dir_all(output_dir).map_err(|source| PipelineError::Io {
            path: output_dir.to_path_buf(),
            source,
        })?;
        let dirs = WorkDirs::new(output_dir);
        let mut summary = RunSummary::default();

        if phases.create && !self.create(&dirs, &mut summary)? {
            return Ok(summary);
        }
        if phases.upload {
            self.check_interrupt()?;
            self.upload(&dirs, &mut summary)?;
        }
        Ok(summary)
    }

    // ------------------------------------------------------------------
    // Create phase
    // ------------------------------------------------------------------

    /// Build tiles from the source. Returns `false` if there were no rows.
    fn create(&self, dirs: &WorkDirs, summary: &mut RunSummary) -> Result<bool, PipelineError> {
        let source = self.source.clone().ok_or(PipelineError::Missing("a row source"))?;
        tracing::debug!("Generating tiles from datamap tables...");

        let limits = ExportLimits {
            page_rows: self.config.page_row_limit,
            file_rows: self.config.file_row_limit,
        };
        let (exported, export_s) = timed(|| {
            export_to_csvs(
                &self.stage,
                source,
                self.jitter.clone(),
                &self.config.shards,
                &dirs.csv,
                limits,
            )
        });
        let totals = exported?;
        summary.export_duration_s = Some(export_s);
        summary.row_count = Some(totals.rows);
        summary.csv_count = Some(totals.csvs);
        tracing::debug!(
            "Exported {} row{} to {} CSV{} in {export_s:.1} seconds",
            totals.rows,
            plural(totals.rows),
            totals.csvs,
            plural(totals.csvs),
        );
        if totals.rows == 0 {
            tracing::debug!("No rows to export, so no tiles to generate.");
            return Ok(false);
        }
        self.check_interrupt()?;

        let tools = Arc::new(Toolchain::new(
            self.config.tools.clone(),
            self.config.encode_zoom,
        ));
        let (indexed, quadtree_s) =
            timed(|| csv_to_quadtrees(&self.stage, tools.clone(), &dirs.csv, &dirs.quadtrees));
        let counts = indexed?;
        summary.quadtree_duration_s = Some(quadtree_s);
        summary.csv_converted_count = Some(counts.csv_converted);
        summary.intermediate_quadtree_count = Some(counts.intermediate);
        summary.quadtree_count = Some(counts.shard);
        tracing::debug!(
            "Processed {} CSV{} into {} intermediate quadtree{} and {} region quadtree{} \
             in {quadtree_s:.1} seconds",
            counts.csv_converted,
            plural(counts.csv_converted),
            counts.intermediate,
            plural(counts.intermediate),
            counts.shard,
            plural(counts.shard),
        );
        self.check_interrupt()?;

        let (merged, merge_s) = timed(|| merge_quadtrees(&tools, &dirs.quadtrees, &dirs.shapes));
        merged?;
        summary.merge_duration_s = Some(merge_s);
        tracing::debug!("Merged quadtrees in {merge_s:.1} seconds");
        self.check_interrupt()?;

        let (rendered, render_s) = timed(|| {
            render_tiles(
                &self.stage,
                tools.clone(),
                &dirs.shapes,
                &dirs.tiles,
                self.config.max_zoom,
            )
        });
        let tile_count = rendered?;
        summary.tile_count = Some(tile_count);
        summary.render_duration_s = Some(render_s);
        tracing::debug!(
            "Rendered {tile_count} tile{} in {render_s:.1} seconds",
            plural(tile_count)
        );
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Upload phase
    // ------------------------------------------------------------------

    fn upload(&self, dirs: &WorkDirs, summary: &mut RunSummary) -> Result<(), PipelineError> {
        let factory = self.store.clone().ok_or(PipelineError::Missing("an object store"))?;
        let store = factory.connect().map_err(SyncError::from)?;
        tracing::debug!("Syncing tiles to bucket {}...", store.bucket());

        let plan = self.plan_with(store.as_ref(), &dirs.tiles)?;
        let settings = SyncSettings {
            prefix: self.config.bucket_prefix.clone(),
            delete_batch_size: self.config.delete_batch_size,
            tasks_per_worker: self.config.sync_tasks_per_worker,
        };
        let (synced, sync_s) =
            timed(|| sync_tiles(&self.stage, factory.clone(), &plan, &dirs.tiles, &settings));
        let counts = synced?;
        summary.sync_duration_s = Some(sync_s);
        summary.tiles_unchanged = Some(plan.unchanged);
        summary.sync = Some(counts);
        tracing::debug!(
            "Synced tiles in {sync_s:.1} seconds: {} new, {} changed, {} deleted, \
             {} failed, {} unchanged",
            counts.tile_new,
            counts.tile_changed,
            counts.tile_deleted,
            counts.tile_failed,
            plan.unchanged,
        );

        upload_status_file(store.as_ref(), &self.config.bucket_prefix, summary, Utc::now())?;
        Ok(())
    }

    fn plan_with(&self, store: &dyn ObjectStore, tiles_dir: &Path) -> Result<SyncPlan, SyncError> {
        let (plan, plan_s) = timed(|| -> Result<SyncPlan, SyncError> {
            let inventory = fetch_inventory(store, &self.config.bucket_prefix)?;
            compute_plan(tiles_dir, inventory, self.hasher.as_ref())
        });
        let plan = plan?;
        tracing::debug!(
            "Planned sync of {} file{} in {plan_s:.1} seconds",
            plan.file_count(),
            plural(plan.file_count()),
        );
        Ok(plan)
    }

    fn check_interrupt(&self) -> Result<(), PipelineError> {
        if self.stage.interrupt.is_raised() {
            return Err(PipelineError::Interrupted);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use datamap_core::{ErrorReporter, Interrupt, JobError, ShardName};
    use datamap_export::{MemorySource, PointRow, SourceError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn upload_only() -> Phases {
        Phases {
            create: false,
            upload: true,
        }
    }

    #[test]
    fn task_names() {
        let both = Phases {
            create: true,
            upload: true,
        };
        assert_eq!(both.task(), "generation and upload");
        assert_eq!(upload_only().task(), "upload");
    }

    #[test]
    fn work_dirs_live_under_output() {
        let dirs = WorkDirs::new(Path::new("/out"));
        assert_eq!(dirs.csv, Path::new("/out/csv"));
        assert_eq!(dirs.tiles, Path::new("/out/tiles"));
    }

    #[test]
    fn create_without_source_is_rejected() {
        let dir = TempDir::new().unwrap();
        let err = Pipeline::new(DatamapConfig::default(), StageContext::new(1))
            .generate(
                dir.path(),
                Phases {
                    create: true,
                    upload: false,
                },
            )
            .unwrap_err();
        assert!(matches!(err, PipelineError::Missing(_)), "got: {err}");
    }

    #[test]
    fn upload_without_store_is_rejected() {
        let dir = TempDir::new().unwrap();
        let err = Pipeline::new(DatamapConfig::default(), StageContext::new(1))
            .generate(dir.path(), upload_only())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Missing(_)), "got: {err}");
    }

    #[test]
    fn empty_export_ends_the_run() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new("bucket");
        let config = DatamapConfig {
            shards: vec!["ne".into()],
            ..Default::default()
        };
        let summary = Pipeline::new(config, StageContext::new(1))
            .with_source(Arc::new(MemorySource::new().with_rows("ne", vec![])))
            .with_store(Arc::new(store.clone()))
            .generate(
                dir.path(),
                Phases {
                    create: true,
                    upload: true,
                },
            )
            .unwrap();

        assert_eq!(summary.row_count, Some(0));
        assert_eq!(summary.csv_count, Some(0));
        assert_eq!(summary.tile_count, None);
        assert_eq!(summary.sync, None);
        assert!(store.keys().is_empty());
        assert!(!dir.path().join("quadtrees").exists());
    }

    #[test]
    fn upload_only_syncs_existing_tiles_and_writes_status() {
        let dir = TempDir::new().unwrap();
        let tiles = dir.path().join("tiles/0/0");
        std::fs::create_dir_all(&tiles).unwrap();
        std::fs::write(tiles.join("0.png"), b"tile").unwrap();
        let store = MemoryStore::new("bucket");
        store.insert("tiles/3/3/3.png", "orphan");

        let summary = Pipeline::new(DatamapConfig::default(), StageContext::new(1))
            .with_store(Arc::new(store.clone()))
            .generate(dir.path(), upload_only())
            .unwrap();

        let counts = summary.sync.unwrap();
        assert_eq!(counts.tile_new, 1);
        assert_eq!(counts.tile_deleted, 1);
        assert_eq!(summary.tiles_unchanged, Some(0));
        assert_eq!(store.keys(), ["tiles/0/0/0.png", "tiles/data.json"]);

        let status: serde_json::Value =
            serde_json::from_slice(&store.get("tiles/data.json").unwrap().body).unwrap();
        assert_eq!(status["tile_new"], 1);
        assert!(status["updated"].is_string());
    }

    #[test]
    fn plan_does_not_touch_the_store() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.png"), b"a").unwrap();
        let store = MemoryStore::new("bucket");
        store.insert("tiles/b.png", "b");

        let plan = Pipeline::new(DatamapConfig::default(), StageContext::new(1))
            .with_store(Arc::new(store.clone()))
            .plan(dir.path())
            .unwrap();
        assert_eq!(plan.upload, ["a.png"]);
        assert_eq!(plan.delete, ["b.png"]);
        assert_eq!(store.keys(), ["tiles/b.png"]);
        assert_eq!(store.calls().puts + store.calls().uploads, 0);
    }

    #[test]
    fn raised_interrupt_stops_before_upload() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("tiles")).unwrap();
        let interrupt = Interrupt::new();
        interrupt.raise();
        let store = MemoryStore::new("bucket");

        let err = Pipeline::new(
            DatamapConfig::default(),
            StageContext::new(1).with_interrupt(interrupt),
        )
        .with_store(Arc::new(store.clone()))
        .generate(dir.path(), upload_only())
        .unwrap_err();
        assert!(err.is_interrupted());
        assert_eq!(store.calls().connects, 0);
    }

    /// A source whose query is cut off by Ctrl-C.
    struct InterruptedSource(Interrupt);

    impl RowSource for InterruptedSource {
        fn fetch_page(
            &self,
            shard: &ShardName,
            _after: &[u8],
            _limit: usize,
        ) -> Result<Vec<PointRow>, SourceError> {
            self.0.raise();
            Err(SourceError::UnknownShard(shard.clone()))
        }
    }

    #[derive(Default)]
    struct CountingReporter(AtomicUsize);

    impl ErrorReporter for CountingReporter {
        fn capture(&self, _error: &JobError) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn interrupt_during_export_ends_the_run_unreported() {
        let dir = TempDir::new().unwrap();
        let interrupt = Interrupt::new();
        let reporter = Arc::new(CountingReporter::default());
        let store = MemoryStore::new("bucket");
        let config = DatamapConfig {
            shards: vec!["ne".into(), "sw".into()],
            ..Default::default()
        };

        let err = Pipeline::new(
            config,
            StageContext::new(2)
                .with_interrupt(interrupt.clone())
                .with_reporter(reporter.clone()),
        )
        .with_source(Arc::new(InterruptedSource(interrupt)))
        .with_store(Arc::new(store.clone()))
        .generate(
            dir.path(),
            Phases {
                create: true,
                upload: true,
            },
        )
        .unwrap_err();

        assert!(matches!(err, PipelineError::Interrupted), "got: {err}");
        assert_eq!(reporter.0.load(Ordering::SeqCst), 0);
        assert!(!dir.path().join("quadtrees").exists());
        assert_eq!(store.calls().connects, 0);
    }
}

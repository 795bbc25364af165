//! Sync executor: run a [`SyncPlan`] against the remote store.
//!
//! Uploads and updates are one job per file; deletes are one bulk request
//! per batch. Failures are counted and logged, never retried, and do not
//! stop the remaining jobs. A failed delete batch counts once in
//! `tile_failed`; its error names every key that was not deleted.

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use datamap_core::{plural, StageContext, SyncCounts, WorkerPool};

use crate::error::SyncError;
use crate::plan::SyncPlan;
use crate::store::{ObjectMeta, StoreFactory, StoreSlot};

/// Knobs for one sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Key prefix of the tile pyramid, e.g. `tiles/`.
    pub prefix: String,
    pub delete_batch_size: usize,
    /// Jobs a worker runs before its store client is discarded.
    pub tasks_per_worker: usize,
}

/// What a successful sync job did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Synced {
    New,
    Changed,
    Deleted(u64),
}

/// Converge the remote store to the local tile tree described by `plan`.
///
/// Runs at twice the stage concurrency since the work is I/O bound.
pub fn sync_tiles(
    stage: &StageContext,
    factory: Arc<dyn StoreFactory>,
    plan: &SyncPlan,
    tiles_dir: &Path,
    settings: &SyncSettings,
) -> Result<SyncCounts, SyncError> {
    let pool = WorkerPool::new(
        "sync",
        stage.concurrency.max(1) * 2,
        Some(settings.tasks_per_worker),
        move || StoreSlot::new(factory.clone()),
    )?;

    let mut jobs = Vec::with_capacity(plan.file_count());
    for (paths, outcome) in [(&plan.upload, Synced::New), (&plan.update, Synced::Changed)] {
        for path in paths {
            let file: PathBuf = tiles_dir.join(path);
            let key = format!("{}{path}", settings.prefix);
            jobs.push(pool.submit(move |slot: &mut StoreSlot| -> Result<Synced, SyncError> {
                let result = slot.get()?.upload_file(&file, &key, ObjectMeta::PNG);
                if result.is_err() {
                    slot.reset();
                }
                result?;
                Ok(outcome)
            }));
        }
    }
    for batch in plan.delete.chunks(settings.delete_batch_size.max(1)) {
        let keys: Vec<String> = batch
            .iter()
            .map(|path| format!("{}{path}", settings.prefix))
            .collect();
        jobs.push(pool.submit(move |slot: &mut StoreSlot| -> Result<Synced, SyncError> {
            let deleted = slot.get()?.delete_objects(&keys);
            let failures = match deleted {
                Ok(failures) => failures,
                Err(err) => {
                    slot.reset();
                    return Err(err.into());
                }
            };
            if !failures.is_empty() {
                for failure in &failures {
                    tracing::debug!(key = %failure.key, reason = %failure.message, "delete failed");
                }
                return Err(SyncError::DeleteFailed {
                    failed: failures.into_iter().map(|f| f.key).collect(),
                });
            }
            Ok(Synced::Deleted(keys.len() as u64))
        }));
    }

    let total = plan.file_count().max(1) as f64;
    let counts = Cell::new(SyncCounts::default());
    stage
        .watcher::<Synced>()
        .on_success(|synced| {
            let mut tally = counts.get();
            match synced {
                Synced::New => tally.tile_new += 1,
                Synced::Changed => tally.tile_changed += 1,
                Synced::Deleted(n) => tally.tile_deleted += n,
            }
            counts.set(tally);
        })
        .on_error(|err| {
            tracing::debug!(error = %err, "sync job failed");
            let mut tally = counts.get();
            tally.tile_failed += 1;
            counts.set(tally);
        })
        .on_progress(|_, _| {
            let done = counts.get().total();
            tracing::debug!(
                "  Synced {done} file{} ({:.1}%)",
                plural(done),
                done as f64 / total * 100.0
            );
        })
        .watch(jobs)?;

    Ok(counts.get())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Md5Hasher;
    use crate::inventory::fetch_inventory;
    use crate::plan::compute_plan;
    use crate::error::StoreError;
    use crate::store::{MemoryStore, ObjectStore, StoreFactory};
    use datamap_core::{ErrorReporter, Interrupt, JobError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn settings() -> SyncSettings {
        SyncSettings {
            prefix: "tiles/".to_string(),
            delete_batch_size: 100,
            tasks_per_worker: 1000,
        }
    }

    fn tiles(keys: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (key, body) in keys {
            let path = dir.path().join(key);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, body).unwrap();
        }
        dir
    }

    fn plan_for(store: &MemoryStore, dir: &Path) -> SyncPlan {
        let inventory = fetch_inventory(store, "tiles/").unwrap();
        compute_plan(dir, inventory, &Md5Hasher).unwrap()
    }

    #[test]
    fn converges_and_is_idempotent() {
        let store = MemoryStore::new("bucket").with_page_size(3);
        store.insert("tiles/0/0/0.png", "same");
        store.insert("tiles/1/0/0.png", "stale");
        store.insert("tiles/5/5/5.png", "orphan");
        let dir = tiles(&[
            ("0/0/0.png", "same"),
            ("1/0/0.png", "fresh"),
            ("1/1/0.png", "new"),
        ]);

        let plan = plan_for(&store, dir.path());
        let counts = sync_tiles(
            &StageContext::new(2),
            Arc::new(store.clone()),
            &plan,
            dir.path(),
            &settings(),
        )
        .unwrap();
        assert_eq!(
            counts,
            SyncCounts {
                tile_new: 1,
                tile_changed: 1,
                tile_deleted: 1,
                tile_failed: 0,
            }
        );
        assert_eq!(
            store.keys(),
            ["tiles/0/0/0.png", "tiles/1/0/0.png", "tiles/1/1/0.png"]
        );
        assert_eq!(store.get("tiles/1/0/0.png").unwrap().body, b"fresh");

        let again = plan_for(&store, dir.path());
        assert!(again.is_empty(), "second plan: {again:?}");
        assert_eq!(again.unchanged, 3);
    }

    #[test]
    fn upload_failure_is_counted_and_isolated() {
        let store = MemoryStore::new("bucket");
        store.fail_on("tiles/0/0/1.png");
        let dir = tiles(&[("0/0/0.png", "a"), ("0/0/1.png", "b"), ("0/0/2.png", "c")]);

        let plan = plan_for(&store, dir.path());
        let counts = sync_tiles(
            &StageContext::new(1),
            Arc::new(store.clone()),
            &plan,
            dir.path(),
            &settings(),
        )
        .unwrap();
        assert_eq!(counts.tile_new, 2);
        assert_eq!(counts.tile_failed, 1);
        assert_eq!(store.keys(), ["tiles/0/0/0.png", "tiles/0/0/2.png"]);
    }

    #[test]
    fn deletes_are_batched_and_a_failed_batch_counts_once() {
        let store = MemoryStore::new("bucket");
        for i in 0..250 {
            store.insert(format!("tiles/9/{i}/0.png"), "x");
        }
        store.fail_on("tiles/9/7/0.png");
        store.fail_on("tiles/9/8/0.png");
        let dir = TempDir::new().unwrap();

        let plan = plan_for(&store, dir.path());
        assert_eq!(plan.delete.len(), 250);
        let counts = sync_tiles(
            &StageContext::new(2),
            Arc::new(store.clone()),
            &plan,
            dir.path(),
            &settings(),
        )
        .unwrap();

        assert_eq!(store.calls().delete_batches, 3);
        // Both failing keys sort into the same batch.
        assert_eq!(counts.tile_failed, 1);
        assert_eq!(counts.tile_deleted, 200);
        assert_eq!(store.keys(), ["tiles/9/7/0.png", "tiles/9/8/0.png"]);
    }

    #[test]
    fn workers_are_recycled_after_task_limit() {
        let store = MemoryStore::new("bucket");
        let keys: Vec<(String, &str)> = (0..6).map(|i| (format!("3/{i}/0.png"), "t")).collect();
        let refs: Vec<(&str, &str)> = keys.iter().map(|(k, b)| (k.as_str(), *b)).collect();
        let dir = tiles(&refs);

        let plan = plan_for(&store, dir.path());
        let counts = sync_tiles(
            &StageContext::new(1),
            Arc::new(store.clone()),
            &plan,
            dir.path(),
            &SyncSettings {
                tasks_per_worker: 1,
                ..settings()
            },
        )
        .unwrap();
        assert_eq!(counts.tile_new, 6);
        assert_eq!(store.calls().connects, 6);
    }

    #[test]
    fn interrupt_stops_the_sync() {
        let store = MemoryStore::new("bucket");
        let dir = tiles(&[("0/0/0.png", "a")]);
        let plan = plan_for(&store, dir.path());
        let interrupt = Interrupt::new();
        interrupt.raise();

        let err = sync_tiles(
            &StageContext::new(1).with_interrupt(interrupt),
            Arc::new(store),
            &plan,
            dir.path(),
            &settings(),
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::Job(JobError::Interrupted)), "got: {err}");
    }

    /// Raises the interrupt while a worker connects, then fails the
    /// connection the way a Ctrl-C'd client would.
    struct InterruptOnConnect(Interrupt);

    impl StoreFactory for InterruptOnConnect {
        fn connect(&self) -> Result<Box<dyn ObjectStore>, StoreError> {
            self.0.raise();
            Err(StoreError::Remote {
                operation: "connect",
                target: "bucket".to_string(),
                message: "connection reset".to_string(),
            })
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
    fn interrupt_during_a_job_is_not_counted_as_a_failure() {
        let store = MemoryStore::new("bucket");
        let dir = tiles(&[("0/0/0.png", "a"), ("0/0/1.png", "b")]);
        let plan = plan_for(&store, dir.path());
        let interrupt = Interrupt::new();
        let reporter = Arc::new(CountingReporter::default());

        let err = sync_tiles(
            &StageContext::new(1)
                .with_interrupt(interrupt.clone())
                .with_reporter(reporter.clone()),
            Arc::new(InterruptOnConnect(interrupt)),
            &plan,
            dir.path(),
            &settings(),
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::Job(JobError::Interrupted)), "got: {err}");
        assert_eq!(reporter.0.load(Ordering::SeqCst), 0);
    }
}

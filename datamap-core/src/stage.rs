//! Settings shared by every stage of one run.

use std::sync::Arc;
use std::time::Duration;

use crate::batch::{ErrorReporter, JobWatcher};
use crate::config::DEFAULT_PROGRESS_SECONDS;
use crate::error::PoolError;
use crate::interrupt::Interrupt;
use crate::pool::WorkerPool;

/// Concurrency level, progress cadence, interrupt flag and error reporter,
/// handed to each stage so it can build its own pool and watcher.
#[derive(Clone)]
pub struct StageContext {
    pub concurrency: usize,
    pub progress_interval: Duration,
    pub interrupt: Interrupt,
    pub reporter: Option<Arc<dyn ErrorReporter>>,
}

impl StageContext {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            progress_interval: Duration::from_secs_f64(DEFAULT_PROGRESS_SECONDS),
            interrupt: Interrupt::new(),
            reporter: None,
        }
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// A context-free pool sized to the configured concurrency.
    pub fn pool(&self, name: &str) -> Result<WorkerPool<()>, PoolError> {
        WorkerPool::new(name, self.concurrency, None, || ())
    }

    /// A watcher preloaded with this run's interval, interrupt and reporter.
    pub fn watcher<T>(&self) -> JobWatcher<'_, T> {
        let watcher = JobWatcher::new()
            .progress_interval(self.progress_interval)
            .interrupt(&self.interrupt);
        match self.reporter.as_deref() {
            Some(reporter) => watcher.reporter(reporter),
            None => watcher,
        }
    }
}

impl std::fmt::Debug for StageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageContext")
            .field("concurrency", &self.concurrency)
            .field("progress_interval", &self.progress_interval)
            .field("interrupted", &self.interrupt.is_raised())
            .field("reporter", &self.reporter.is_some())
            .finish()
    }
}

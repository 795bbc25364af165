//! Job batch executor. Waits on dispatched jobs in submission order.
//!
//! ## Contract
//!
//! 1. Before waiting on each job, fire `on_progress(done, fraction)` if the
//!    progress interval has elapsed since the last tick.
//! 2. Success → `on_success(value)`.
//! 3. Failure → `ErrorReporter::capture` (if set), then `on_error(err)` if
//!    set and the batch continues; without `on_error` the error is returned
//!    and the remaining handles are dropped unresolved.
//! 4. Interrupt → returned immediately; no reporter, no `on_error`. A job
//!    that fails after the flag is raised counts as interrupted: Ctrl-C also
//!    reaches the tool processes the job was waiting on.
//!
//! Waiting in submission order keeps callback order deterministic while the
//! pool runs jobs concurrently.

use std::time::{Duration, Instant};

use crate::config::DEFAULT_PROGRESS_SECONDS;
use crate::error::JobError;
use crate::interrupt::Interrupt;
use crate::pool::JobHandle;

// ---------------------------------------------------------------------------
// Error reporting collaborator
// ---------------------------------------------------------------------------

/// Receives every job failure before the batch decides whether to continue.
pub trait ErrorReporter: Send + Sync {
    fn capture(&self, error: &JobError);
}

/// Reports job failures as structured `error` events.
#[derive(Debug, Clone)]
pub struct LogReporter {
    app: &'static str,
}

impl LogReporter {
    pub fn new(app: &'static str) -> Self {
        Self { app }
    }
}

impl ErrorReporter for LogReporter {
    fn capture(&self, error: &JobError) {
        tracing::error!(app = self.app, error = %error, "job failed");
    }
}

// ---------------------------------------------------------------------------
// JobWatcher
// ---------------------------------------------------------------------------

/// Totals for one watched batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

type SuccessFn<'a, T> = Box<dyn FnMut(T) + 'a>;
type ErrorFn<'a> = Box<dyn FnMut(JobError) + 'a>;
type ProgressFn<'a> = Box<dyn FnMut(usize, f64) + 'a>;

/// Builder for one batch wait.
pub struct JobWatcher<'a, T> {
    on_success: Option<SuccessFn<'a, T>>,
    on_error: Option<ErrorFn<'a>>,
    on_progress: Option<ProgressFn<'a>>,
    reporter: Option<&'a dyn ErrorReporter>,
    interrupt: Option<&'a Interrupt>,
    progress_interval: Duration,
}

impl<'a, T> Default for JobWatcher<'a, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, T> JobWatcher<'a, T> {
    pub fn new() -> Self {
        Self {
            on_success: None,
            on_error: None,
            on_progress: None,
            reporter: None,
            interrupt: None,
            progress_interval: Duration::from_secs_f64(DEFAULT_PROGRESS_SECONDS),
        }
    }

    pub fn on_success(mut self, f: impl FnMut(T) + 'a) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    /// Isolate failures: the batch continues after calling `f`.
    pub fn on_error(mut self, f: impl FnMut(JobError) + 'a) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn on_progress(mut self, f: impl FnMut(usize, f64) + 'a) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    pub fn reporter(mut self, reporter: &'a dyn ErrorReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn interrupt(mut self, interrupt: &'a Interrupt) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    pub fn progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Wait on every job in order, dispatching callbacks.
    pub fn watch(mut self, jobs: Vec<JobHandle<T>>) -> Result<BatchReport, JobError> {
        let mut report = BatchReport {
            total: jobs.len(),
            ..Default::default()
        };
        let mut last_tick = Instant::now();
        let mut done = 0usize;

        for job in jobs {
            if last_tick.elapsed() > self.progress_interval {
                if let Some(on_progress) = self.on_progress.as_mut() {
                    on_progress(done, done as f64 / report.total as f64);
                }
                last_tick = Instant::now();
            }

            let outcome = match self.interrupt {
                Some(interrupt) => job.resolve_or_interrupt(interrupt),
                None => job.resolve(),
            };

            match outcome {
                Ok(value) => {
                    report.succeeded += 1;
                    if let Some(on_success) = self.on_success.as_mut() {
                        on_success(value);
                    }
                }
                Err(JobError::Interrupted) => return Err(JobError::Interrupted),
                Err(_) if self.interrupt.is_some_and(Interrupt::is_raised) => {
                    return Err(JobError::Interrupted)
                }
                Err(err) => {
                    if let Some(reporter) = self.reporter {
                        reporter.capture(&err);
                    }
                    match self.on_error.as_mut() {
                        Some(on_error) => {
                            report.failed += 1;
                            on_error(err);
                        }
                        None => return Err(err),
                    }
                }
            }
            done += 1;
        }

        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

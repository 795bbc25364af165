//! Bounded, stage-scoped worker pool with typed job handles.
//!
//! Each worker thread owns a context value built by the pool's factory on
//! that thread. Jobs receive `&mut` access to it, so per-worker state such
//! as a network client never crosses threads. With `tasks_per_worker` set,
//! a worker rebuilds its context after that many jobs.
//!
//! ```text
//!   submit(job) ──► [queue] ──► worker 0 (ctx) ─┐
//!        │                  ──► worker 1 (ctx) ─┼─► per-job result channel
//!        ▼                  ──► worker N (ctx) ─┘          │
//!   JobHandle<T> ◄─────────────────────────────────────────┘
//! ```
//!
//! Dropping the pool discards queued jobs that have not started, then joins
//! the workers. Running jobs finish; their handles resolve normally if still
//! held.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::error::{BoxError, JobError, PoolError};
use crate::interrupt::Interrupt;

/// How often a blocked `resolve_or_interrupt` re-checks the interrupt flag.
const INTERRUPT_POLL: Duration = Duration::from_millis(100);

type Task<C> = Box<dyn FnOnce(&mut C) + Send + 'static>;
type ContextFactory<C> = Arc<dyn Fn() -> C + Send + Sync + 'static>;

// ---------------------------------------------------------------------------
// JobHandle
// ---------------------------------------------------------------------------

/// Handle to one dispatched job.
#[derive(Debug)]
pub struct JobHandle<T> {
    receiver: Receiver<Result<T, JobError>>,
}

impl<T> JobHandle<T> {
    /// A handle that is already resolved. Useful for stages that compute a
    /// value inline and for tests.
    pub fn resolved(outcome: Result<T, JobError>) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        let _ = sender.send(outcome);
        Self { receiver }
    }

    /// Block until the job produces a value or fails.
    pub fn resolve(self) -> Result<T, JobError> {
        self.receiver.recv().unwrap_or(Err(JobError::Disconnected))
    }

    /// Like [`resolve`](Self::resolve), but return `JobError::Interrupted`
    /// as soon as `interrupt` is raised.
    pub fn resolve_or_interrupt(self, interrupt: &Interrupt) -> Result<T, JobError> {
        loop {
            if interrupt.is_raised() {
                return Err(JobError::Interrupted);
            }
            match self.receiver.recv_timeout(INTERRUPT_POLL) {
                Ok(outcome) => return outcome,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(JobError::Disconnected),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// WorkerPool
// ---------------------------------------------------------------------------

/// A fixed set of worker threads, each owning a `C` context.
pub struct WorkerPool<C> {
    name: String,
    sender: Option<Sender<Task<C>>>,
    closing: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl<C: 'static> WorkerPool<C> {
    /// Spawn `workers` threads. `make_context` runs on each worker thread at
    /// start-up and again whenever the worker is recycled.
    pub fn new<F>(
        name: impl Into<String>,
        workers: usize,
        tasks_per_worker: Option<usize>,
        make_context: F,
    ) -> Result<Self, PoolError>
    where
        F: Fn() -> C + Send + Sync + 'static,
    {
        let name = name.into();
        if workers == 0 {
            return Err(PoolError::NoWorkers { pool: name });
        }

        let (sender, receiver) = crossbeam_channel::unbounded::<Task<C>>();
        let closing = Arc::new(AtomicBool::new(false));
        let factory: ContextFactory<C> = Arc::new(make_context);

        let mut pool = Self {
            name: name.clone(),
            sender: Some(sender),
            closing: closing.clone(),
            workers: Vec::with_capacity(workers),
        };
        for index in 0..workers {
            let receiver = receiver.clone();
            let closing = closing.clone();
            let factory = factory.clone();
            let worker_name = format!("{name}-{index}");
            let handle = thread::Builder::new()
                .name(worker_name.clone())
                .spawn(move || worker_loop(&worker_name, receiver, closing, factory, tasks_per_worker))
                .map_err(|source| PoolError::Spawn {
                    pool: name.clone(),
                    source,
                })?;
            pool.workers.push(handle);
        }

        tracing::debug!(pool = %pool.name, workers, "worker pool started");
        Ok(pool)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue `job` and return its handle. Jobs start in submission order.
    pub fn submit<T, E, F>(&self, job: F) -> JobHandle<T>
    where
        T: Send + 'static,
        E: Into<BoxError>,
        F: FnOnce(&mut C) -> Result<T, E> + Send + 'static,
    {
        let (result_tx, receiver) = crossbeam_channel::bounded(1);
        let task: Task<C> = Box::new(move |context: &mut C| {
            let outcome = match panic::catch_unwind(AssertUnwindSafe(move || job(context))) {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(JobError::Failed(err.into())),
                Err(payload) => Err(JobError::Panicked(panic_message(payload.as_ref()))),
            };
            let _ = result_tx.send(outcome);
        });

        // A failed send drops the task and its result sender, so the handle
        // resolves as `Disconnected`.
        if let Some(sender) = &self.sender {
            let _ = sender.send(task);
        }
        JobHandle { receiver }
    }
}

impl<C> Drop for WorkerPool<C> {
    fn drop(&mut self) {
        self.closing.store(true, Ordering::SeqCst);
        self.sender.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::warn!(pool = %self.name, "worker thread panicked outside a job");
            }
        }
        tracing::debug!(pool = %self.name, "worker pool stopped");
    }
}

fn worker_loop<C>(
    name: &str,
    receiver: Receiver<Task<C>>,
    closing: Arc<AtomicBool>,
    factory: ContextFactory<C>,
    tasks_per_worker: Option<usize>,
) {
    let mut context = factory();
    let mut handled = 0usize;

    for task in receiver.iter() {
        if closing.load(Ordering::SeqCst) {
            // Pool is being torn down: discard without running.
            continue;
        }
        if tasks_per_worker.is_some_and(|limit| handled >= limit) {
            tracing::debug!(worker = name, handled, "recycling worker context");
            context = factory();
            handled = 0;
        }
        task(&mut context);
        handled += 1;
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Datamap core library: domain types, configuration, and the concurrency
//! primitives every stage runs on.
//!
//! - [`types`]: shard names, tile coordinates, run summary
//! - [`config`]: YAML config load / validate
//! - [`pool`]: stage-scoped [`WorkerPool`] and typed [`JobHandle`]s
//! - [`batch`]: [`JobWatcher`], the job batch executor
//! - [`stage`]: per-run settings each stage builds its pool from
//! - [`interrupt`]: Ctrl-C flag observed while waiting on jobs
//! - [`timer`]: stage timing

pub mod batch;
pub mod config;
pub mod error;
pub mod interrupt;
pub mod pool;
pub mod stage;
pub mod timer;
pub mod types;

pub use batch::{BatchReport, ErrorReporter, JobWatcher, LogReporter};
pub use config::{DatamapConfig, ToolConfig};
pub use error::{BoxError, ConfigError, JobError, PoolError};
pub use interrupt::Interrupt;
pub use pool::{JobHandle, WorkerPool};
pub use stage::StageContext;
pub use timer::{timed, Timer};
pub use types::{plural, RunSummary, ShardName, SyncCounts, TileCoord};

//! Error types for datamap-core.

use std::path::PathBuf;

use thiserror::Error;

/// Boxed error carried by a failed job.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors from loading or validating the pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure while reading the config file.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error; includes the file path and serde_yaml line context.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// An explicitly requested config file does not exist.
    #[error("config file not found at {path}")]
    NotFound { path: PathBuf },

    /// A field holds a value the pipeline cannot work with.
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Outcome of a job that did not produce a value.
#[derive(Debug, Error)]
pub enum JobError {
    /// The job ran and returned an error.
    #[error("{0}")]
    Failed(#[source] BoxError),

    /// The job panicked on its worker thread.
    #[error("job panicked: {0}")]
    Panicked(String),

    /// The pool was torn down before the job produced a result.
    #[error("worker pool shut down before the job completed")]
    Disconnected,

    /// An interrupt was raised while waiting for the job.
    #[error("interrupted")]
    Interrupted,
}

impl JobError {
    /// Wrap any error as a job failure.
    pub fn failed(err: impl Into<BoxError>) -> Self {
        JobError::Failed(err.into())
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, JobError::Interrupted)
    }
}

/// Errors raised by the worker pool itself.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to spawn worker thread for pool '{pool}': {source}")]
    Spawn {
        pool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("pool '{pool}' needs at least one worker")]
    NoWorkers { pool: String },

    #[error("failed to install interrupt handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

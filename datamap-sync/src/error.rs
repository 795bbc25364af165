//! Error types for datamap-sync.

use std::path::PathBuf;

use thiserror::Error;

use datamap_core::{JobError, PoolError};
use datamap_export::ExportError;
use datamap_render::RenderError;

/// Failures talking to the remote object store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A request the store rejected or that never reached it.
    #[error("{operation} failed for '{target}': {message}")]
    Remote {
        operation: &'static str,
        target: String,
        message: String,
    },

    /// Bucket missing, forbidden, or otherwise unusable for uploads.
    #[error("bucket {bucket} can not be used for uploads: {reason}")]
    Unusable { bucket: String, reason: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from planning or executing a sync.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to walk tile directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// A bulk delete whose response listed per-key errors.
    #[error("error deleting {} key(s): {}", .failed.len(), .failed.join(", "))]
    DeleteFailed { failed: Vec<String> },

    #[error("failed to encode status record: {0}")]
    Status(#[from] serde_json::Error),

    #[error("sync job failed: {0}")]
    Job(#[from] JobError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Any stage of a full pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("export stage failed: {0}")]
    Export(#[from] ExportError),

    #[error("tile build failed: {0}")]
    Render(#[from] RenderError),

    #[error("sync stage failed: {0}")]
    Sync(#[from] SyncError),

    /// The pipeline needs a collaborator it was not given.
    #[error("{0} is required for this run")]
    Missing(&'static str),

    /// The interrupt flag was seen between stages.
    #[error("interrupted")]
    Interrupted,
}

impl PipelineError {
    /// Whether the run stopped because the interrupt flag was raised.
    pub fn is_interrupted(&self) -> bool {
        match self {
            PipelineError::Export(ExportError::Job(job))
            | PipelineError::Render(RenderError::Job(job))
            | PipelineError::Sync(SyncError::Job(job)) => job.is_interrupted(),
            PipelineError::Interrupted => true,
            _ => false,
        }
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

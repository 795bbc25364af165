//! Error types for datamap-export.

use std::path::PathBuf;

use thiserror::Error;

use datamap_core::{JobError, PoolError, ShardName};

/// Errors from the row-producing data source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("database error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("no table configured for shard '{0}'")]
    UnknownShard(ShardName),
}

/// All errors that can arise while exporting shards to CSV.
#[derive(Debug, Error)]
pub enum ExportError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("data source error: {0}")]
    Source(#[from] SourceError),

    /// A grid key that is not two packed 32-bit integers.
    #[error("grid key must be 8 bytes, got {len}")]
    InvalidGrid { len: usize },

    /// A grid key whose offsets decode past the `i32` range.
    #[error("grid key decodes out of range: lat {lat}, lon {lon}")]
    GridOutOfRange { lat: i64, lon: i64 },

    /// The source returned a page whose last key does not advance the cursor.
    #[error("keyset cursor for shard '{shard}' did not advance")]
    CursorStalled { shard: ShardName },

    #[error("export job failed: {0}")]
    Job(#[from] JobError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Convenience constructor for [`ExportError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ExportError {
    ExportError::Io {
        path: path.into(),
        source,
    }
}

//! Error types for datamap-render.

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

use datamap_core::{JobError, PoolError};

/// Failures invoking one external codec tool.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The tool ran and exited non-zero; `stderr` is what it printed.
    #[error("`{program}` exited with {status}: {stderr}")]
    Exit {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    /// One end of the render → quantize pipe exited non-zero.
    #[error("`{program}` exited with {status} while rendering {tile}")]
    PipeExit {
        program: String,
        status: ExitStatus,
        tile: String,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An enumerator line that is not `<dir> <zoom> <x> <y>`.
    #[error("unexpected enumerate output line: {line:?}")]
    MalformedTile { line: String },
}

/// All errors raised by the index build and tile render stages.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Tool(#[from] ToolError),

    /// A merge was asked to combine zero artifacts.
    #[error("no artifacts matching '{pattern}' in {dir}")]
    NoInputs { dir: PathBuf, pattern: String },

    /// A rotated CSV segment whose name is not `submap_<shard>_<serial>.csv`.
    #[error("unrecognised segment file name '{name}'")]
    SegmentName { name: String },

    #[error("render job failed: {0}")]
    Job(#[from] JobError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RenderError {
    RenderError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn tool_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ToolError {
    ToolError::Io {
        path: path.into(),
        source,
    }
}

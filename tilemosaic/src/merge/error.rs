//! Error types for the merge engine.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::download::DownloadError;
use crate::source::SourceError;
use crate::writer::WriterError;

/// Result type for merge operations.
pub type MergeResult<T> = Result<T, MergeError>;

/// Errors that stop a merge run.
#[derive(Debug, Error)]
pub enum MergeError {
    /// The output exists but no tracker records a run in progress.
    #[error(
        "output file {} already exists and no tracker file was found; refusing to overwrite it",
        .0.display()
    )]
    OutputExists(PathBuf),

    /// The manifest is not a usable mosaic descriptor.
    #[error("invalid mosaic manifest: {0}")]
    InvalidManifest(String),

    /// The stage tracker could not be read or appended.
    #[error("stage tracker {}: {source}", path.display())]
    Tracker {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Any other file system failure, with the path involved.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Writer(#[from] WriterError),

    #[error("manifest JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MergeError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        MergeError::Io {
            path: path.into(),
            source,
        }
    }
}

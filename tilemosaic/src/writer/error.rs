//! Error types for archive writers.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::coord::Tile;
use crate::pmtiles::CodecError;

/// Result type for archive writer operations.
pub type WriterResult<T> = Result<T, WriterError>;

/// Errors raised while building an output archive.
#[derive(Debug, Error)]
pub enum WriterError {
    /// File system operation failed on a specific path.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("PMTiles error: {0}")]
    Codec(#[from] CodecError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A lifecycle method ran before `init`.
    #[error("archive writer used before init")]
    NotInitialized,

    /// The tileset header cannot describe a valid archive.
    #[error("invalid tileset header: {0}")]
    InvalidHeader(String),

    /// Tile address outside the grid of its zoom level.
    #[error("tile {0} is outside the grid")]
    InvalidTile(Tile),

    /// The payload store is shorter than the checkpoint accounts for.
    #[error("payload store {} holds {actual} bytes but the checkpoint expects {expected}", path.display())]
    CheckpointMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    /// Unknown output archive type.
    #[error("unsupported archive type: {0}")]
    UnsupportedArchiveType(String),
}

/// Attach a path to I/O errors.
pub(crate) trait IoContext<T> {
    fn at(self, path: &Path) -> WriterResult<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at(self, path: &Path) -> WriterResult<T> {
        self.map_err(|source| WriterError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

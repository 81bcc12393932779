//! Error types for tile sources.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::coord::Tile;
use crate::pmtiles::CodecError;

/// Result type for tile source operations.
pub type SourceResult<T> = Result<T, SourceError>;

/// Errors raised by tile sources.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The tile is not present in the source.
    #[error("tile {0} not found")]
    MissingTile(Tile),

    /// The source cannot report a zoom range.
    #[error("no zoom information available")]
    NoZoomInfo,

    /// None of the stacked sources carry metadata.
    #[error("no metadata found in any source")]
    NoMetadata,

    /// A tile directory lacks its `metadata.json` sidecar.
    #[error("metadata sidecar not found: {}", .0.display())]
    MissingSidecar(PathBuf),

    /// The sidecar does not name the tile file extension.
    #[error("metadata sidecar {} has no 'format' key", .0.display())]
    MissingFormat(PathBuf),

    /// The input is not a recognized source.
    #[error("invalid source: {0}")]
    InvalidSource(String),

    /// The source was cleaned up and can no longer be read.
    #[error("source has been closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("PMTiles error: {0}")]
    Codec(#[source] CodecError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

impl SourceError {
    /// Whether this error only reports an absent tile.
    pub fn is_missing_tile(&self) -> bool {
        matches!(self, SourceError::MissingTile(_))
    }
}

impl From<CodecError> for SourceError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Closed => SourceError::Closed,
            other => SourceError::Codec(other),
        }
    }
}

impl From<glob::GlobError> for SourceError {
    fn from(e: glob::GlobError) -> Self {
        SourceError::Io(e.into_error())
    }
}

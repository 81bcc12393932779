//! Error types for the PMTiles codec.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while reading or writing PMTiles data.
#[derive(Debug, Error)]
pub enum CodecError {
    /// I/O error on the underlying file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The first bytes are not the `PMTiles` magic.
    #[error("not a PMTiles archive (bad magic)")]
    BadMagic,

    /// Only spec version 3 is understood.
    #[error("unsupported PMTiles version {0}")]
    UnsupportedVersion(u8),

    /// Fewer bytes were available than the structure requires.
    #[error("truncated {what}: expected {expected} bytes, got {actual}")]
    Truncated {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A varint ran past the end of its buffer or overflowed 64 bits.
    #[error("malformed varint in directory")]
    BadVarint,

    /// Directory or metadata compressed with a scheme we cannot decode.
    #[error("unsupported internal compression: {0}")]
    UnsupportedCompression(String),

    /// Unknown enum discriminant in a header field.
    #[error("invalid {field} value {value}")]
    InvalidEnum { field: &'static str, value: u8 },

    /// Tile coordinates outside the addressable grid.
    #[error("tile {z}/{x}/{y} is outside the addressable grid")]
    InvalidTile { z: u8, x: u32, y: u32 },

    /// Tile id beyond the highest supported zoom level.
    #[error("tile id {0} is out of range")]
    TileIdOutOfRange(u64),

    /// Leaf directories nested deeper than the format allows.
    #[error("directory nesting exceeds {0} levels")]
    DirectoryTooDeep(usize),

    /// Metadata JSON failed to parse or serialize.
    #[error("metadata JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The archive file handle was released.
    #[error("archive has been closed")]
    Closed,

    /// Writer state failed to encode or decode.
    #[error("writer state error: {0}")]
    State(String),
}

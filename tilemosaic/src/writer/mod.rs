//! Output archive writers.
//!
//! Both formats share one lifecycle, driven by the merge engine:
//!
//! ```text
//! init() ─► prepare() ─► add_to_archive(tile, bytes)* ─► commit() ─┐
//!                              ▲                                     │
//!                              └──────────── next slice ◄────────────┘
//!                                                   finalize(metadata, header)
//! ```
//!
//! `init` runs on every start, including resumed runs. `prepare` runs once
//! per output. `commit` marks a durable point: after it returns, a crash
//! loses nothing written before it.

mod error;
mod mbtiles;
mod pmtiles;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::{Map, Value};

pub use error::{WriterError, WriterResult};
pub use mbtiles::MbtilesWriter;
pub use pmtiles::{checkpoint_path, payload_path, PmtilesWriter};

use crate::coord::Tile;
use crate::tileset::TilesetHeader;

/// Sink for a stream of tiles producing one output archive.
pub trait ArchiveWriter {
    /// Open or reopen the output and any resumable state.
    fn init(&mut self) -> WriterResult<()>;

    /// One-time setup of a fresh output.
    fn prepare(&mut self) -> WriterResult<()>;

    /// Append one tile.
    fn add_to_archive(&mut self, tile: Tile, data: &[u8]) -> WriterResult<()>;

    /// Make everything added so far durable.
    fn commit(&mut self) -> WriterResult<()>;

    /// Write metadata and indexes and complete the output.
    fn finalize(&mut self, metadata: &Map<String, Value>, header: &TilesetHeader) -> WriterResult<()>;

    /// Path of the archive being produced.
    fn output_path(&self) -> &Path;
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveType {
    Mbtiles,
    Pmtiles,
}

impl ArchiveType {
    /// File extension without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveType::Mbtiles => "mbtiles",
            ArchiveType::Pmtiles => "pmtiles",
        }
    }

    /// Infer the type from a path's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()?.to_str()?.parse().ok()
    }
}

impl fmt::Display for ArchiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ArchiveType {
    type Err = WriterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mbtiles" => Ok(ArchiveType::Mbtiles),
            "pmtiles" => Ok(ArchiveType::Pmtiles),
            other => Err(WriterError::UnsupportedArchiveType(other.to_string())),
        }
    }
}

/// Build the writer for `archive_type` targeting `output`.
///
/// With `force`, resumable state left by an earlier run is discarded at
/// `init`.
pub fn create_writer(
    archive_type: ArchiveType,
    output: impl Into<PathBuf>,
    force: bool,
) -> Box<dyn ArchiveWriter> {
    match archive_type {
        ArchiveType::Mbtiles => Box::new(MbtilesWriter::new(output)),
        ArchiveType::Pmtiles => Box::new(PmtilesWriter::new(output, force)),
    }
}

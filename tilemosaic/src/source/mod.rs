//! Uniform read access to tile archives.
//!
//! Every backing store implements [`TileSource`]: point lookups of tile
//! payloads and sizes, lazy enumeration, zoom bounds and recognized
//! metadata. [`TileArchive`] closes the set of variants so callers can hold
//! any of them, and [`open_sources`] builds one from command-line style
//! inputs.
//!
//! # Backing stores
//!
//! | Variant | Input | Layout |
//! |---------|-------|--------|
//! | [`DiskSource`] | directory | `{root}/{z}/{x}/{y}.{format}` plus `metadata.json` |
//! | [`MbtilesSource`] | `*.mbtiles` | SQLite `tiles` table, TMS rows |
//! | [`PmtilesSource`] | `*.pmtiles` (glob) | PMTiles v3 |
//! | [`StackedSource`] | several inputs | first source wins |
//!
//! # Enumeration
//!
//! Enumerations return boxed iterators of `Result` items. They are finite,
//! can be dropped partway, and start over when invoked again.

mod disk;
mod error;
mod mbtiles;
mod pmtiles;
mod stacked;

use std::path::Path;

use tracing::debug;

pub use disk::DiskSource;
pub use error::{SourceError, SourceResult};
pub use mbtiles::MbtilesSource;
pub use pmtiles::PmtilesSource;
pub use stacked::StackedSource;

use crate::coord::Tile;
use crate::tileset::Metadata;

/// Lazy sequence of tiles paired with a payload or a size.
pub type TileIter<'a, T> = Box<dyn Iterator<Item = SourceResult<(Tile, T)>> + 'a>;

/// Read access to a tile archive.
pub trait TileSource {
    /// Payload of one tile; [`SourceError::MissingTile`] if absent.
    fn get_tile_data(&self, tile: Tile) -> SourceResult<Vec<u8>>;

    /// Payload length of one tile without reading the payload where the
    /// store allows it; [`SourceError::MissingTile`] if absent.
    fn get_tile_size(&self, tile: Tile) -> SourceResult<u64>;

    /// Every tile at one zoom level with its size.
    fn enumerate_zoom(&self, zoom: u8) -> TileIter<'_, u64>;

    /// Every tile with its payload.
    fn enumerate_all(&self) -> TileIter<'_, Vec<u8>>;

    /// Every tile with its size.
    fn enumerate_all_sizes(&self) -> TileIter<'_, u64>;

    /// Lowest zoom level; [`SourceError::NoZoomInfo`] when unknown.
    fn min_zoom(&self) -> SourceResult<u8>;

    /// Highest zoom level; [`SourceError::NoZoomInfo`] when unknown.
    fn max_zoom(&self) -> SourceResult<u8>;

    /// Metadata restricted to the recognized keys.
    fn get_metadata(&self) -> SourceResult<Metadata>;

    /// Release held handles. Safe to call more than once.
    fn cleanup(&self);
}

/// Closed set of tile source variants.
#[derive(Debug)]
pub enum TileArchive {
    Disk(DiskSource),
    Mbtiles(MbtilesSource),
    Pmtiles(PmtilesSource),
    Stacked(StackedSource),
}

impl TileArchive {
    /// Short name of the backing store.
    pub fn kind(&self) -> &'static str {
        match self {
            TileArchive::Disk(_) => "disk",
            TileArchive::Mbtiles(_) => "mbtiles",
            TileArchive::Pmtiles(_) => "pmtiles",
            TileArchive::Stacked(_) => "stacked",
        }
    }
}

macro_rules! dispatch {
    ($archive:expr, $source:ident => $body:expr) => {
        match $archive {
            TileArchive::Disk($source) => $body,
            TileArchive::Mbtiles($source) => $body,
            TileArchive::Pmtiles($source) => $body,
            TileArchive::Stacked($source) => $body,
        }
    };
}

impl TileSource for TileArchive {
    fn get_tile_data(&self, tile: Tile) -> SourceResult<Vec<u8>> {
        dispatch!(self, s => s.get_tile_data(tile))
    }

    fn get_tile_size(&self, tile: Tile) -> SourceResult<u64> {
        dispatch!(self, s => s.get_tile_size(tile))
    }

    fn enumerate_zoom(&self, zoom: u8) -> TileIter<'_, u64> {
        dispatch!(self, s => s.enumerate_zoom(zoom))
    }

    fn enumerate_all(&self) -> TileIter<'_, Vec<u8>> {
        dispatch!(self, s => s.enumerate_all())
    }

    fn enumerate_all_sizes(&self) -> TileIter<'_, u64> {
        dispatch!(self, s => s.enumerate_all_sizes())
    }

    fn min_zoom(&self) -> SourceResult<u8> {
        dispatch!(self, s => s.min_zoom())
    }

    fn max_zoom(&self) -> SourceResult<u8> {
        dispatch!(self, s => s.max_zoom())
    }

    fn get_metadata(&self) -> SourceResult<Metadata> {
        dispatch!(self, s => s.get_metadata())
    }

    fn cleanup(&self) {
        dispatch!(self, s => s.cleanup())
    }
}

impl From<DiskSource> for TileArchive {
    fn from(source: DiskSource) -> Self {
        TileArchive::Disk(source)
    }
}

impl From<MbtilesSource> for TileArchive {
    fn from(source: MbtilesSource) -> Self {
        TileArchive::Mbtiles(source)
    }
}

impl From<PmtilesSource> for TileArchive {
    fn from(source: PmtilesSource) -> Self {
        TileArchive::Pmtiles(source)
    }
}

impl From<StackedSource> for TileArchive {
    fn from(source: StackedSource) -> Self {
        TileArchive::Stacked(source)
    }
}

/// Open a single input.
///
/// `.mbtiles` paths open an MBTiles archive; `.pmtiles` inputs are glob
/// patterns and every match opens (stacked when more than one matches);
/// directories open as disk sources.
pub fn open_source(input: &str) -> SourceResult<TileArchive> {
    open_sources(&[input])
}

/// Open several inputs as one source, stacked in the given order.
///
/// ```no_run
/// use tilemosaic::source::{open_sources, TileSource};
///
/// let source = open_sources(&["overrides/*.pmtiles", "base.mbtiles"])?;
/// println!("zoom {}..={}", source.min_zoom()?, source.max_zoom()?);
/// # Ok::<(), tilemosaic::source::SourceError>(())
/// ```
pub fn open_sources<S: AsRef<str>>(inputs: &[S]) -> SourceResult<TileArchive> {
    let mut sources = Vec::new();
    for input in inputs {
        expand_input(input.as_ref(), &mut sources)?;
    }

    match sources.len() {
        0 => Err(SourceError::InvalidSource("no sources provided".into())),
        1 => Ok(sources.remove(0)),
        n => {
            debug!(sources = n, "Stacking sources");
            Ok(StackedSource::new(sources).into())
        }
    }
}

fn expand_input(input: &str, sources: &mut Vec<TileArchive>) -> SourceResult<()> {
    if input.ends_with(".mbtiles") {
        sources.push(MbtilesSource::open(input)?.into());
    } else if input.ends_with(".pmtiles") {
        let mut matched = false;
        for path in glob::glob(input)? {
            sources.push(PmtilesSource::open(path?)?.into());
            matched = true;
        }
        if !matched {
            return Err(SourceError::InvalidSource(format!(
                "no PMTiles files match pattern {}",
                input
            )));
        }
    } else if Path::new(input).is_dir() {
        sources.push(DiskSource::open(input)?.into());
    } else {
        return Err(SourceError::InvalidSource(input.to_string()));
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_input_is_not_stacked() {
        let dir = tempfile::tempdir().unwrap();
        let path = pmtiles_file(&dir.path().join("a.pmtiles"), &[(Tile::new(0, 0, 0), b"x")], "a");

        let source = open_source(path.to_str().unwrap()).unwrap();
        assert_eq!(source.kind(), "pmtiles");
    }

    #[test]
    fn test_pmtiles_glob_stacks_matches() {
        let dir = tempfile::tempdir().unwrap();
        pmtiles_file(&dir.path().join("a.pmtiles"), &[(Tile::new(0, 0, 0), b"a")], "a");
        pmtiles_file(&dir.path().join("b.pmtiles"), &[(Tile::new(1, 0, 0), b"b")], "b");

        let pattern = format!("{}/*.pmtiles", dir.path().display());
        let source = open_source(&pattern).unwrap();
        assert_eq!(source.kind(), "stacked");
        assert_eq!(source.enumerate_all().count(), 2);
        // alphabetical match order puts a.pmtiles first
        assert_eq!(source.get_metadata().unwrap().name.as_deref(), Some("a"));
    }

    #[test]
    fn test_mixed_inputs_stack_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let tree = dir.path().join("tiles");
        disk_tree(&tree, &[(Tile::new(0, 0, 0), b"disk")], json!({"format": "png"}));
        let archive = pmtiles_file(&dir.path().join("p.pmtiles"), &[(Tile::new(0, 0, 0), b"pm")], "p");

        let source = open_sources(&[tree.to_str().unwrap(), archive.to_str().unwrap()]).unwrap();
        assert_eq!(source.get_tile_data(Tile::new(0, 0, 0)).unwrap(), b"disk");
    }

    #[test]
    fn test_unmatched_pattern_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = format!("{}/*.pmtiles", dir.path().display());
        assert!(matches!(
            open_source(&pattern),
            Err(SourceError::InvalidSource(_))
        ));
    }

    #[test]
    fn test_unrecognized_input_is_rejected() {
        assert!(matches!(
            open_source("/definitely/not/here.txt"),
            Err(SourceError::InvalidSource(_))
        ));
        let empty: [&str; 0] = [];
        assert!(open_sources(&empty).is_err());
    }
}

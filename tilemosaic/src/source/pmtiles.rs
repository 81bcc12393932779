//! PMTiles tile source.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::{SourceError, SourceResult};
use super::{TileIter, TileSource};
use crate::coord::Tile;
use crate::pmtiles::Reader;
use crate::tileset::{Metadata, TilesetHeader};

/// Tiles from a PMTiles archive.
///
/// Size queries and size enumeration read only directories; payload bytes
/// are touched by [`TileSource::get_tile_data`] and
/// [`TileSource::enumerate_all`] alone.
#[derive(Debug)]
pub struct PmtilesSource {
    path: PathBuf,
    reader: Reader,
}

impl PmtilesSource {
    pub fn open(path: impl AsRef<Path>) -> SourceResult<Self> {
        let path = path.as_ref().to_path_buf();
        let reader = Reader::open(&path)?;
        Ok(Self { path, reader })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Summary fields of the archive header.
    pub fn header(&self) -> TilesetHeader {
        TilesetHeader::from(self.reader.header())
    }
}

impl TileSource for PmtilesSource {
    fn get_tile_data(&self, tile: Tile) -> SourceResult<Vec<u8>> {
        if !tile.is_valid() {
            return Err(SourceError::MissingTile(tile));
        }
        self.reader
            .get_tile(tile)?
            .ok_or(SourceError::MissingTile(tile))
    }

    fn get_tile_size(&self, tile: Tile) -> SourceResult<u64> {
        if !tile.is_valid() {
            return Err(SourceError::MissingTile(tile));
        }
        self.reader
            .tile_size(tile)?
            .ok_or(SourceError::MissingTile(tile))
    }

    fn enumerate_zoom(&self, zoom: u8) -> TileIter<'_, u64> {
        Box::new(self.reader.tile_sizes().filter_map(move |item| match item {
            Ok((tile, size)) if tile.z == zoom => Some(Ok((tile, size))),
            Ok(_) => None,
            Err(e) => Some(Err(e.into())),
        }))
    }

    fn enumerate_all(&self) -> TileIter<'_, Vec<u8>> {
        Box::new(self.reader.tiles().map(|item| item.map_err(SourceError::from)))
    }

    fn enumerate_all_sizes(&self) -> TileIter<'_, u64> {
        Box::new(self.reader.tile_sizes().map(|item| item.map_err(SourceError::from)))
    }

    fn min_zoom(&self) -> SourceResult<u8> {
        if self.reader.is_empty() {
            return Err(SourceError::NoZoomInfo);
        }
        Ok(self.reader.header().min_zoom)
    }

    fn max_zoom(&self) -> SourceResult<u8> {
        if self.reader.is_empty() {
            return Err(SourceError::NoZoomInfo);
        }
        Ok(self.reader.header().max_zoom)
    }

    fn get_metadata(&self) -> SourceResult<Metadata> {
        Ok(Metadata::from_json_map(&self.reader.metadata()?))
    }

    fn cleanup(&self) {
        debug!(path = %self.path.display(), "Releasing PMTiles source");
        self.reader.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::test_support::pmtiles_file;

    fn sample(dir: &Path) -> PmtilesSource {
        let path = pmtiles_file(
            &dir.join("sample.pmtiles"),
            &[
                (Tile::new(0, 0, 0), b"world"),
                (Tile::new(2, 1, 1), b"same"),
                (Tile::new(2, 1, 2), b"same"),
                (Tile::new(2, 3, 0), b"corner"),
            ],
            "sample",
        );
        PmtilesSource::open(path).unwrap()
    }

    #[test]
    fn test_point_lookups() {
        let dir = tempfile::tempdir().unwrap();
        let source = sample(dir.path());

        assert_eq!(source.get_tile_data(Tile::new(2, 3, 0)).unwrap(), b"corner");
        assert_eq!(source.get_tile_size(Tile::new(2, 1, 2)).unwrap(), 4);
        assert!(source.get_tile_data(Tile::new(1, 0, 0)).unwrap_err().is_missing_tile());
        assert!(source.get_tile_size(Tile::new(2, 9, 9)).unwrap_err().is_missing_tile());
    }

    #[test]
    fn test_size_matches_payload_length() {
        let dir = tempfile::tempdir().unwrap();
        let source = sample(dir.path());
        let sizes: Vec<(Tile, u64)> = source.enumerate_all_sizes().map(Result::unwrap).collect();
        assert_eq!(sizes.len(), 4);
        for (tile, size) in sizes {
            assert_eq!(source.get_tile_data(tile).unwrap().len() as u64, size);
        }
    }

    #[test]
    fn test_enumerate_zoom_filters_levels() {
        let dir = tempfile::tempdir().unwrap();
        let source = sample(dir.path());
        let mut zoom_two: Vec<Tile> = source.enumerate_zoom(2).map(|i| i.unwrap().0).collect();
        zoom_two.sort();
        assert_eq!(
            zoom_two,
            vec![Tile::new(2, 1, 1), Tile::new(2, 1, 2), Tile::new(2, 3, 0)]
        );
        assert_eq!(source.enumerate_zoom(1).count(), 0);
    }

    #[test]
    fn test_header_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let source = sample(dir.path());
        assert_eq!(source.min_zoom().unwrap(), 0);
        assert_eq!(source.max_zoom().unwrap(), 2);
        assert_eq!(source.get_metadata().unwrap().name.as_deref(), Some("sample"));
        assert_eq!(source.header().max_zoom, 2);
    }

    #[test]
    fn test_empty_archive_has_no_zoom_info() {
        let dir = tempfile::tempdir().unwrap();
        let path = pmtiles_file(&dir.path().join("empty.pmtiles"), &[], "empty");
        let source = PmtilesSource::open(path).unwrap();
        assert!(matches!(source.min_zoom(), Err(SourceError::NoZoomInfo)));
        assert_eq!(source.enumerate_all().count(), 0);
    }

    #[test]
    fn test_cleanup_closes_reader() {
        let dir = tempfile::tempdir().unwrap();
        let source = sample(dir.path());
        source.cleanup();
        source.cleanup();
        assert!(matches!(
            source.get_tile_data(Tile::new(0, 0, 0)),
            Err(SourceError::Closed)
        ));
    }
}

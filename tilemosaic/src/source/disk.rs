//! Tile tree on the local filesystem.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, trace};

use super::error::{SourceError, SourceResult};
use super::{TileIter, TileSource};
use crate::coord::Tile;
use crate::tileset::Metadata;

const SIDECAR: &str = "metadata.json";

/// Tiles stored as `{root}/{z}/{x}/{y}.{format}`.
///
/// The `format` key of `{root}/metadata.json` supplies the file extension;
/// the sidecar is read once when the source opens.
#[derive(Debug)]
pub struct DiskSource {
    root: PathBuf,
    ext: String,
    sidecar: Map<String, Value>,
}

impl DiskSource {
    /// Open a tile tree. Fails if the sidecar or its `format` key is missing.
    pub fn open(root: impl AsRef<Path>) -> SourceResult<Self> {
        let root = root.as_ref().to_path_buf();
        let sidecar_path = root.join(SIDECAR);

        let raw = match fs::read_to_string(&sidecar_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SourceError::MissingSidecar(sidecar_path));
            }
            Err(e) => return Err(e.into()),
        };
        let sidecar: Map<String, Value> = serde_json::from_str(&raw)?;

        let ext = sidecar
            .get("format")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SourceError::MissingFormat(sidecar_path.clone()))?;

        debug!(root = %root.display(), ext = %ext, "Opened disk tile source");
        Ok(Self { root, ext, sidecar })
    }

    fn tile_path(&self, tile: Tile) -> PathBuf {
        self.root
            .join(tile.z.to_string())
            .join(tile.x.to_string())
            .join(format!("{}.{}", tile.y, self.ext))
    }

    fn tile_from_path(&self, path: &Path) -> Option<Tile> {
        let y = path.file_stem()?.to_str()?.parse().ok()?;
        let x_dir = path.parent()?;
        let x = x_dir.file_name()?.to_str()?.parse().ok()?;
        let z = x_dir.parent()?.file_name()?.to_str()?.parse().ok()?;
        Some(Tile::new(z, x, y))
    }

    /// Glob `{root}/{zoom}/*/*.{ext}` and map each file through `f`.
    fn scan<'a, T: 'a>(
        &'a self,
        zoom: Option<u8>,
        f: impl Fn(&Path) -> SourceResult<T> + 'a,
    ) -> TileIter<'a, T> {
        let root = match self.root.to_str() {
            Some(root) => glob::Pattern::escape(root),
            None => {
                return Box::new(std::iter::once(Err(SourceError::InvalidSource(format!(
                    "non UTF-8 path {}",
                    self.root.display()
                )))))
            }
        };
        let zoom = zoom.map_or_else(|| "*".to_string(), |z| z.to_string());
        let pattern = format!("{}/{}/*/*.{}", root, zoom, glob::Pattern::escape(&self.ext));

        let paths = match glob::glob(&pattern) {
            Ok(paths) => paths,
            Err(e) => return Box::new(std::iter::once(Err(e.into()))),
        };

        Box::new(paths.filter_map(move |entry| {
            let path = match entry {
                Ok(path) => path,
                Err(e) => return Some(Err(e.into())),
            };
            match self.tile_from_path(&path) {
                Some(tile) => Some(f(&path).map(|value| (tile, value))),
                None => {
                    trace!(path = %path.display(), "Skipping non-tile file");
                    None
                }
            }
        }))
    }

    fn sidecar_zoom(&self, key: &str) -> Option<SourceResult<u8>> {
        let value = self.sidecar.get(key)?;
        let parsed = match value {
            Value::Number(n) => n.as_u64().and_then(|z| u8::try_from(z).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        Some(parsed.ok_or(SourceError::NoZoomInfo))
    }

    /// Zoom levels with at least one tile, from directory names.
    fn scanned_zooms(&self) -> SourceResult<Vec<u8>> {
        let mut zooms = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let Some(zoom) = entry.file_name().to_str().and_then(|n| n.parse::<u8>().ok()) else {
                continue;
            };
            if entry.path().is_dir() && self.enumerate_zoom(zoom).any(|item| item.is_ok()) {
                zooms.push(zoom);
            }
        }
        Ok(zooms)
    }
}

fn not_found_as_missing(e: io::Error, tile: Tile) -> SourceError {
    if e.kind() == io::ErrorKind::NotFound {
        SourceError::MissingTile(tile)
    } else {
        e.into()
    }
}

impl TileSource for DiskSource {
    fn get_tile_data(&self, tile: Tile) -> SourceResult<Vec<u8>> {
        fs::read(self.tile_path(tile)).map_err(|e| not_found_as_missing(e, tile))
    }

    fn get_tile_size(&self, tile: Tile) -> SourceResult<u64> {
        fs::metadata(self.tile_path(tile))
            .map(|m| m.len())
            .map_err(|e| not_found_as_missing(e, tile))
    }

    fn enumerate_zoom(&self, zoom: u8) -> TileIter<'_, u64> {
        self.scan(Some(zoom), |path| Ok(fs::metadata(path)?.len()))
    }

    fn enumerate_all(&self) -> TileIter<'_, Vec<u8>> {
        self.scan(None, |path| Ok(fs::read(path)?))
    }

    fn enumerate_all_sizes(&self) -> TileIter<'_, u64> {
        self.scan(None, |path| Ok(fs::metadata(path)?.len()))
    }

    fn min_zoom(&self) -> SourceResult<u8> {
        if let Some(zoom) = self.sidecar_zoom("minzoom") {
            return zoom;
        }
        self.scanned_zooms()?
            .into_iter()
            .min()
            .ok_or(SourceError::NoZoomInfo)
    }

    fn max_zoom(&self) -> SourceResult<u8> {
        if let Some(zoom) = self.sidecar_zoom("maxzoom") {
            return zoom;
        }
        self.scanned_zooms()?
            .into_iter()
            .max()
            .ok_or(SourceError::NoZoomInfo)
    }

    fn get_metadata(&self) -> SourceResult<Metadata> {
        Ok(Metadata::from_json_map(&self.sidecar))
    }

    fn cleanup(&self) {}
}

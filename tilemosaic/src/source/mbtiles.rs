//! MBTiles (SQLite) tile source.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::types::FromSql;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde_json::{Map, Value};
use tracing::debug;

use super::error::{SourceError, SourceResult};
use super::{TileIter, TileSource};
use crate::coord::{xyz_to_tms_row, Tile, MAX_ZOOM};
use crate::tileset::Metadata;

/// Rows fetched per enumeration query.
const PAGE_SIZE: i64 = 1000;

/// Tiles from an MBTiles archive.
///
/// Rows are stored in TMS order; every read converts to and from XYZ.
#[derive(Debug)]
pub struct MbtilesSource {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
    full_metadata: Mutex<Option<Map<String, Value>>>,
}

impl MbtilesSource {
    /// Open an existing archive read-only.
    pub fn open(path: impl AsRef<Path>) -> SourceResult<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        debug!(path = %path.display(), "Opened MBTiles source");
        Ok(Self {
            path,
            conn: Mutex::new(Some(conn)),
            full_metadata: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> SourceResult<T>) -> SourceResult<T> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or(SourceError::Closed)?;
        f(conn)
    }

    /// Every metadata row, with the fields of the `json` row merged on top.
    fn full_metadata(&self) -> SourceResult<Map<String, Value>> {
        if let Some(cached) = self.full_metadata.lock().as_ref() {
            return Ok(cached.clone());
        }

        let rows: Vec<(String, Option<String>)> = self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT name, value FROM metadata")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<_, _>>()?;
            Ok(rows)
        })?;

        let mut all = Map::new();
        let mut json_fields = None;
        for (name, value) in rows {
            let Some(value) = value else { continue };
            if name == "json" {
                json_fields = Some(serde_json::from_str::<Map<String, Value>>(&value)?);
            } else {
                all.insert(name, Value::String(value));
            }
        }
        if let Some(fields) = json_fields {
            all.extend(fields);
        }

        *self.full_metadata.lock() = Some(all.clone());
        Ok(all)
    }

    fn metadata_zoom(&self, key: &str) -> SourceResult<u8> {
        let metadata = self.full_metadata()?;
        let parsed = match metadata.get(key) {
            Some(Value::String(s)) => s.trim().parse().ok(),
            Some(Value::Number(n)) => n.as_u64().and_then(|z| u8::try_from(z).ok()),
            _ => None,
        };
        parsed.ok_or(SourceError::NoZoomInfo)
    }

    fn pages<T: FromSql + 'static>(&self, value_expr: &'static str, zoom: Option<u8>) -> TilePages<'_, T> {
        let (start_zoom, last_zoom) = match zoom {
            Some(z) => (i64::from(z), i64::from(z)),
            None => (-1, i64::MAX),
        };
        TilePages {
            source: self,
            sql: format!(
                "SELECT zoom_level, tile_column, tile_row, {} FROM tiles \
                 WHERE (zoom_level, tile_column, tile_row) > (?1, ?2, ?3) AND zoom_level <= ?4 \
                 ORDER BY zoom_level, tile_column, tile_row LIMIT ?5",
                value_expr
            ),
            cursor: (start_zoom, -1, -1),
            last_zoom,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }
}

/// Convert a stored `(zoom_level, tile_column, tile_row)` to an XYZ tile.
fn tile_from_row(zoom: i64, column: i64, row: i64) -> SourceResult<Tile> {
    let invalid = || SourceError::InvalidSource(format!("tile row {}/{}/{} is outside the grid", zoom, column, row));
    let z = u8::try_from(zoom).ok().filter(|z| *z <= MAX_ZOOM).ok_or_else(invalid)?;
    let max = 1i64 << z;
    if !(0..max).contains(&column) || !(0..max).contains(&row) {
        return Err(invalid());
    }
    Ok(Tile::new(z, column as u32, xyz_to_tms_row(z, row as u32)))
}

fn tile_params(tile: Tile) -> SourceResult<(i64, i64, i64)> {
    if !tile.is_valid() {
        return Err(SourceError::MissingTile(tile));
    }
    Ok((
        i64::from(tile.z),
        i64::from(tile.x),
        i64::from(xyz_to_tms_row(tile.z, tile.y)),
    ))
}

/// Keyset-paged scan of the `tiles` table.
///
/// No statement stays open between pages, so the iterator may be dropped or
/// interleaved with point lookups freely.
struct TilePages<'a, T> {
    source: &'a MbtilesSource,
    sql: String,
    cursor: (i64, i64, i64),
    last_zoom: i64,
    buffer: VecDeque<(i64, i64, i64, T)>,
    exhausted: bool,
}

impl<T: FromSql> TilePages<'_, T> {
    fn fetch(&mut self) -> SourceResult<()> {
        let (z, x, y) = self.cursor;
        let page: Vec<(i64, i64, i64, T)> = self.source.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&self.sql)?;
            let rows = stmt
                .query_map(params![z, x, y, self.last_zoom, PAGE_SIZE], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })?
                .collect::<Result<_, _>>()?;
            Ok(rows)
        })?;

        if (page.len() as i64) < PAGE_SIZE {
            self.exhausted = true;
        }
        if let Some((z, x, y, _)) = page.last() {
            self.cursor = (*z, *x, *y);
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl<T: FromSql> Iterator for TilePages<'_, T> {
    type Item = SourceResult<(Tile, T)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        let (z, x, y, value) = self.buffer.pop_front()?;
        Some(tile_from_row(z, x, y).map(|tile| (tile, value)))
    }
}

fn size_from_length(length: i64) -> u64 {
    u64::try_from(length).unwrap_or(0)
}

impl TileSource for MbtilesSource {
    fn get_tile_data(&self, tile: Tile) -> SourceResult<Vec<u8>> {
        let (z, x, y) = tile_params(tile)?;
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT tile_data FROM tiles WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
                params![z, x, y],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(SourceError::MissingTile(tile))
        })
    }

    fn get_tile_size(&self, tile: Tile) -> SourceResult<u64> {
        let (z, x, y) = tile_params(tile)?;
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT length(tile_data) FROM tiles WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
                params![z, x, y],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .map(size_from_length)
            .ok_or(SourceError::MissingTile(tile))
        })
    }

    fn enumerate_zoom(&self, zoom: u8) -> TileIter<'_, u64> {
        Box::new(
            self.pages::<i64>("length(tile_data)", Some(zoom))
                .map(|item| item.map(|(tile, length)| (tile, size_from_length(length)))),
        )
    }

    fn enumerate_all(&self) -> TileIter<'_, Vec<u8>> {
        Box::new(self.pages::<Vec<u8>>("tile_data", None))
    }

    fn enumerate_all_sizes(&self) -> TileIter<'_, u64> {
        Box::new(
            self.pages::<i64>("length(tile_data)", None)
                .map(|item| item.map(|(tile, length)| (tile, size_from_length(length)))),
        )
    }

    fn min_zoom(&self) -> SourceResult<u8> {
        self.metadata_zoom("minzoom")
    }

    fn max_zoom(&self) -> SourceResult<u8> {
        self.metadata_zoom("maxzoom")
    }

    fn get_metadata(&self) -> SourceResult<Metadata> {
        Ok(Metadata::from_json_map(&self.full_metadata()?))
    }

    fn cleanup(&self) {
        if let Some(conn) = self.conn.lock().take() {
            if let Err((_, e)) = conn.close() {
                debug!(path = %self.path.display(), error = %e, "Failed to close MBTiles source");
            }
        }
    }
}

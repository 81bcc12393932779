//! MBTiles output.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection};
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::error::{WriterError, WriterResult};
use super::ArchiveWriter;
use crate::coord::{xyz_to_tms_row, Tile};
use crate::tileset::TilesetHeader;

/// Metadata keys stored together in the `json` row.
const JSON_KEYS: [&str; 2] = ["vector_layers", "tilestats"];

/// Writes tiles into an MBTiles (SQLite) archive.
///
/// Inserts accumulate in one open transaction until [`ArchiveWriter::commit`].
/// The unique tile index exists from [`ArchiveWriter::prepare`] on, and a
/// tile that is already stored keeps its first payload, so replaying a
/// committed slice after a crash changes nothing.
pub struct MbtilesWriter {
    output: PathBuf,
    conn: Option<Connection>,
    in_transaction: bool,
}

impl MbtilesWriter {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            conn: None,
            in_transaction: false,
        }
    }

    fn conn(&self) -> WriterResult<&Connection> {
        self.conn.as_ref().ok_or(WriterError::NotInitialized)
    }

    fn insert_metadata(
        conn: &Connection,
        metadata: &Map<String, Value>,
        header: &TilesetHeader,
    ) -> WriterResult<()> {
        let mut rows = metadata.clone();
        rows.insert("maxzoom".into(), Value::from(header.max_zoom));
        rows.insert("minzoom".into(), Value::from(header.min_zoom));
        rows.insert("bounds".into(), Value::String(header.bounds_string()));
        rows.insert("center".into(), Value::String(header.center_string()));

        let mut json_row = Map::new();
        conn.execute("DELETE FROM metadata", [])?;
        let mut stmt = conn.prepare("INSERT INTO metadata (name, value) VALUES (?1, ?2)")?;
        for (name, value) in rows {
            if JSON_KEYS.contains(&name.as_str()) {
                json_row.insert(name, value);
                continue;
            }
            let text = match value {
                Value::String(s) => s,
                other => serde_json::to_string(&other)?,
            };
            stmt.execute(params![name, text])?;
        }

        if !json_row.is_empty() {
            stmt.execute(params!["json", serde_json::to_string(&json_row)?])?;
        }
        Ok(())
    }
}

impl ArchiveWriter for MbtilesWriter {
    fn init(&mut self) -> WriterResult<()> {
        let conn = Connection::open(&self.output)?;
        conn.pragma_update(None, "synchronous", "OFF")?;
        conn.pragma_update_and_check(None, "locking_mode", "EXCLUSIVE", |row| {
            row.get::<_, String>(0)
        })?;
        conn.pragma_update_and_check(None, "journal_mode", "DELETE", |row| {
            row.get::<_, String>(0)
        })?;
        debug!(path = %self.output.display(), "Opened MBTiles output");
        self.conn = Some(conn);
        Ok(())
    }

    fn prepare(&mut self) -> WriterResult<()> {
        self.conn()?.execute_batch(
            "CREATE TABLE IF NOT EXISTS metadata (name text, value text);
             CREATE TABLE IF NOT EXISTS tiles (zoom_level integer, tile_column integer, tile_row integer, tile_data blob);
             CREATE UNIQUE INDEX IF NOT EXISTS tile_index on tiles (zoom_level, tile_column, tile_row);",
        )?;
        Ok(())
    }

    fn add_to_archive(&mut self, tile: Tile, data: &[u8]) -> WriterResult<()> {
        if !tile.is_valid() {
            return Err(WriterError::InvalidTile(tile));
        }
        let conn = self.conn.as_ref().ok_or(WriterError::NotInitialized)?;
        if !self.in_transaction {
            conn.execute_batch("BEGIN")?;
            self.in_transaction = true;
        }
        conn.prepare_cached("INSERT OR IGNORE INTO tiles VALUES (?1, ?2, ?3, ?4)")?
            .execute(params![tile.z, tile.x, xyz_to_tms_row(tile.z, tile.y), data])?;
        Ok(())
    }

    fn commit(&mut self) -> WriterResult<()> {
        if self.in_transaction {
            self.conn()?.execute_batch("COMMIT")?;
            self.in_transaction = false;
        }
        Ok(())
    }

    fn finalize(&mut self, metadata: &Map<String, Value>, header: &TilesetHeader) -> WriterResult<()> {
        if header.min_zoom > header.max_zoom {
            return Err(WriterError::InvalidHeader(format!(
                "min zoom {} exceeds max zoom {}",
                header.min_zoom, header.max_zoom
            )));
        }
        self.commit()?;

        let conn = self.conn()?;
        conn.execute_batch("BEGIN")?;
        Self::insert_metadata(conn, metadata, header)?;
        conn.execute_batch("COMMIT")?;
        conn.execute_batch(
            "CREATE UNIQUE INDEX IF NOT EXISTS tile_index on tiles (zoom_level, tile_column, tile_row);
             ANALYZE;",
        )?;

        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| e)?;
        }
        info!(path = %self.output.display(), "Finalized MBTiles archive");
        Ok(())
    }

    fn output_path(&self) -> &Path {
        &self.output
    }
}

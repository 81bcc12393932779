//! Resumable PMTiles output.
//!
//! Tile payloads stream into `<stem>.tiles.bin` while the directory index
//! lives in memory. Each commit persists the index to `<stem>.meta.bin`, so a
//! restarted run picks up exactly where the last commit left off. The final
//! archive is assembled only at finalize, after which both files are removed.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::error::{IoContext, WriterError, WriterResult};
use super::ArchiveWriter;
use crate::coord::Tile;
use crate::pmtiles::{zxy_to_tile_id, Writer, WriterState};
use crate::tileset::TilesetHeader;

/// Payload store kept next to `output` while a merge is in progress.
pub fn payload_path(output: &Path) -> PathBuf {
    output.with_extension("tiles.bin")
}

/// Checkpoint kept next to `output` while a merge is in progress.
pub fn checkpoint_path(output: &Path) -> PathBuf {
    output.with_extension("meta.bin")
}

/// Writes tiles into a PMTiles v3 archive, checkpointing between slices.
pub struct PmtilesWriter {
    output: PathBuf,
    payload: PathBuf,
    checkpoint: PathBuf,
    force: bool,
    writer: Option<Writer<BufWriter<File>>>,
}

impl PmtilesWriter {
    /// Target `output`; with `force`, leftovers of an earlier run are
    /// deleted at [`ArchiveWriter::init`] instead of resumed.
    pub fn new(output: impl Into<PathBuf>, force: bool) -> Self {
        let output = output.into();
        Self {
            payload: payload_path(&output),
            checkpoint: checkpoint_path(&output),
            output,
            force,
            writer: None,
        }
    }

    /// Snapshot of the index accumulated so far.
    pub fn export_state(&self) -> WriterResult<WriterState> {
        Ok(self.writer()?.state().clone())
    }

    /// Replace the accumulated index, e.g. with one read from a checkpoint.
    ///
    /// The payload store is not touched; callers keep it consistent with
    /// `state.offset`.
    pub fn import_state(&mut self, state: WriterState) -> WriterResult<()> {
        self.writer_mut()?.set_state(state);
        Ok(())
    }

    fn writer(&self) -> WriterResult<&Writer<BufWriter<File>>> {
        self.writer.as_ref().ok_or(WriterError::NotInitialized)
    }

    fn writer_mut(&mut self) -> WriterResult<&mut Writer<BufWriter<File>>> {
        self.writer.as_mut().ok_or(WriterError::NotInitialized)
    }

    fn remove_aux_files(&self) -> WriterResult<()> {
        for path in [&self.payload, &self.checkpoint] {
            match fs::remove_file(path) {
                Ok(()) => info!(path = %path.display(), "Deleted PMTiles writer file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e).at(path),
            }
        }
        Ok(())
    }

    fn load_checkpoint(&self) -> WriterResult<Option<WriterState>> {
        match fs::read(&self.checkpoint) {
            Ok(bytes) => Ok(Some(WriterState::from_bytes(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).at(&self.checkpoint),
        }
    }

    /// Write the checkpoint through a temp file and rename it into place.
    fn save_checkpoint(&self, state: &WriterState) -> WriterResult<()> {
        let bytes = state.to_bytes()?;
        let temp = self.checkpoint.with_extension("bin.tmp");

        let mut file = File::create(&temp).at(&temp)?;
        file.write_all(&bytes).at(&temp)?;
        file.sync_all().at(&temp)?;
        fs::rename(&temp, &self.checkpoint).at(&self.checkpoint)?;

        debug!(
            path = %self.checkpoint.display(),
            offset = state.offset,
            entries = state.tile_entries.len(),
            "Saved writer checkpoint"
        );
        Ok(())
    }

    /// Bring the payload store in line with the checkpoint's offset.
    fn reconcile_payload(&self, file: &File, offset: u64) -> WriterResult<()> {
        let actual = file.metadata().at(&self.payload)?.len();
        if actual > offset {
            warn!(
                path = %self.payload.display(),
                from = actual,
                to = offset,
                "Truncating payload store to checkpoint offset"
            );
            file.set_len(offset).at(&self.payload)?;
        } else if actual < offset {
            return Err(WriterError::CheckpointMismatch {
                path: self.payload.clone(),
                expected: offset,
                actual,
            });
        }
        Ok(())
    }
}

impl ArchiveWriter for PmtilesWriter {
    fn init(&mut self) -> WriterResult<()> {
        if self.force {
            info!("Force flag is active, removing PMTiles writer leftovers");
            self.remove_aux_files()?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.payload)
            .at(&self.payload)?;

        let state = match self.load_checkpoint()? {
            Some(state) => {
                info!(
                    payload = %self.payload.display(),
                    checkpoint = %self.checkpoint.display(),
                    offset = state.offset,
                    "Resuming from existing checkpoint"
                );
                state
            }
            None => {
                let state = WriterState::default();
                self.save_checkpoint(&state)?;
                state
            }
        };

        self.reconcile_payload(&file, state.offset)?;
        file.seek(SeekFrom::Start(state.offset)).at(&self.payload)?;
        self.writer = Some(Writer::with_state(BufWriter::new(file), state));
        Ok(())
    }

    fn prepare(&mut self) -> WriterResult<()> {
        self.writer()?;
        Ok(())
    }

    fn add_to_archive(&mut self, tile: Tile, data: &[u8]) -> WriterResult<()> {
        if !tile.is_valid() {
            return Err(WriterError::InvalidTile(tile));
        }
        let tile_id = zxy_to_tile_id(tile)?;
        self.writer_mut()?.write_tile(tile_id, data)?;
        Ok(())
    }

    fn commit(&mut self) -> WriterResult<()> {
        let payload = self.payload.clone();
        let writer = self.writer_mut()?;
        writer.get_mut().flush().at(&payload)?;
        writer.get_ref().get_ref().sync_all().at(&payload)?;
        let state = writer.state().clone();
        self.save_checkpoint(&state)
    }

    fn finalize(&mut self, metadata: &Map<String, Value>, header: &TilesetHeader) -> WriterResult<()> {
        if header.min_zoom > header.max_zoom {
            return Err(WriterError::InvalidHeader(format!(
                "min zoom {} exceeds max zoom {}",
                header.min_zoom, header.max_zoom
            )));
        }

        let mut writer = self.writer.take().ok_or(WriterError::NotInitialized)?;
        writer.get_mut().flush().at(&self.payload)?;

        let mut payload = BufReader::new(File::open(&self.payload).at(&self.payload)?);
        let mut out = BufWriter::new(File::create(&self.output).at(&self.output)?);
        let written = writer.finalize(
            &header.to_pmtiles_header(),
            &Value::Object(metadata.clone()),
            &mut payload,
            &mut out,
        )?;
        out.into_inner()
            .map_err(io::IntoInnerError::into_error)
            .at(&self.output)?
            .sync_all()
            .at(&self.output)?;
        drop(writer);

        info!(
            path = %self.output.display(),
            addressed = written.addressed_tiles_count,
            contents = written.tile_contents_count,
            "Finalized PMTiles archive"
        );
        self.remove_aux_files()
    }

    fn output_path(&self) -> &Path {
        &self.output
    }
}

//! Deduplicating PMTiles writer with resumable state.

use std::collections::{BTreeMap, HashMap};
use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::directory::{compress, serialize_directory, Entry};
use super::error::{CodecError, CodecResult};
use super::header::{Compression, Header, HEADER_LEN, ROOT_FETCH_LEN};

/// Version tag written into every exported [`WriterState`].
pub const STATE_FORMAT_VERSION: u32 = 1;

/// Entries per leaf directory on the first split attempt.
const INITIAL_LEAF_SIZE: usize = 4096;

/// Content digest used to detect repeated payloads.
pub type ContentHash = [u8; 32];

/// Everything needed to continue writing after a restart.
///
/// The payload bytes themselves live in the writer's sink; `offset` is the
/// number of payload bytes the state accounts for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterState {
    pub format_version: u32,
    pub tile_entries: Vec<Entry>,
    pub hash_to_offset: HashMap<ContentHash, u64>,
    pub offset: u64,
    pub addressed_tiles: u64,
    pub clustered: bool,
}

impl Default for WriterState {
    fn default() -> Self {
        Self {
            format_version: STATE_FORMAT_VERSION,
            tile_entries: Vec::new(),
            hash_to_offset: HashMap::new(),
            offset: 0,
            addressed_tiles: 0,
            clustered: true,
        }
    }
}

impl WriterState {
    /// Encode with bincode.
    pub fn to_bytes(&self) -> CodecResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| CodecError::State(e.to_string()))
    }

    /// Decode with bincode, rejecting states from other format versions.
    pub fn from_bytes(bytes: &[u8]) -> CodecResult<Self> {
        let state: Self =
            bincode::deserialize(bytes).map_err(|e| CodecError::State(e.to_string()))?;
        if state.format_version != STATE_FORMAT_VERSION {
            return Err(CodecError::State(format!(
                "unsupported checkpoint format version {}",
                state.format_version
            )));
        }
        Ok(state)
    }
}

/// Writes tile payloads to a sink and accumulates the directory index.
///
/// Identical payloads are stored once. Consecutive tile ids that resolve to
/// the same stored payload collapse into a single run-length entry.
pub struct Writer<W: Write> {
    payload: W,
    state: WriterState,
}

impl<W: Write> Writer<W> {
    /// Start an empty archive writing payloads into `payload`.
    pub fn new(payload: W) -> Self {
        Self::with_state(payload, WriterState::default())
    }

    /// Continue from a previously exported state.
    ///
    /// `payload` must be positioned at `state.offset`.
    pub fn with_state(payload: W, state: WriterState) -> Self {
        Self { payload, state }
    }

    pub fn state(&self) -> &WriterState {
        &self.state
    }

    /// Replace the accumulated state.
    pub fn set_state(&mut self, state: WriterState) {
        self.state = state;
    }

    pub fn get_ref(&self) -> &W {
        &self.payload
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.payload
    }

    pub fn into_inner(self) -> W {
        self.payload
    }

    /// Bytes of payload written so far.
    pub fn offset(&self) -> u64 {
        self.state.offset
    }

    /// Record one tile.
    pub fn write_tile(&mut self, tile_id: u64, data: &[u8]) -> CodecResult<()> {
        let state = &mut self.state;
        let length = u32::try_from(data.len()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "tile payload exceeds 4 GiB")
        })?;

        if let Some(last) = state.tile_entries.last() {
            if tile_id < last.end_tile_id() {
                state.clustered = false;
            }
        }

        let hash: ContentHash = Sha256::digest(data).into();
        match state.hash_to_offset.get(&hash).copied() {
            Some(found) => {
                let extends_run = state.tile_entries.last().is_some_and(|last| {
                    tile_id == last.end_tile_id() && last.offset == found
                });
                match state.tile_entries.last_mut() {
                    Some(last) if extends_run => last.run_length += 1,
                    _ => state.tile_entries.push(Entry {
                        tile_id,
                        offset: found,
                        length,
                        run_length: 1,
                    }),
                }
            }
            None => {
                self.payload.write_all(data)?;
                state.tile_entries.push(Entry {
                    tile_id,
                    offset: state.offset,
                    length,
                    run_length: 1,
                });
                state.hash_to_offset.insert(hash, state.offset);
                state.offset += u64::from(length);
            }
        }

        state.addressed_tiles += 1;
        Ok(())
    }

    /// Flush buffered payload bytes to the sink.
    pub fn flush(&mut self) -> CodecResult<()> {
        self.payload.flush()?;
        Ok(())
    }

    /// Assemble the final archive into `out`.
    ///
    /// `header` supplies zoom, bounds, center, tile compression and tile
    /// type; layout fields and counts are computed here. `payload` must
    /// yield exactly the bytes previously written to the sink.
    pub fn finalize<R: Read, O: Write>(
        &mut self,
        header: &Header,
        metadata: &Value,
        payload: &mut R,
        out: &mut O,
    ) -> CodecResult<Header> {
        self.flush()?;

        // in-order writes already produce sorted, maximal runs
        let entries = if self.state.clustered {
            self.state.tile_entries.clone()
        } else {
            normalize_entries(&self.state.tile_entries)
        };

        let (root, leaves) = build_directories(&entries, ROOT_FETCH_LEN - HEADER_LEN)?;
        let metadata_bytes = compress(&serde_json::to_vec(metadata)?, Compression::Gzip)?;

        let mut header = header.clone();
        header.clustered = payload_follows_tile_order(&entries);
        header.internal_compression = Compression::Gzip;
        header.root_offset = HEADER_LEN as u64;
        header.root_length = root.len() as u64;
        header.metadata_offset = header.root_offset + header.root_length;
        header.metadata_length = metadata_bytes.len() as u64;
        header.leaf_directory_offset = header.metadata_offset + header.metadata_length;
        header.leaf_directory_length = leaves.len() as u64;
        header.tile_data_offset = header.leaf_directory_offset + header.leaf_directory_length;
        header.tile_data_length = self.state.offset;
        header.addressed_tiles_count = entries.iter().map(|e| u64::from(e.run_length)).sum();
        header.tile_entries_count = entries.len() as u64;
        header.tile_contents_count = entries
            .iter()
            .map(|e| e.offset)
            .collect::<std::collections::HashSet<_>>()
            .len() as u64;

        out.write_all(&header.to_bytes())?;
        out.write_all(&root)?;
        out.write_all(&metadata_bytes)?;
        out.write_all(&leaves)?;

        let copied = io::copy(&mut payload.take(self.state.offset), out)?;
        if copied != self.state.offset {
            return Err(CodecError::Truncated {
                what: "tile data",
                expected: self.state.offset as usize,
                actual: copied as usize,
            });
        }
        out.flush()?;

        debug!(
            entries = header.tile_entries_count,
            contents = header.tile_contents_count,
            addressed = header.addressed_tiles_count,
            leaf_bytes = header.leaf_directory_length,
            clustered = header.clustered,
            "Finalized PMTiles archive"
        );
        Ok(header)
    }
}

/// Whether every payload is first referenced in tile id order, so the data
/// section reads front to back when walking the directory.
fn payload_follows_tile_order(entries: &[Entry]) -> bool {
    let mut next = 0u64;
    for entry in entries {
        if entry.offset == next {
            next += u64::from(entry.length);
        } else if entry.offset > next {
            return false;
        }
    }
    true
}

/// Sort entries by tile id, keeping only the first-written payload for any
/// tile id addressed more than once, and join neighbouring entries that
/// continue the same run.
///
/// The result depends only on which payload each tile id ends up with, not
/// on how the writes were split or repeated.
fn normalize_entries(entries: &[Entry]) -> Vec<Entry> {
    // disjoint half-open id ranges already claimed, keyed by start
    let mut claimed: BTreeMap<u64, u64> = BTreeMap::new();
    let mut out = Vec::with_capacity(entries.len());

    for entry in entries {
        let start = entry.tile_id;
        let end = entry.end_tile_id();

        let mut overlaps: Vec<(u64, u64)> = claimed
            .range(..end)
            .rev()
            .take_while(|&(_, &claimed_end)| claimed_end > start)
            .map(|(&s, &e)| (s, e))
            .collect();
        overlaps.reverse();

        let mut pieces = Vec::new();
        let mut cursor = start;
        for (s, e) in overlaps {
            if s > cursor {
                pieces.push((cursor, s));
            }
            cursor = cursor.max(e);
        }
        if cursor < end {
            pieces.push((cursor, end));
        }

        for (s, e) in pieces {
            claimed.insert(s, e);
            out.push(Entry {
                tile_id: s,
                offset: entry.offset,
                length: entry.length,
                run_length: (e - s) as u32,
            });
        }
    }

    out.sort_unstable_by_key(|e| e.tile_id);

    let mut joined: Vec<Entry> = Vec::with_capacity(out.len());
    for entry in out {
        match joined.last_mut() {
            Some(last)
                if last.end_tile_id() == entry.tile_id
                    && last.offset == entry.offset
                    && last.length == entry.length =>
            {
                last.run_length += entry.run_length;
            }
            _ => joined.push(entry),
        }
    }
    joined
}

/// Serialize the index, splitting into leaf directories when the root alone
/// would not fit in `target_root_len` bytes.
fn build_directories(entries: &[Entry], target_root_len: usize) -> CodecResult<(Vec<u8>, Vec<u8>)> {
    let root = serialize_directory(entries, Compression::Gzip)?;
    if root.len() <= target_root_len {
        return Ok((root, Vec::new()));
    }

    let mut leaf_size = INITIAL_LEAF_SIZE;
    loop {
        let (root, leaves) = build_leaves(entries, leaf_size)?;
        if root.len() <= target_root_len {
            debug!(leaf_size, leaf_bytes = leaves.len(), "Split directory into leaves");
            return Ok((root, leaves));
        }
        leaf_size += leaf_size / 5;
    }
}

fn build_leaves(entries: &[Entry], leaf_size: usize) -> CodecResult<(Vec<u8>, Vec<u8>)> {
    let mut root_entries = Vec::with_capacity(entries.len() / leaf_size + 1);
    let mut leaves = Vec::new();

    for chunk in entries.chunks(leaf_size) {
        let leaf = serialize_directory(chunk, Compression::Gzip)?;
        root_entries.push(Entry {
            tile_id: chunk[0].tile_id,
            offset: leaves.len() as u64,
            length: leaf.len() as u32,
            run_length: 0,
        });
        leaves.extend_from_slice(&leaf);
    }

    Ok((serialize_directory(&root_entries, Compression::Gzip)?, leaves))
}

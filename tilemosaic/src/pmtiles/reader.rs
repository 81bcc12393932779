//! Random-access PMTiles reader and index-level traversal.

use std::borrow::Cow;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::debug;

use super::directory::{decompress, deserialize_directory, find_entry, Entry};
use super::error::{CodecError, CodecResult};
use super::header::{Header, HEADER_LEN};
use super::tile_id::{tile_id_to_zxy, zxy_to_tile_id};
use crate::coord::Tile;

/// Root plus at most three levels of leaves.
const MAX_DIRECTORY_DEPTH: usize = 4;

/// Where one tile's payload lives inside the tile data section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileLocation {
    pub tile_id: u64,
    /// Offset relative to the tile data section.
    pub offset: u64,
    pub length: u32,
}

/// Reads a PMTiles archive from a local file.
///
/// The header and root directory are decoded once at open; leaf directories
/// and payloads are read on demand.
#[derive(Debug)]
pub struct Reader {
    path: PathBuf,
    file: Mutex<Option<File>>,
    header: Header,
    root: Vec<Entry>,
}

impl Reader {
    /// Open an archive and decode its header and root directory.
    pub fn open(path: impl AsRef<Path>) -> CodecResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;

        let mut head = vec![0u8; HEADER_LEN];
        let read = read_fully(&mut file, &mut head)?;
        if read < HEADER_LEN {
            return Err(CodecError::Truncated {
                what: "header",
                expected: HEADER_LEN,
                actual: read,
            });
        }
        let header = Header::from_bytes(&head)?;

        let mut reader = Self {
            path,
            file: Mutex::new(Some(file)),
            header,
            root: Vec::new(),
        };
        reader.root = reader.read_directory(reader.header.root_offset, reader.header.root_length)?;

        debug!(
            path = %reader.path.display(),
            root_entries = reader.root.len(),
            addressed_tiles = reader.header.addressed_tiles_count,
            "Opened PMTiles archive"
        );
        Ok(reader)
    }

    /// Path the archive was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The decoded archive header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Whether the root directory has no entries.
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Release the file handle. Later reads fail with [`CodecError::Closed`].
    pub fn close(&self) {
        if self.file.lock().take().is_some() {
            debug!(path = %self.path.display(), "Closed PMTiles archive");
        }
    }

    /// Read `length` bytes at an absolute file offset.
    pub fn get_bytes(&self, offset: u64, length: u64) -> CodecResult<Vec<u8>> {
        let mut buf = vec![0u8; length as usize];
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or(CodecError::Closed)?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read_directory(&self, offset: u64, length: u64) -> CodecResult<Vec<Entry>> {
        let bytes = self.get_bytes(offset, length)?;
        deserialize_directory(&bytes, self.header.internal_compression)
    }

    /// Decode the archive's JSON metadata object.
    ///
    /// Archives without metadata, or whose metadata is not a JSON object,
    /// yield an empty map.
    pub fn metadata(&self) -> CodecResult<Map<String, Value>> {
        if self.header.metadata_length == 0 {
            return Ok(Map::new());
        }
        let raw = self.get_bytes(self.header.metadata_offset, self.header.metadata_length)?;
        let json = decompress(&raw, self.header.internal_compression)?;
        match serde_json::from_slice::<Value>(&json)? {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        }
    }

    /// Resolve a tile id to its payload location without reading the payload.
    pub fn locate(&self, tile_id: u64) -> CodecResult<Option<TileLocation>> {
        let mut current: Cow<'_, [Entry]> = Cow::Borrowed(&self.root);

        for _ in 0..MAX_DIRECTORY_DEPTH {
            let entry = match find_entry(&current, tile_id) {
                Some(entry) => *entry,
                None => return Ok(None),
            };

            if !entry.is_leaf_pointer() {
                return Ok(Some(TileLocation {
                    tile_id,
                    offset: entry.offset,
                    length: entry.length,
                }));
            }

            let leaf_offset = self.header.leaf_directory_offset + entry.offset;
            current = Cow::Owned(self.read_directory(leaf_offset, u64::from(entry.length))?);
        }

        Err(CodecError::DirectoryTooDeep(MAX_DIRECTORY_DEPTH))
    }

    /// Read one tile's payload, or `None` when the archive lacks it.
    pub fn get_tile(&self, tile: Tile) -> CodecResult<Option<Vec<u8>>> {
        match self.locate(zxy_to_tile_id(tile)?)? {
            Some(location) => self.read_payload(&location).map(Some),
            None => Ok(None),
        }
    }

    /// Payload length of one tile, read from the index only.
    pub fn tile_size(&self, tile: Tile) -> CodecResult<Option<u64>> {
        Ok(self
            .locate(zxy_to_tile_id(tile)?)?
            .map(|location| u64::from(location.length)))
    }

    fn read_payload(&self, location: &TileLocation) -> CodecResult<Vec<u8>> {
        self.get_bytes(
            self.header.tile_data_offset + location.offset,
            u64::from(location.length),
        )
    }

    /// Walk the directory tree, yielding one location per addressed tile id.
    ///
    /// Only directory bytes are read. Runs are expanded into consecutive ids
    /// that share the run's payload location.
    pub fn walk(&self) -> DirectoryWalk<'_> {
        DirectoryWalk {
            reader: self,
            stack: vec![self.root.clone().into_iter()],
            run: None,
        }
    }

    /// Every tile with its payload length, from the index alone.
    pub fn tile_sizes(&self) -> impl Iterator<Item = CodecResult<(Tile, u64)>> + '_ {
        self.walk().map(|location| {
            let location = location?;
            Ok((tile_id_to_zxy(location.tile_id)?, u64::from(location.length)))
        })
    }

    /// Every tile with its payload bytes, in tile id order.
    pub fn tiles(&self) -> impl Iterator<Item = CodecResult<(Tile, Vec<u8>)>> + '_ {
        self.walk().map(move |location| {
            let location = location?;
            let tile = tile_id_to_zxy(location.tile_id)?;
            Ok((tile, self.read_payload(&location)?))
        })
    }
}

fn read_fully(file: &mut File, buf: &mut [u8]) -> CodecResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Lazy depth-first traversal of a PMTiles directory tree.
///
/// Leaf directories are decoded only when the walk reaches them, so dropping
/// the iterator early leaves nothing behind. Re-invoke [`Reader::walk`] to
/// start again.
pub struct DirectoryWalk<'a> {
    reader: &'a Reader,
    stack: Vec<std::vec::IntoIter<Entry>>,
    run: Option<(Entry, u32)>,
}

impl Iterator for DirectoryWalk<'_> {
    type Item = CodecResult<TileLocation>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((entry, step)) = self.run.as_mut() {
                if *step < entry.run_length {
                    let location = TileLocation {
                        tile_id: entry.tile_id + u64::from(*step),
                        offset: entry.offset,
                        length: entry.length,
                    };
                    *step += 1;
                    return Some(Ok(location));
                }
                self.run = None;
            }

            let next = self.stack.last_mut()?.next();
            match next {
                None => {
                    self.stack.pop();
                }
                Some(entry) if entry.is_leaf_pointer() => {
                    if self.stack.len() >= MAX_DIRECTORY_DEPTH {
                        self.stack.clear();
                        return Some(Err(CodecError::DirectoryTooDeep(MAX_DIRECTORY_DEPTH)));
                    }
                    let header = self.reader.header();
                    let offset = header.leaf_directory_offset + entry.offset;
                    match self.reader.read_directory(offset, u64::from(entry.length)) {
                        Ok(leaf) => self.stack.push(leaf.into_iter()),
                        Err(e) => {
                            self.stack.clear();
                            return Some(Err(e));
                        }
                    }
                }
                Some(entry) => self.run = Some((entry, 0)),
            }
        }
    }
}

//! The fixed 127-byte PMTiles v3 header.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{CodecError, CodecResult};

/// Size of the serialized header in bytes.
pub const HEADER_LEN: usize = 127;

/// Maximum size of the header plus root directory that clients fetch in one request.
pub const ROOT_FETCH_LEN: usize = 16_384;

const MAGIC: &[u8; 7] = b"PMTiles";
const SPEC_VERSION: u8 = 3;

/// Compression applied to directories, metadata, or tile payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Compression {
    #[default]
    Unknown,
    None,
    Gzip,
    Brotli,
    Zstd,
}

impl TryFrom<u8> for Compression {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::None),
            2 => Ok(Self::Gzip),
            3 => Ok(Self::Brotli),
            4 => Ok(Self::Zstd),
            _ => Err(CodecError::InvalidEnum {
                field: "compression",
                value,
            }),
        }
    }
}

impl From<Compression> for u8 {
    fn from(value: Compression) -> Self {
        match value {
            Compression::Unknown => 0,
            Compression::None => 1,
            Compression::Gzip => 2,
            Compression::Brotli => 3,
            Compression::Zstd => 4,
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Compression::Unknown => "unknown",
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Brotli => "brotli",
            Compression::Zstd => "zstd",
        };
        f.write_str(name)
    }
}

/// Kind of content stored in each tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum TileType {
    #[default]
    Unknown,
    Mvt,
    Png,
    Jpeg,
    Webp,
    Avif,
}

impl TryFrom<u8> for TileType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::Mvt),
            2 => Ok(Self::Png),
            3 => Ok(Self::Jpeg),
            4 => Ok(Self::Webp),
            5 => Ok(Self::Avif),
            _ => Err(CodecError::InvalidEnum {
                field: "tile type",
                value,
            }),
        }
    }
}

impl From<TileType> for u8 {
    fn from(value: TileType) -> Self {
        match value {
            TileType::Unknown => 0,
            TileType::Mvt => 1,
            TileType::Png => 2,
            TileType::Jpeg => 3,
            TileType::Webp => 4,
            TileType::Avif => 5,
        }
    }
}

/// Decoded PMTiles header.
///
/// Offsets are absolute file positions; leaf directory entry offsets are
/// relative to `leaf_directory_offset`, tile entry offsets to `tile_data_offset`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Header {
    pub root_offset: u64,
    pub root_length: u64,
    pub metadata_offset: u64,
    pub metadata_length: u64,
    pub leaf_directory_offset: u64,
    pub leaf_directory_length: u64,
    pub tile_data_offset: u64,
    pub tile_data_length: u64,
    pub addressed_tiles_count: u64,
    pub tile_entries_count: u64,
    pub tile_contents_count: u64,
    pub clustered: bool,
    pub internal_compression: Compression,
    pub tile_compression: Compression,
    pub tile_type: TileType,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub min_lon_e7: i32,
    pub min_lat_e7: i32,
    pub max_lon_e7: i32,
    pub max_lat_e7: i32,
    pub center_zoom: u8,
    pub center_lon_e7: i32,
    pub center_lat_e7: i32,
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

fn read_i32(buf: &[u8], at: usize) -> i32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    i32::from_le_bytes(bytes)
}

impl Header {
    /// Decode a header from the first [`HEADER_LEN`] bytes of an archive.
    pub fn from_bytes(buf: &[u8]) -> CodecResult<Self> {
        if buf.len() < HEADER_LEN {
            return Err(CodecError::Truncated {
                what: "header",
                expected: HEADER_LEN,
                actual: buf.len(),
            });
        }
        if &buf[0..7] != MAGIC {
            return Err(CodecError::BadMagic);
        }
        if buf[7] != SPEC_VERSION {
            return Err(CodecError::UnsupportedVersion(buf[7]));
        }

        Ok(Self {
            root_offset: read_u64(buf, 8),
            root_length: read_u64(buf, 16),
            metadata_offset: read_u64(buf, 24),
            metadata_length: read_u64(buf, 32),
            leaf_directory_offset: read_u64(buf, 40),
            leaf_directory_length: read_u64(buf, 48),
            tile_data_offset: read_u64(buf, 56),
            tile_data_length: read_u64(buf, 64),
            addressed_tiles_count: read_u64(buf, 72),
            tile_entries_count: read_u64(buf, 80),
            tile_contents_count: read_u64(buf, 88),
            clustered: buf[96] == 1,
            internal_compression: Compression::try_from(buf[97])?,
            tile_compression: Compression::try_from(buf[98])?,
            tile_type: TileType::try_from(buf[99])?,
            min_zoom: buf[100],
            max_zoom: buf[101],
            min_lon_e7: read_i32(buf, 102),
            min_lat_e7: read_i32(buf, 106),
            max_lon_e7: read_i32(buf, 110),
            max_lat_e7: read_i32(buf, 114),
            center_zoom: buf[118],
            center_lon_e7: read_i32(buf, 119),
            center_lat_e7: read_i32(buf, 123),
        })
    }

    /// Encode the header into its fixed binary layout.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..7].copy_from_slice(MAGIC);
        buf[7] = SPEC_VERSION;

        let words = [
            self.root_offset,
            self.root_length,
            self.metadata_offset,
            self.metadata_length,
            self.leaf_directory_offset,
            self.leaf_directory_length,
            self.tile_data_offset,
            self.tile_data_length,
            self.addressed_tiles_count,
            self.tile_entries_count,
            self.tile_contents_count,
        ];
        for (i, word) in words.iter().enumerate() {
            let at = 8 + i * 8;
            buf[at..at + 8].copy_from_slice(&word.to_le_bytes());
        }

        buf[96] = u8::from(self.clustered);
        buf[97] = self.internal_compression.into();
        buf[98] = self.tile_compression.into();
        buf[99] = self.tile_type.into();
        buf[100] = self.min_zoom;
        buf[101] = self.max_zoom;
        buf[102..106].copy_from_slice(&self.min_lon_e7.to_le_bytes());
        buf[106..110].copy_from_slice(&self.min_lat_e7.to_le_bytes());
        buf[110..114].copy_from_slice(&self.max_lon_e7.to_le_bytes());
        buf[114..118].copy_from_slice(&self.max_lat_e7.to_le_bytes());
        buf[118] = self.center_zoom;
        buf[119..123].copy_from_slice(&self.center_lon_e7.to_le_bytes());
        buf[123..127].copy_from_slice(&self.center_lat_e7.to_le_bytes());
        buf
    }
}

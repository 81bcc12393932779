//! Directory entries and their varint column encoding.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};

use super::error::{CodecError, CodecResult};
use super::header::Compression;

/// One row of a PMTiles directory.
///
/// A `run_length` of zero marks a pointer to a leaf directory; otherwise the
/// entry addresses `run_length` consecutive tile ids sharing one payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub tile_id: u64,
    pub offset: u64,
    pub length: u32,
    pub run_length: u32,
}

impl Entry {
    /// Whether this entry points at a leaf directory.
    #[inline]
    pub fn is_leaf_pointer(&self) -> bool {
        self.run_length == 0
    }

    /// One past the last tile id covered by this entry.
    #[inline]
    pub fn end_tile_id(&self) -> u64 {
        self.tile_id + u64::from(self.run_length)
    }
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

fn read_varint(buf: &[u8], pos: &mut usize) -> CodecResult<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *buf.get(*pos).ok_or(CodecError::BadVarint)?;
        *pos += 1;
        if shift >= 64 {
            return Err(CodecError::BadVarint);
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

/// Compress a buffer with one of the internal compression schemes.
pub fn compress(data: &[u8], compression: Compression) -> CodecResult<Vec<u8>> {
    match compression {
        Compression::None => Ok(data.to_vec()),
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
        other => Err(CodecError::UnsupportedCompression(other.to_string())),
    }
}

/// Decompress a buffer written with one of the internal compression schemes.
pub fn decompress(data: &[u8], compression: Compression) -> CodecResult<Vec<u8>> {
    match compression {
        Compression::None => Ok(data.to_vec()),
        Compression::Gzip => {
            let mut out = Vec::with_capacity(data.len() * 4);
            GzDecoder::new(data).read_to_end(&mut out)?;
            Ok(out)
        }
        other => Err(CodecError::UnsupportedCompression(other.to_string())),
    }
}

/// Serialize a sorted list of entries into a compressed directory.
pub fn serialize_directory(entries: &[Entry], compression: Compression) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(entries.len() * 6 + 8);
    write_varint(&mut buf, entries.len() as u64);

    let mut last_id = 0u64;
    for entry in entries {
        write_varint(&mut buf, entry.tile_id - last_id);
        last_id = entry.tile_id;
    }
    for entry in entries {
        write_varint(&mut buf, u64::from(entry.run_length));
    }
    for entry in entries {
        write_varint(&mut buf, u64::from(entry.length));
    }
    for (i, entry) in entries.iter().enumerate() {
        let contiguous =
            i > 0 && entry.offset == entries[i - 1].offset + u64::from(entries[i - 1].length);
        if contiguous {
            write_varint(&mut buf, 0);
        } else {
            write_varint(&mut buf, entry.offset + 1);
        }
    }

    compress(&buf, compression)
}

/// Decode a compressed directory into its entries.
pub fn deserialize_directory(data: &[u8], compression: Compression) -> CodecResult<Vec<Entry>> {
    let buf = decompress(data, compression)?;
    let mut pos = 0usize;

    let count = read_varint(&buf, &mut pos)? as usize;
    // every entry needs at least four bytes
    let remaining = buf.len() - pos;
    if count.saturating_mul(4) > remaining {
        return Err(CodecError::Truncated {
            what: "directory",
            expected: count.saturating_mul(4),
            actual: remaining,
        });
    }

    let mut entries = Vec::with_capacity(count);
    let mut last_id = 0u64;
    for _ in 0..count {
        last_id += read_varint(&buf, &mut pos)?;
        entries.push(Entry {
            tile_id: last_id,
            offset: 0,
            length: 0,
            run_length: 0,
        });
    }
    for entry in entries.iter_mut() {
        entry.run_length = read_varint(&buf, &mut pos)? as u32;
    }
    for entry in entries.iter_mut() {
        entry.length = read_varint(&buf, &mut pos)? as u32;
    }
    for i in 0..count {
        let raw = read_varint(&buf, &mut pos)?;
        entries[i].offset = if raw == 0 && i > 0 {
            entries[i - 1].offset + u64::from(entries[i - 1].length)
        } else {
            raw.saturating_sub(1)
        };
    }

    Ok(entries)
}

/// Locate the entry covering `tile_id` in a sorted directory.
///
/// Returns either a tile entry whose run contains the id, or the leaf
/// pointer whose subtree may contain it.
pub fn find_entry(entries: &[Entry], tile_id: u64) -> Option<&Entry> {
    let idx = entries.partition_point(|e| e.tile_id <= tile_id);
    let candidate = entries.get(idx.checked_sub(1)?)?;
    if candidate.tile_id == tile_id || candidate.is_leaf_pointer() {
        return Some(candidate);
    }
    (tile_id < candidate.end_tile_id()).then_some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(tile_id: u64, offset: u64, length: u32, run_length: u32) -> Entry {
        Entry {
            tile_id,
            offset,
            length,
            run_length,
        }
    }

    #[test]
    fn test_varint_multi_byte() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 300);
        assert_eq!(buf, vec![0xac, 0x02]);
        let mut pos = 0;
        assert_eq!(read_varint(&buf, &mut pos).unwrap(), 300);
        assert_eq!(pos, 2);
    }

    #[test]
    fn test_varint_truncated() {
        let mut pos = 0;
        assert!(matches!(
            read_varint(&[0x80, 0x80], &mut pos),
            Err(CodecError::BadVarint)
        ));
    }

    #[test]
    fn test_directory_preserves_gaps_and_contiguity() {
        let entries = vec![
            entry(0, 0, 10, 1),
            entry(1, 10, 5, 3),
            entry(9, 500, 7, 1),
            entry(12, 0, 10, 1),
        ];
        for compression in [Compression::None, Compression::Gzip] {
            let bytes = serialize_directory(&entries, compression).unwrap();
            assert_eq!(deserialize_directory(&bytes, compression).unwrap(), entries);
        }
    }

    #[test]
    fn test_contiguous_offsets_encode_as_zero() {
        let entries = vec![entry(0, 0, 10, 1), entry(1, 10, 5, 1)];
        let bytes = serialize_directory(&entries, Compression::None).unwrap();
        // count, 2 deltas, 2 run lengths, 2 lengths, then offsets 1 and 0
        assert_eq!(bytes, vec![2, 0, 1, 1, 1, 10, 5, 1, 0]);
    }

    #[test]
    fn test_unsupported_compression() {
        assert!(matches!(
            compress(b"x", Compression::Brotli),
            Err(CodecError::UnsupportedCompression(_))
        ));
    }

    #[test]
    fn test_find_entry_inside_run() {
        let entries = vec![entry(5, 0, 10, 1), entry(100, 10, 4, 3)];
        assert_eq!(find_entry(&entries, 101).unwrap().tile_id, 100);
        assert_eq!(find_entry(&entries, 102).unwrap().tile_id, 100);
        assert!(find_entry(&entries, 103).is_none());
        assert!(find_entry(&entries, 4).is_none());
        assert!(find_entry(&entries, 6).is_none());
    }

    #[test]
    fn test_find_entry_returns_leaf_pointer() {
        let entries = vec![entry(0, 0, 100, 0), entry(4096, 100, 80, 0)];
        assert_eq!(find_entry(&entries, 4000).unwrap().offset, 0);
        assert_eq!(find_entry(&entries, 5000).unwrap().offset, 100);
    }
}

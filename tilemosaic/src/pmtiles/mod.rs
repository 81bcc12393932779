//! PMTiles v3 codec.
//!
//! Covers the binary layout the merge pipeline needs: the fixed header,
//! gzip-compressed varint directories with leaf splitting, Hilbert tile ids,
//! a random-access [`Reader`], and a deduplicating [`Writer`] whose state can
//! be checkpointed and restored.

mod directory;
mod error;
mod header;
mod reader;
mod tile_id;
mod writer;

pub use directory::{compress, decompress, deserialize_directory, serialize_directory, Entry};
pub use error::{CodecError, CodecResult};
pub use header::{Compression, Header, TileType, HEADER_LEN, ROOT_FETCH_LEN};
pub use reader::{DirectoryWalk, Reader, TileLocation};
pub use tile_id::{tile_id_to_zxy, zxy_to_tile_id};
pub use writer::{ContentHash, Writer, WriterState, STATE_FORMAT_VERSION};

//! Tileset-level descriptions shared by sources, writers and the merge engine.
//!
//! [`Metadata`] is the filtered, typed view of an archive's metadata that
//! sources report. [`TilesetHeader`] is the aggregate summary (zoom range,
//! bounds, center, content kind) carried in mosaic manifests and handed to
//! archive writers at finalization.

mod header;
mod metadata;

pub use header::{format_degrees, TilesetHeader};
pub use metadata::{merge_metadata, Metadata, VectorLayer, RECOGNIZED_KEYS};

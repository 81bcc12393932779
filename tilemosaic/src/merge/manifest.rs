//! Mosaic manifest parsing.
//!
//! Two layouts exist. Version 0 has no `version` key; the document maps each
//! slice reference to that slice's `{header, metadata}`:
//!
//! ```json
//! { "../slices/0.pmtiles": { "header": {...}, "metadata": {...} }, ... }
//! ```
//!
//! Version 1 and later carry the aggregate header and metadata directly:
//!
//! ```json
//! { "version": 1, "header": {...}, "metadata": {...}, "slices": { "0.pmtiles": {...} } }
//! ```
//!
//! Slices are processed in the order their keys appear in the document.

use serde_json::{Map, Value};

use super::error::{MergeError, MergeResult};
use crate::tileset::TilesetHeader;

/// A parsed mosaic manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct MosaicManifest {
    version: u64,
    slice_keys: Vec<String>,
    metadata: Map<String, Value>,
    header: TilesetHeader,
}

impl MosaicManifest {
    /// Parse manifest text.
    pub fn from_json(text: &str) -> MergeResult<Self> {
        Self::from_value(serde_json::from_str(text)?)
    }

    /// Interpret a decoded manifest document.
    pub fn from_value(value: Value) -> MergeResult<Self> {
        let Value::Object(mut document) = value else {
            return Err(invalid("manifest is not a JSON object"));
        };

        let version = match document.get("version") {
            None => 0,
            Some(v) => v
                .as_u64()
                .ok_or_else(|| invalid(format!("version {} is not a non-negative integer", v)))?,
        };

        if version == 0 {
            document.remove("version");
            return Self::from_v0(document);
        }

        let slice_keys = match document.remove("slices") {
            None => Vec::new(),
            Some(Value::Object(slices)) => slices.into_iter().map(|(key, _)| key).collect(),
            Some(_) => return Err(invalid("'slices' is not an object")),
        };
        let metadata = match document.remove("metadata") {
            Some(Value::Object(metadata)) => metadata,
            _ => return Err(invalid("'metadata' object is missing")),
        };
        let header = match document.remove("header") {
            Some(header) => serde_json::from_value(header)
                .map_err(|e| invalid(format!("bad 'header': {}", e)))?,
            None => return Err(invalid("'header' object is missing")),
        };

        Ok(Self {
            version,
            slice_keys,
            metadata,
            header,
        })
    }

    /// Headers folded across slices, metadata from the first slice.
    fn from_v0(document: Map<String, Value>) -> MergeResult<Self> {
        let mut slice_keys = Vec::with_capacity(document.len());
        let mut metadata = None;
        let mut header: Option<TilesetHeader> = None;

        for (key, slice) in document {
            let slice_header: TilesetHeader = serde_json::from_value(
                slice.get("header").cloned().unwrap_or(Value::Null),
            )
            .map_err(|e| invalid(format!("slice {}: bad 'header': {}", key, e)))?;

            if metadata.is_none() {
                metadata = Some(match slice.get("metadata") {
                    Some(Value::Object(m)) => m.clone(),
                    _ => return Err(invalid(format!("slice {}: 'metadata' object is missing", key))),
                });
            }

            header = Some(match header {
                None => slice_header,
                Some(folded) => fold_header(folded, &slice_header),
            });
            slice_keys.push(key);
        }

        let (Some(metadata), Some(header)) = (metadata, header) else {
            return Err(invalid("manifest lists no slices"));
        };

        let header = TilesetHeader {
            center_zoom: None,
            center_lon_e7: None,
            center_lat_e7: None,
            ..header
        }
        .with_derived_center();

        Ok(Self {
            version: 0,
            slice_keys,
            metadata,
            header,
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Slice keys in document order.
    pub fn slice_keys(&self) -> &[String] {
        &self.slice_keys
    }

    /// Metadata for the output archive.
    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Header for the output archive.
    pub fn header(&self) -> &TilesetHeader {
        &self.header
    }

    /// Relative reference of a slice.
    ///
    /// Version 0 keys are written relative to a sibling directory, so a
    /// leading `../` is dropped; later versions use keys as they are.
    pub fn slice_ref<'a>(&self, key: &'a str) -> &'a str {
        if self.version == 0 {
            key.strip_prefix("../").unwrap_or(key)
        } else {
            key
        }
    }
}

/// Widen zoom range and bounds; content kind follows the later slice.
fn fold_header(acc: TilesetHeader, next: &TilesetHeader) -> TilesetHeader {
    TilesetHeader {
        min_zoom: acc.min_zoom.min(next.min_zoom),
        max_zoom: acc.max_zoom.max(next.max_zoom),
        min_lon_e7: acc.min_lon_e7.min(next.min_lon_e7),
        min_lat_e7: acc.min_lat_e7.min(next.min_lat_e7),
        max_lon_e7: acc.max_lon_e7.max(next.max_lon_e7),
        max_lat_e7: acc.max_lat_e7.max(next.max_lat_e7),
        tile_compression: next.tile_compression,
        tile_type: next.tile_type,
        ..acc
    }
}

fn invalid(reason: impl Into<String>) -> MergeError {
    MergeError::InvalidManifest(reason.into())
}

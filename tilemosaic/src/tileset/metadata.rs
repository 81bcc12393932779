//! Recognized tileset metadata and the vector-layer merge.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Metadata keys that sources report; everything else is dropped.
pub const RECOGNIZED_KEYS: [&str; 7] = [
    "type",
    "format",
    "attribution",
    "description",
    "name",
    "version",
    "vector_layers",
];

/// One entry of the `vector_layers` metadata list.
///
/// Fields other than `id`, `minzoom` and `maxzoom` (such as `fields` or
/// `description`) are kept verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorLayer {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minzoom: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxzoom: Option<u8>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl VectorLayer {
    /// Create a layer with a zoom range and no extra fields.
    pub fn new(id: impl Into<String>, minzoom: u8, maxzoom: u8) -> Self {
        Self {
            id: id.into(),
            minzoom: Some(minzoom),
            maxzoom: Some(maxzoom),
            extra: Map::new(),
        }
    }

    /// Widen this layer's zoom range to include `other`'s.
    fn widen(&mut self, other: &VectorLayer) {
        self.minzoom = fold_option(self.minzoom, other.minzoom, u8::min);
        self.maxzoom = fold_option(self.maxzoom, other.maxzoom, u8::max);
    }
}

fn fold_option(a: Option<u8>, b: Option<u8>, pick: fn(u8, u8) -> u8) -> Option<u8> {
    match (a, b) {
        (Some(x), Some(y)) => Some(pick(x, y)),
        (x, y) => x.or(y),
    }
}

/// Tileset metadata restricted to the recognized keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribution: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_layers: Option<Vec<VectorLayer>>,
}

impl Metadata {
    /// Build from an arbitrary JSON object, keeping only recognized keys.
    ///
    /// Non-string scalars are stringified. `vector_layers` may be a JSON
    /// array or a string holding one; an unparsable value is dropped.
    ///
    /// ```
    /// use serde_json::json;
    /// use tilemosaic::tileset::Metadata;
    ///
    /// let raw = json!({"name": "roads", "version": 2, "generator": "x"});
    /// let metadata = Metadata::from_json_map(raw.as_object().unwrap());
    ///
    /// assert_eq!(metadata.name.as_deref(), Some("roads"));
    /// assert_eq!(metadata.version.as_deref(), Some("2"));
    /// ```
    pub fn from_json_map(map: &Map<String, Value>) -> Self {
        let text = |key: &str| map.get(key).and_then(scalar_text);

        Self {
            kind: text("type"),
            format: text("format"),
            attribution: text("attribution"),
            description: text("description"),
            name: text("name"),
            version: text("version"),
            vector_layers: map.get("vector_layers").and_then(parse_vector_layers),
        }
    }

    /// Whether no recognized key is present.
    pub fn is_empty(&self) -> bool {
        self.kind.is_none()
            && self.format.is_none()
            && self.attribution.is_none()
            && self.description.is_none()
            && self.name.is_none()
            && self.version.is_none()
            && self.vector_layers.is_none()
    }

    /// Render as a JSON object.
    pub fn to_json_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Layers from a JSON array, or a string holding one; malformed entries are
/// skipped individually.
fn parse_vector_layers(value: &Value) -> Option<Vec<VectorLayer>> {
    let decoded;
    let value = match value {
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(v) => {
                decoded = v;
                &decoded
            }
            Err(e) => {
                warn!(error = %e, "Ignoring unparsable vector_layers");
                return None;
            }
        },
        other => other,
    };

    let Value::Array(items) = value else {
        warn!("Ignoring vector_layers that is not a list");
        return None;
    };

    let layers = items
        .iter()
        .filter_map(|item| match VectorLayer::deserialize(item) {
            Ok(layer) => Some(layer),
            Err(e) => {
                warn!(error = %e, layer = %item, "Skipping malformed vector layer");
                None
            }
        })
        .collect();
    Some(layers)
}

/// Merge metadata in priority order.
///
/// Each scalar key comes from the first item that has it. `vector_layers`
/// are unioned by `id`: the first occurrence keeps its position and extra
/// fields, and its zoom range widens to cover every later occurrence.
pub fn merge_metadata<I>(items: I) -> Metadata
where
    I: IntoIterator<Item = Metadata>,
{
    let mut merged = Metadata::default();
    let mut layers: Option<Vec<VectorLayer>> = None;

    for item in items {
        fill(&mut merged.kind, item.kind);
        fill(&mut merged.format, item.format);
        fill(&mut merged.attribution, item.attribution);
        fill(&mut merged.description, item.description);
        fill(&mut merged.name, item.name);
        fill(&mut merged.version, item.version);

        if let Some(item_layers) = item.vector_layers {
            let layers = layers.get_or_insert_with(Vec::new);
            for layer in item_layers {
                match layers.iter_mut().find(|existing| existing.id == layer.id) {
                    Some(existing) => existing.widen(&layer),
                    None => layers.push(layer),
                }
            }
        }
    }

    merged.vector_layers = layers.filter(|layers| !layers.is_empty());
    merged
}

fn fill(slot: &mut Option<String>, value: Option<String>) {
    if slot.is_none() {
        *slot = value;
    }
}

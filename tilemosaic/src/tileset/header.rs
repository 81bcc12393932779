//! Aggregate tileset header.

use serde::{Deserialize, Serialize};

use crate::pmtiles::{Compression, Header, TileType};

const E7: f64 = 10_000_000.0;

/// Zoom range, bounds, center and content kind of a whole tileset.
///
/// Coordinates are fixed-point degrees scaled by 1e7. Field names follow the
/// PMTiles header so a manifest's `header` object deserializes directly;
/// unrelated header fields in the JSON are ignored. Center fields are
/// optional and derived from the bounds when absent.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TilesetHeader {
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub min_lon_e7: i32,
    pub min_lat_e7: i32,
    pub max_lon_e7: i32,
    pub max_lat_e7: i32,

    #[serde(default)]
    pub tile_compression: Compression,

    #[serde(default)]
    pub tile_type: TileType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center_zoom: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center_lon_e7: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center_lat_e7: Option<i32>,
}

impl TilesetHeader {
    /// Center as `(lon_e7, lat_e7, zoom)`, using integer midpoints for any
    /// component not set explicitly.
    pub fn center(&self) -> (i32, i32, u8) {
        let mid = |a: i32, b: i32| ((i64::from(a) + i64::from(b)).div_euclid(2)) as i32;
        (
            self.center_lon_e7
                .unwrap_or_else(|| mid(self.min_lon_e7, self.max_lon_e7)),
            self.center_lat_e7
                .unwrap_or_else(|| mid(self.min_lat_e7, self.max_lat_e7)),
            self.center_zoom
                .unwrap_or(((u16::from(self.min_zoom) + u16::from(self.max_zoom)) / 2) as u8),
        )
    }

    /// Fill unset center components from the bounds and zoom range.
    pub fn with_derived_center(mut self) -> Self {
        let (lon, lat, zoom) = self.center();
        self.center_lon_e7 = Some(lon);
        self.center_lat_e7 = Some(lat);
        self.center_zoom = Some(zoom);
        self
    }

    /// `minlon,minlat,maxlon,maxlat` in degrees.
    ///
    /// ```
    /// use tilemosaic::tileset::TilesetHeader;
    ///
    /// let header = TilesetHeader {
    ///     min_lon_e7: -1_800_000_000,
    ///     min_lat_e7: -855_000_000,
    ///     max_lon_e7: 1_800_000_000,
    ///     max_lat_e7: 855_000_000,
    ///     ..TilesetHeader::default()
    /// };
    /// assert_eq!(header.bounds_string(), "-180.0,-85.5,180.0,85.5");
    /// ```
    pub fn bounds_string(&self) -> String {
        format!(
            "{},{},{},{}",
            format_degrees(self.min_lon_e7),
            format_degrees(self.min_lat_e7),
            format_degrees(self.max_lon_e7),
            format_degrees(self.max_lat_e7)
        )
    }

    /// `lon,lat,zoom` with degrees for the coordinates.
    pub fn center_string(&self) -> String {
        let (lon, lat, zoom) = self.center();
        format!("{},{},{}", format_degrees(lon), format_degrees(lat), zoom)
    }

    /// A PMTiles header carrying this summary; layout fields stay zero.
    pub fn to_pmtiles_header(&self) -> Header {
        let (center_lon_e7, center_lat_e7, center_zoom) = self.center();
        Header {
            tile_compression: self.tile_compression,
            tile_type: self.tile_type,
            min_zoom: self.min_zoom,
            max_zoom: self.max_zoom,
            min_lon_e7: self.min_lon_e7,
            min_lat_e7: self.min_lat_e7,
            max_lon_e7: self.max_lon_e7,
            max_lat_e7: self.max_lat_e7,
            center_zoom,
            center_lon_e7,
            center_lat_e7,
            ..Header::default()
        }
    }
}

impl From<&Header> for TilesetHeader {
    fn from(header: &Header) -> Self {
        Self {
            min_zoom: header.min_zoom,
            max_zoom: header.max_zoom,
            min_lon_e7: header.min_lon_e7,
            min_lat_e7: header.min_lat_e7,
            max_lon_e7: header.max_lon_e7,
            max_lat_e7: header.max_lat_e7,
            tile_compression: header.tile_compression,
            tile_type: header.tile_type,
            center_zoom: Some(header.center_zoom),
            center_lon_e7: Some(header.center_lon_e7),
            center_lat_e7: Some(header.center_lat_e7),
        }
    }
}

/// Degrees from a 1e7 fixed-point value.
///
/// Whole numbers keep one decimal (`12.0`), magnitudes below 1e-4 use a
/// two-digit exponent (`1.5e-06`), everything else is the shortest decimal.
pub fn format_degrees(e7: i32) -> String {
    let degrees = f64::from(e7) / E7;
    if degrees.fract() == 0.0 {
        return format!("{:.1}", degrees);
    }
    if degrees.abs() >= 1e-4 {
        return degrees.to_string();
    }

    let text = format!("{:e}", degrees);
    match text.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_defaults_to_midpoints() {
        let header = TilesetHeader {
            min_zoom: 3,
            max_zoom: 10,
            min_lon_e7: -10,
            max_lon_e7: 5,
            min_lat_e7: 20,
            max_lat_e7: 40,
            ..TilesetHeader::default()
        };
        assert_eq!(header.center(), (-3, 30, 6));
    }

    #[test]
    fn test_explicit_center_wins() {
        let header = TilesetHeader {
            center_zoom: Some(12),
            ..TilesetHeader::default()
        };
        assert_eq!(header.center().2, 12);
        assert_eq!(header.with_derived_center().center_lat_e7, Some(0));
    }

    #[test]
    fn test_manifest_header_json_ignores_layout_fields() {
        let json = r#"{
            "root_offset": 127, "clustered": true,
            "min_zoom": 0, "max_zoom": 14,
            "min_lon_e7": -1, "min_lat_e7": -2, "max_lon_e7": 3, "max_lat_e7": 4,
            "tile_compression": 2, "tile_type": 1
        }"#;
        let header: TilesetHeader = serde_json::from_str(json).unwrap();
        assert_eq!(header.max_zoom, 14);
        assert_eq!(header.tile_compression, Compression::Gzip);
        assert_eq!(header.tile_type, TileType::Mvt);
        assert_eq!(header.center_zoom, None);
    }

    #[test]
    fn test_format_degrees() {
        assert_eq!(format_degrees(1_800_000_000), "180.0");
        assert_eq!(format_degrees(-850_511_287), "-85.0511287");
        assert_eq!(format_degrees(1_000), "0.0001");
        assert_eq!(format_degrees(999), "9.99e-05");
        assert_eq!(format_degrees(-15), "-1.5e-06");
        assert_eq!(format_degrees(1), "1e-07");
        assert_eq!(format_degrees(0), "0.0");
    }

    #[test]
    fn test_center_string() {
        let header = TilesetHeader {
            max_zoom: 4,
            min_lon_e7: 100_000_000,
            max_lon_e7: 300_000_000,
            min_lat_e7: 0,
            max_lat_e7: 15_000_000,
            ..TilesetHeader::default()
        };
        assert_eq!(header.center_string(), "20.0,0.75,2");
    }

    #[test]
    fn test_pmtiles_header_round_trip_keeps_summary() {
        let header = TilesetHeader {
            min_zoom: 1,
            max_zoom: 9,
            tile_type: TileType::Webp,
            ..TilesetHeader::default()
        }
        .with_derived_center();
        assert_eq!(TilesetHeader::from(&header.to_pmtiles_header()), header);
    }
}

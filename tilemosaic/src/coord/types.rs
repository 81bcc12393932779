//! Tile coordinate type definitions

use std::fmt;

use serde::{Deserialize, Serialize};

/// Highest zoom level addressable by a PMTiles tile id.
pub const MAX_ZOOM: u8 = 31;

/// A tile address in XYZ (slippy map) convention.
///
/// The origin is the top-left corner of the world and `y` grows southwards.
/// Archives that store rows in TMS order convert at their own boundary, see
/// [`super::xyz_to_tms_row`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tile {
    /// Zoom level
    pub z: u8,
    /// Column, 0 at the antimeridian (west)
    pub x: u32,
    /// Row, 0 at the north edge
    pub y: u32,
}

impl Tile {
    /// Create a tile address.
    #[inline]
    pub const fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }

    /// Number of tiles along one axis at this tile's zoom level.
    #[inline]
    pub fn axis_len(&self) -> u64 {
        1u64 << self.z
    }

    /// Whether `x` and `y` fall inside the grid for the zoom level.
    pub fn is_valid(&self) -> bool {
        self.z <= MAX_ZOOM && u64::from(self.x) < self.axis_len() && u64::from(self.y) < self.axis_len()
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

impl From<(u8, u32, u32)> for Tile {
    fn from((z, x, y): (u8, u32, u32)) -> Self {
        Self::new(z, x, y)
    }
}

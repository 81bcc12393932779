//! Hilbert-curve tile ids.
//!
//! PMTiles addresses tiles by a single integer: all tiles of lower zoom
//! levels come first, and tiles within a zoom level follow a Hilbert curve.

use super::error::{CodecError, CodecResult};
use crate::coord::{Tile, MAX_ZOOM};

/// Number of tile ids used by every zoom level strictly below `z`.
#[inline]
fn zoom_base(z: u8) -> u64 {
    // sum of 4^i for i in 0..z
    ((1u64 << (2 * u32::from(z))) - 1) / 3
}

fn rotate(n: u64, x: &mut u64, y: &mut u64, rx: u64, ry: u64) {
    if ry == 0 {
        if rx == 1 {
            *x = n - 1 - *x;
            *y = n - 1 - *y;
        }
        std::mem::swap(x, y);
    }
}

/// Converts a tile address to its PMTiles tile id.
pub fn zxy_to_tile_id(tile: Tile) -> CodecResult<u64> {
    if !tile.is_valid() {
        return Err(CodecError::InvalidTile {
            z: tile.z,
            x: tile.x,
            y: tile.y,
        });
    }

    let n = 1u64 << tile.z;
    let mut x = u64::from(tile.x);
    let mut y = u64::from(tile.y);
    let mut d = 0u64;
    let mut s = n / 2;
    while s > 0 {
        let rx = u64::from((x & s) > 0);
        let ry = u64::from((y & s) > 0);
        d += s * s * ((3 * rx) ^ ry);
        rotate(n, &mut x, &mut y, rx, ry);
        s /= 2;
    }

    Ok(zoom_base(tile.z) + d)
}

/// Converts a PMTiles tile id back to a tile address.
pub fn tile_id_to_zxy(tile_id: u64) -> CodecResult<Tile> {
    let mut z = 0u8;
    loop {
        if z > MAX_ZOOM {
            return Err(CodecError::TileIdOutOfRange(tile_id));
        }
        let base = zoom_base(z);
        let count = 1u64 << (2 * u32::from(z));
        if tile_id < base + count {
            return Ok(position_on_level(z, tile_id - base));
        }
        z += 1;
    }
}

fn position_on_level(z: u8, pos: u64) -> Tile {
    let n = 1u64 << z;
    let mut t = pos;
    let mut x = 0u64;
    let mut y = 0u64;
    let mut s = 1u64;
    while s < n {
        let rx = 1 & (t / 2);
        let ry = 1 & (t ^ rx);
        rotate(s, &mut x, &mut y, rx, ry);
        x += s * rx;
        y += s * ry;
        t /= 4;
        s *= 2;
    }
    Tile::new(z, x as u32, y as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_zoom_zero_is_id_zero() {
        assert_eq!(zxy_to_tile_id(Tile::new(0, 0, 0)).unwrap(), 0);
        assert_eq!(tile_id_to_zxy(0).unwrap(), Tile::new(0, 0, 0));
    }

    #[test]
    fn test_zoom_one_follows_hilbert_order() {
        assert_eq!(zxy_to_tile_id(Tile::new(1, 0, 0)).unwrap(), 1);
        assert_eq!(zxy_to_tile_id(Tile::new(1, 0, 1)).unwrap(), 2);
        assert_eq!(zxy_to_tile_id(Tile::new(1, 1, 1)).unwrap(), 3);
        assert_eq!(zxy_to_tile_id(Tile::new(1, 1, 0)).unwrap(), 4);
    }

    #[test]
    fn test_first_id_of_each_zoom() {
        assert_eq!(zxy_to_tile_id(Tile::new(2, 0, 0)).unwrap(), 5);
        assert_eq!(zxy_to_tile_id(Tile::new(3, 0, 0)).unwrap(), 21);
        assert_eq!(tile_id_to_zxy(21).unwrap().z, 3);
        assert_eq!(tile_id_to_zxy(20).unwrap().z, 2);
    }

    #[test]
    fn test_rejects_out_of_grid_tile() {
        assert!(matches!(
            zxy_to_tile_id(Tile::new(1, 2, 0)),
            Err(CodecError::InvalidTile { .. })
        ));
    }

    #[test]
    fn test_rejects_id_beyond_max_zoom() {
        assert!(matches!(
            tile_id_to_zxy(u64::MAX),
            Err(CodecError::TileIdOutOfRange(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_tile_id_is_bijective(z in 0u8..=20, a in any::<u32>(), b in any::<u32>()) {
            let n = 1u64 << z;
            let tile = Tile::new(z, (u64::from(a) % n) as u32, (u64::from(b) % n) as u32);
            let id = zxy_to_tile_id(tile).unwrap();
            prop_assert_eq!(tile_id_to_zxy(id).unwrap(), tile);
        }
    }
}

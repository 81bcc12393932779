//! Tile coordinate module
//!
//! Provides the [`Tile`] address used across every source and writer, plus the
//! conversion between XYZ rows and the TMS rows stored by MBTiles archives.

mod types;

pub use types::{Tile, MAX_ZOOM};

/// Converts an XYZ row to the TMS row convention (origin bottom-left).
///
/// The conversion is its own inverse, so the same formula maps stored TMS
/// rows back to XYZ.
///
/// # Example
///
/// ```
/// use tilemosaic::coord::xyz_to_tms_row;
///
/// assert_eq!(xyz_to_tms_row(1, 0), 1);
/// assert_eq!(xyz_to_tms_row(3, 5), 2);
/// ```
#[inline]
pub fn xyz_to_tms_row(zoom: u8, y: u32) -> u32 {
    let max_row = (1u64 << zoom) - 1;
    (max_row - u64::from(y)) as u32
}

/// Converts a stored TMS row back to an XYZ row.
#[inline]
pub fn tms_to_xyz_row(zoom: u8, row: u32) -> u32 {
    xyz_to_tms_row(zoom, row)
}

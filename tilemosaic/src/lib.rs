//! Tilemosaic - consolidate partial tile archives into one
//!
//! A mosaic manifest lists many PMTiles slices. This library merges them
//! into a single MBTiles or PMTiles archive, surviving crashes and network
//! failures without redoing finished work.
//!
//! # Modules
//!
//! - [`coord`]: tile addresses and TMS row conversion
//! - [`pmtiles`]: PMTiles v3 codec (header, directories, reader, deduplicating writer)
//! - [`tileset`]: aggregate header and recognized metadata
//! - [`source`]: uniform read access to disk trees, MBTiles, PMTiles and stacks of them
//! - [`writer`]: output archive writers
//! - [`download`]: resumable HTTP downloads
//! - [`merge`]: the resumable merge engine
//! - [`logging`]: subscriber setup for binaries

pub mod coord;
pub mod download;
pub mod logging;
pub mod merge;
pub mod pmtiles;
pub mod source;
pub mod tileset;
pub mod writer;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

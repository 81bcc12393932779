//! Layered source with first-match-wins reads.

use std::collections::HashSet;

use tracing::{debug, warn};

use super::error::{SourceError, SourceResult};
use super::{TileArchive, TileIter, TileSource};
use crate::coord::Tile;
use crate::tileset::{merge_metadata, Metadata};

/// An ordered stack of sources; earlier sources take precedence.
///
/// Point lookups return the first source's hit. Enumerations walk the
/// sources in order and yield each tile at most once. Errors from an
/// individual source during lookups and folds count as that source having
/// nothing to offer.
#[derive(Debug)]
pub struct StackedSource {
    sources: Vec<TileArchive>,
}

impl StackedSource {
    pub fn new(sources: Vec<TileArchive>) -> Self {
        Self { sources }
    }

    pub fn sources(&self) -> &[TileArchive] {
        &self.sources
    }

    /// First successful lookup across the stack.
    ///
    /// Misses fall through silently. When no source succeeds, the first
    /// non-miss error is returned; if every source missed, `MissingTile`.
    fn first_hit<T>(
        &self,
        tile: Tile,
        lookup: impl Fn(&TileArchive) -> SourceResult<T>,
    ) -> SourceResult<T> {
        let mut failure = None;
        for (index, source) in self.sources.iter().enumerate() {
            match lookup(source) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_missing_tile() => continue,
                Err(e) => {
                    warn!(source = index, tile = %tile, error = %e, "Source failed during lookup");
                    failure.get_or_insert(e);
                }
            }
        }
        Err(failure.unwrap_or(SourceError::MissingTile(tile)))
    }

    /// Chain per-source enumerations, dropping tiles already yielded.
    fn unique<'a, T: 'a>(
        &'a self,
        label: &'static str,
        per_source: impl Fn(&'a TileArchive) -> TileIter<'a, T> + 'a,
    ) -> TileIter<'a, T> {
        let mut seen = HashSet::new();
        Box::new(
            self.sources
                .iter()
                .enumerate()
                .flat_map(move |(index, source)| {
                    debug!(source = index, scope = label, "Iterating over source");
                    per_source(source)
                })
                .filter(move |item| match item {
                    Ok((tile, _)) => seen.insert(*tile),
                    Err(_) => true,
                }),
        )
    }

    fn fold_zoom(
        &self,
        zoom: impl Fn(&TileArchive) -> SourceResult<u8>,
        pick: fn(u8, u8) -> u8,
    ) -> SourceResult<u8> {
        let mut result: Option<u8> = None;
        for (index, source) in self.sources.iter().enumerate() {
            match zoom(source) {
                Ok(z) => result = Some(result.map_or(z, |current| pick(current, z))),
                Err(SourceError::NoZoomInfo) => {
                    debug!(source = index, "Source has no zoom information");
                }
                Err(e) => {
                    warn!(source = index, error = %e, "Source failed to report zoom");
                }
            }
        }
        result.ok_or(SourceError::NoZoomInfo)
    }
}

impl TileSource for StackedSource {
    fn get_tile_data(&self, tile: Tile) -> SourceResult<Vec<u8>> {
        self.first_hit(tile, |source| source.get_tile_data(tile))
    }

    fn get_tile_size(&self, tile: Tile) -> SourceResult<u64> {
        self.first_hit(tile, |source| source.get_tile_size(tile))
    }

    fn enumerate_zoom(&self, zoom: u8) -> TileIter<'_, u64> {
        self.unique("zoom", move |source| source.enumerate_zoom(zoom))
    }

    fn enumerate_all(&self) -> TileIter<'_, Vec<u8>> {
        self.unique("all", |source| source.enumerate_all())
    }

    fn enumerate_all_sizes(&self) -> TileIter<'_, u64> {
        self.unique("all sizes", |source| source.enumerate_all_sizes())
    }

    fn min_zoom(&self) -> SourceResult<u8> {
        self.fold_zoom(|source| source.min_zoom(), u8::min)
    }

    fn max_zoom(&self) -> SourceResult<u8> {
        self.fold_zoom(|source| source.max_zoom(), u8::max)
    }

    fn get_metadata(&self) -> SourceResult<Metadata> {
        let mut collected = Vec::with_capacity(self.sources.len());
        for (index, source) in self.sources.iter().enumerate() {
            match source.get_metadata() {
                Ok(metadata) => collected.push(metadata),
                Err(e) => {
                    warn!(source = index, error = %e, "Source failed to report metadata");
                    collected.push(Metadata::default());
                }
            }
        }

        if collected.iter().all(Metadata::is_empty) {
            return Err(SourceError::NoMetadata);
        }
        Ok(merge_metadata(collected))
    }

    fn cleanup(&self) {
        for source in &self.sources {
            source.cleanup();
        }
    }
}

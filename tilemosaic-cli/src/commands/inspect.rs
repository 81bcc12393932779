//! `inspect`: summarize one or more tile sources.

use std::collections::BTreeMap;

use clap::Args;
use tilemosaic::source::{open_sources, SourceError, SourceResult, TileSource};

use crate::error::CliError;

/// Arguments of the `inspect` command.
#[derive(Debug, Args)]
pub struct InspectArgs {
    /// .mbtiles files, .pmtiles glob patterns or tile directories; several
    /// inputs are stacked with the first taking precedence
    #[arg(required = true)]
    pub inputs: Vec<String>,
}

/// Tile count and payload bytes of one zoom level.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ZoomStats {
    pub tiles: u64,
    pub bytes: u64,
}

/// Run the inspect command.
pub fn run(args: InspectArgs) -> Result<(), CliError> {
    let source = open_sources(&args.inputs)?;
    println!("Source: {} ({})", args.inputs.join(", "), source.kind());

    println!(
        "Zoom:   {}..={}",
        describe_zoom(source.min_zoom())?,
        describe_zoom(source.max_zoom())?
    );

    match source.get_metadata() {
        Ok(metadata) => {
            println!("Metadata:");
            for (key, value) in metadata.to_json_map() {
                match value.as_str() {
                    Some(text) => println!("  {}: {}", key, text),
                    None => println!("  {}: {}", key, value),
                }
            }
        }
        Err(SourceError::NoMetadata) => println!("Metadata: none"),
        Err(e) => return Err(e.into()),
    }

    let stats = zoom_stats(&source)?;
    println!("Tiles:");
    for (zoom, s) in &stats {
        println!("  z{:<2} {:>10} tiles {:>14} bytes", zoom, s.tiles, s.bytes);
    }
    let total = stats.values().fold(ZoomStats::default(), |acc, s| ZoomStats {
        tiles: acc.tiles + s.tiles,
        bytes: acc.bytes + s.bytes,
    });
    println!("  all {:>10} tiles {:>14} bytes", total.tiles, total.bytes);

    source.cleanup();
    Ok(())
}

fn describe_zoom(zoom: SourceResult<u8>) -> Result<String, CliError> {
    match zoom {
        Ok(z) => Ok(z.to_string()),
        Err(SourceError::NoZoomInfo) => Ok("?".to_string()),
        Err(e) => Err(e.into()),
    }
}

/// Per-zoom totals over every tile of `source`.
pub fn zoom_stats(source: &impl TileSource) -> SourceResult<BTreeMap<u8, ZoomStats>> {
    let mut stats: BTreeMap<u8, ZoomStats> = BTreeMap::new();
    for item in source.enumerate_all_sizes() {
        let (tile, size) = item?;
        let entry = stats.entry(tile.z).or_default();
        entry.tiles += 1;
        entry.bytes += size;
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_zoom_stats_from_disk_tree() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("metadata.json"), r#"{"format": "png"}"#).unwrap();
        for (z, x, y, data) in [(0, 0, 0, "abc"), (1, 0, 1, "de"), (1, 1, 1, "f")] {
            let tile_dir = root.join(z.to_string()).join(x.to_string());
            fs::create_dir_all(&tile_dir).unwrap();
            fs::write(tile_dir.join(format!("{}.png", y)), data).unwrap();
        }

        let source = open_sources(&[root.to_str().unwrap()]).unwrap();
        let stats = zoom_stats(&source).unwrap();
        assert_eq!(stats[&0], ZoomStats { tiles: 1, bytes: 3 });
        assert_eq!(stats[&1], ZoomStats { tiles: 2, bytes: 3 });
    }
}

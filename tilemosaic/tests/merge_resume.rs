//! End-to-end merge runs against an in-memory downloader.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;
use tilemosaic::coord::Tile;
use tilemosaic::download::{DownloadError, DownloadResult, Downloader};
use tilemosaic::merge::{tracker_path, MergeConfig, MergeError, Merger};
use tilemosaic::pmtiles::{zxy_to_tile_id, Header, Reader, TileType, Writer};
use tilemosaic::source::{MbtilesSource, PmtilesSource, TileSource};
use tilemosaic::writer::{checkpoint_path, payload_path, ArchiveType};

const BASE: &str = "https://tiles.example/world/";
const MOSAIC_URL: &str = "https://tiles.example/world/world.mosaic.json";

/// Serves registered URLs from memory; URLs in `failing` answer 503.
#[derive(Default)]
struct FlakyDownloader {
    files: HashMap<String, Vec<u8>>,
    failing: RefCell<HashSet<String>>,
    requests: RefCell<Vec<String>>,
}

impl FlakyDownloader {
    fn take_requests(&self) -> Vec<String> {
        self.requests.borrow_mut().drain(..).collect()
    }
}

impl Downloader for FlakyDownloader {
    fn download(&self, url: &str, dest: &Path) -> DownloadResult<u64> {
        self.requests.borrow_mut().push(url.to_string());
        if self.failing.borrow().contains(url) {
            return Err(DownloadError::RetriesExhausted {
                url: url.to_string(),
                attempts: 4,
                last: Box::new(DownloadError::HttpStatus {
                    url: url.to_string(),
                    status: 503,
                }),
            });
        }
        let data = self.files.get(url).ok_or_else(|| DownloadError::HttpStatus {
            url: url.to_string(),
            status: 404,
        })?;
        fs::write(dest, data).map_err(|source| DownloadError::WriteFailed {
            path: dest.to_path_buf(),
            source,
        })?;
        Ok(data.len() as u64)
    }

    fn leftover_paths(&self, dest: &Path) -> Vec<PathBuf> {
        vec![tilemosaic::download::part_path(dest)]
    }
}

/// Encode a small PMTiles archive.
fn slice_bytes(tiles: &[(Tile, &[u8])]) -> Vec<u8> {
    let mut sorted: Vec<(u64, &[u8])> = tiles
        .iter()
        .map(|(tile, data)| (zxy_to_tile_id(*tile).unwrap(), *data))
        .collect();
    sorted.sort_by_key(|(id, _)| *id);

    let mut writer = Writer::new(Vec::new());
    for (id, data) in &sorted {
        writer.write_tile(*id, data).unwrap();
    }
    let payload = writer.get_ref().clone();
    let header = Header {
        tile_type: TileType::Png,
        min_zoom: tiles.iter().map(|(t, _)| t.z).min().unwrap_or(0),
        max_zoom: tiles.iter().map(|(t, _)| t.z).max().unwrap_or(0),
        ..Header::default()
    };

    let mut out = Vec::new();
    writer
        .finalize(&header, &json!({}), &mut payload.as_slice(), &mut out)
        .unwrap();
    out
}

fn slices() -> Vec<(&'static str, Vec<(Tile, &'static [u8])>)> {
    vec![
        (
            "east.pmtiles",
            vec![
                (Tile::new(2, 3, 1), b"east-a".as_slice()),
                (Tile::new(2, 3, 2), b"sea".as_slice()),
                (Tile::new(2, 2, 2), b"sea".as_slice()),
            ],
        ),
        (
            "west.pmtiles",
            vec![
                (Tile::new(2, 0, 1), b"west-a".as_slice()),
                (Tile::new(2, 0, 2), b"sea".as_slice()),
            ],
        ),
        (
            "low%20zoom.pmtiles",
            vec![
                (Tile::new(0, 0, 0), b"world".as_slice()),
                (Tile::new(1, 1, 0), b"ne".as_slice()),
            ],
        ),
    ]
}

fn downloader() -> FlakyDownloader {
    let mut files = HashMap::new();
    let mut slice_map = serde_json::Map::new();
    for (key, tiles) in slices() {
        files.insert(format!("{}{}", BASE, key), slice_bytes(&tiles));
        slice_map.insert(key.to_string(), json!({}));
    }

    let manifest = json!({
        "version": 1,
        "metadata": {"name": "world", "format": "png"},
        "header": {
            "min_zoom": 0, "max_zoom": 2,
            "min_lon_e7": -1_800_000_000, "max_lon_e7": 1_800_000_000,
            "min_lat_e7": -850_511_287, "max_lat_e7": 850_511_287,
            "tile_compression": 1, "tile_type": 2
        },
        "slices": slice_map
    });
    files.insert(MOSAIC_URL.to_string(), manifest.to_string().into_bytes());

    FlakyDownloader {
        files,
        ..FlakyDownloader::default()
    }
}

fn expected_tiles() -> Vec<(Tile, Vec<u8>)> {
    let mut all: Vec<(Tile, Vec<u8>)> = slices()
        .into_iter()
        .flat_map(|(_, tiles)| tiles)
        .map(|(tile, data)| (tile, data.to_vec()))
        .collect();
    all.sort();
    all
}

fn read_all(source: &impl TileSource) -> Vec<(Tile, Vec<u8>)> {
    let mut tiles: Vec<(Tile, Vec<u8>)> = source.enumerate_all().map(Result::unwrap).collect();
    tiles.sort();
    tiles
}

fn merge_uninterrupted(output: &Path, archive_type: ArchiveType) {
    let flaky = downloader();
    let merger = Merger::new(MergeConfig::new(MOSAIC_URL, archive_type, output), &flaky);
    merger.process().unwrap();
    merger.cleanup().unwrap();
}

#[test]
fn test_pmtiles_resume_after_failed_slice_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("resumed/world.pmtiles");
    let flaky = downloader();
    let third = format!("{}low%20zoom.pmtiles", BASE);
    flaky.failing.borrow_mut().insert(third.clone());

    let merger = Merger::new(MergeConfig::new(MOSAIC_URL, ArchiveType::Pmtiles, &output), &flaky);
    assert!(matches!(merger.process(), Err(MergeError::Download(_))));

    // finished stages are recorded, the writer state is checkpointed
    let tracker = fs::read_to_string(tracker_path(&output)).unwrap();
    assert_eq!(tracker, "prepare\neast.pmtiles\nwest.pmtiles\n");
    assert!(checkpoint_path(&output).exists());
    assert!(payload_path(&output).exists());
    assert!(!output.exists());
    assert!(!output.with_file_name("east.pmtiles").exists());
    flaky.take_requests();

    flaky.failing.borrow_mut().clear();
    let merger = Merger::new(MergeConfig::new(MOSAIC_URL, ArchiveType::Pmtiles, &output), &flaky);
    merger.process().unwrap();
    assert_eq!(flaky.take_requests(), vec![third]);
    merger.cleanup().unwrap();

    assert!(!tracker_path(&output).exists());
    assert!(!checkpoint_path(&output).exists());
    assert!(!payload_path(&output).exists());
    assert!(!output.with_file_name("world.mosaic.json").exists());
    assert!(!output.with_file_name("low zoom.pmtiles").exists());

    let straight = dir.path().join("straight/world.pmtiles");
    merge_uninterrupted(&straight, ArchiveType::Pmtiles);
    assert_eq!(fs::read(&output).unwrap(), fs::read(&straight).unwrap());

    let source = PmtilesSource::open(&output).unwrap();
    assert_eq!(read_all(&source), expected_tiles());
    assert_eq!(source.get_metadata().unwrap().name.as_deref(), Some("world"));
    assert_eq!(source.header().max_zoom, 2);

    // "sea" is stored once for three tiles
    let header = Reader::open(&output).unwrap().header().clone();
    assert_eq!(header.addressed_tiles_count, 7);
    assert_eq!(header.tile_contents_count, 5);
    assert!(!header.clustered);
}

#[test]
fn test_mbtiles_resume_reads_back() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("world.mbtiles");
    let flaky = downloader();
    flaky
        .failing
        .borrow_mut()
        .insert(format!("{}west.pmtiles", BASE));

    let config = MergeConfig::new(MOSAIC_URL, ArchiveType::Mbtiles, &output);
    assert!(Merger::new(config.clone(), &flaky).process().is_err());
    assert!(output.exists());

    flaky.failing.borrow_mut().clear();
    let merger = Merger::new(config, &flaky);
    merger.process().unwrap();
    merger.cleanup().unwrap();

    let source = MbtilesSource::open(&output).unwrap();
    assert_eq!(read_all(&source), expected_tiles());
    assert_eq!(source.min_zoom().unwrap(), 0);
    assert_eq!(source.max_zoom().unwrap(), 2);
    assert_eq!(source.get_metadata().unwrap().format.as_deref(), Some("png"));
    for (tile, data) in expected_tiles() {
        assert_eq!(source.get_tile_size(tile).unwrap(), data.len() as u64);
    }
}

/// Run until the third slice fails, then rewrite the tracker as if the run
/// had died right after committing `west.pmtiles` but before recording it.
fn crash_after_commit_of_west(output: &Path, archive_type: ArchiveType, flaky: &FlakyDownloader) {
    let third = format!("{}low%20zoom.pmtiles", BASE);
    flaky.failing.borrow_mut().insert(third);

    let merger = Merger::new(MergeConfig::new(MOSAIC_URL, archive_type, output), flaky);
    assert!(matches!(merger.process(), Err(MergeError::Download(_))));
    fs::write(tracker_path(output), "prepare\neast.pmtiles\n").unwrap();

    flaky.failing.borrow_mut().clear();
    flaky.take_requests();
}

#[test]
fn test_pmtiles_slice_committed_but_unrecorded_is_replayed_identically() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("resumed/world.pmtiles");
    let flaky = downloader();
    crash_after_commit_of_west(&output, ArchiveType::Pmtiles, &flaky);

    let merger = Merger::new(MergeConfig::new(MOSAIC_URL, ArchiveType::Pmtiles, &output), &flaky);
    merger.process().unwrap();
    assert_eq!(
        flaky.take_requests(),
        vec![format!("{}west.pmtiles", BASE), format!("{}low%20zoom.pmtiles", BASE)]
    );
    merger.cleanup().unwrap();

    let straight = dir.path().join("straight/world.pmtiles");
    merge_uninterrupted(&straight, ArchiveType::Pmtiles);
    assert_eq!(fs::read(&output).unwrap(), fs::read(&straight).unwrap());

    let source = PmtilesSource::open(&output).unwrap();
    assert_eq!(read_all(&source), expected_tiles());
}

#[test]
fn test_mbtiles_slice_committed_but_unrecorded_is_replayed() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("world.mbtiles");
    let flaky = downloader();
    crash_after_commit_of_west(&output, ArchiveType::Mbtiles, &flaky);

    let merger = Merger::new(MergeConfig::new(MOSAIC_URL, ArchiveType::Mbtiles, &output), &flaky);
    merger.process().unwrap();
    assert_eq!(
        flaky.take_requests(),
        vec![format!("{}west.pmtiles", BASE), format!("{}low%20zoom.pmtiles", BASE)]
    );
    merger.cleanup().unwrap();

    let source = MbtilesSource::open(&output).unwrap();
    assert_eq!(read_all(&source), expected_tiles());
    assert_eq!(source.max_zoom().unwrap(), 2);
}

#[test]
fn test_completed_output_is_protected() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("world.pmtiles");
    merge_uninterrupted(&output, ArchiveType::Pmtiles);
    let finished = fs::read(&output).unwrap();

    let flaky = downloader();
    let merger = Merger::new(MergeConfig::new(MOSAIC_URL, ArchiveType::Pmtiles, &output), &flaky);
    assert!(matches!(merger.process(), Err(MergeError::OutputExists(_))));
    assert!(flaky.take_requests().is_empty());
    assert_eq!(fs::read(&output).unwrap(), finished);

    let forced = Merger::new(
        MergeConfig::new(MOSAIC_URL, ArchiveType::Pmtiles, &output).with_force(true),
        &flaky,
    );
    forced.process().unwrap();
    assert_eq!(fs::read(&output).unwrap(), finished);
}

//! Resumable consolidation of a mosaic into one archive.
//!
//! A run walks these stages, recording each in the [`StageTracker`] as it
//! completes:
//!
//! ```text
//! prepare ─► slice 1 ─► slice 2 ─► … ─► slice n ─► finalize
//! ```
//!
//! Every slice is fetched, streamed tile by tile into the output writer,
//! committed, and only then marked done. A crashed or failed run restarted
//! against the same output skips the recorded stages; the writer resumes
//! from its last commit. A slice committed but not yet marked is added
//! again, which both writers absorb without changing the result. [`Merger::cleanup`] removes the tracker and any
//! downloaded manifest once the output is complete.

mod config;
mod error;
mod location;
mod manifest;
mod tracker;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

pub use config::{MergeConfig, DEFAULT_HTTP_RETRIES, DEFAULT_REQUEST_TIMEOUT};
pub use error::{MergeError, MergeResult};
pub use location::{file_name_from_url, is_local, local_path, resolve_slice_url};
pub use manifest::MosaicManifest;
pub use tracker::{tracker_path, StageTracker, FINALIZE_STAGE, PREPARE_STAGE};

use crate::download::Downloader;
use crate::source::{PmtilesSource, TileSource};
use crate::writer::{create_writer, ArchiveWriter};

/// Drives one merge run.
pub struct Merger<D: Downloader> {
    config: MergeConfig,
    downloader: D,
    tracker_path: PathBuf,
}

impl<D: Downloader> Merger<D> {
    pub fn new(config: MergeConfig, downloader: D) -> Self {
        let tracker_path = tracker_path(&config.output_file);
        Self {
            config,
            downloader,
            tracker_path,
        }
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    pub fn tracker_path(&self) -> &Path {
        &self.tracker_path
    }

    /// Run every pending stage and finalize the output.
    pub fn process(&self) -> MergeResult<()> {
        let output = &self.config.output_file;

        if self.config.force {
            self.force_cleanup()?;
        }

        if output.exists() && !self.tracker_path.exists() {
            return Err(MergeError::OutputExists(output.clone()));
        }

        let output_dir = self.config.output_dir();
        fs::create_dir_all(output_dir).map_err(|e| MergeError::io(output_dir, e))?;

        let manifest = self.load_manifest()?;
        info!(
            version = manifest.version(),
            slices = manifest.slice_keys().len(),
            "Loaded mosaic manifest"
        );

        let mut tracker = StageTracker::open(&self.tracker_path)?;
        if tracker.is_done(FINALIZE_STAGE) {
            info!(output = %output.display(), "Output already finalized");
            return Ok(());
        }

        let mut writer = create_writer(self.config.archive_type, output, self.config.force);
        writer.init()?;

        if !tracker.is_done(PREPARE_STAGE) {
            writer.prepare()?;
            tracker.mark_done(PREPARE_STAGE)?;
        }

        for key in manifest.slice_keys() {
            if tracker.is_done(key) {
                info!(slice = %key, "Stage already done, skipping");
                continue;
            }

            let url = resolve_slice_url(&self.config.mosaic_url, manifest.slice_ref(key))?;
            let local = is_local(&url);
            let file = self.fetch_slice(&url)?;

            self.add_slice(writer.as_mut(), &file)?;
            tracker.mark_done(key)?;

            if !local {
                remove_if_exists(&file)?;
            }
        }

        writer.finalize(manifest.metadata(), manifest.header())?;
        tracker.mark_done(FINALIZE_STAGE)?;
        info!(output = %output.display(), "Merge complete");
        Ok(())
    }

    /// Remove the tracker and the downloaded manifest.
    pub fn cleanup(&self) -> MergeResult<()> {
        if remove_if_exists(&self.tracker_path)? {
            debug!(path = %self.tracker_path.display(), "Tracker file deleted");
        }
        if !is_local(&self.config.mosaic_url) && remove_if_exists(&self.manifest_file())? {
            debug!("Mosaic file deleted");
        }
        Ok(())
    }

    /// Where the manifest is read from.
    fn manifest_file(&self) -> PathBuf {
        self.local_copy(&self.config.mosaic_url)
    }

    /// Local file for `url`: the path itself, or its download location.
    fn local_copy(&self, url: &str) -> PathBuf {
        if is_local(url) {
            local_path(url)
        } else {
            self.config.output_dir().join(file_name_from_url(url))
        }
    }

    fn load_manifest(&self) -> MergeResult<MosaicManifest> {
        let url = &self.config.mosaic_url;
        let file = self.manifest_file();

        if !is_local(url) && !file.exists() {
            self.downloader.download(url, &file)?;
        }

        let text = fs::read_to_string(&file).map_err(|e| MergeError::io(&file, e))?;
        MosaicManifest::from_json(&text)
    }

    /// Make a slice available locally.
    fn fetch_slice(&self, url: &str) -> MergeResult<PathBuf> {
        let file = self.local_copy(url);
        if is_local(url) {
            return Ok(file);
        }
        if file.file_name().map_or(true, |name| name.is_empty()) {
            return Err(MergeError::InvalidManifest(format!(
                "slice URL {} has no file name",
                url
            )));
        }

        if self.config.force {
            info!(url, path = %file.display(), "Force flag is active, deleting stale slice copy");
            remove_if_exists(&file)?;
            self.remove_leftovers(&file)?;
        } else if file.exists() {
            // downloads land by rename, so an existing file is complete
            info!(path = %file.display(), "Reusing downloaded slice");
            return Ok(file);
        }

        self.downloader.download(url, &file)?;
        Ok(file)
    }

    fn add_slice(&self, writer: &mut dyn ArchiveWriter, file: &Path) -> MergeResult<()> {
        info!(path = %file.display(), "Adding slice to archive");
        let source = PmtilesSource::open(file)?;

        let mut count = 0u64;
        for item in source.enumerate_all() {
            let (tile, data) = item?;
            writer.add_to_archive(tile, &data)?;
            count += 1;
        }
        writer.commit()?;
        source.cleanup();

        debug!(path = %file.display(), tiles = count, "Slice committed");
        Ok(())
    }

    fn force_cleanup(&self) -> MergeResult<()> {
        info!("Force flag is active, cleaning up leftover files");
        remove_if_exists(&self.config.output_file)?;
        remove_if_exists(&self.tracker_path)?;

        if !is_local(&self.config.mosaic_url) {
            let manifest = self.manifest_file();
            remove_if_exists(&manifest)?;
            self.remove_leftovers(&manifest)?;
        }
        Ok(())
    }

    fn remove_leftovers(&self, dest: &Path) -> MergeResult<()> {
        for leftover in self.downloader.leftover_paths(dest) {
            remove_if_exists(&leftover)?;
        }
        Ok(())
    }
}

/// Delete `path`, reporting whether anything was there.
fn remove_if_exists(path: &Path) -> MergeResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => {
            info!(path = %path.display(), "Deleted");
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(MergeError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::Tile;
    use crate::download::{DownloadError, DownloadResult};
    use crate::source::test_support::pmtiles_file;
    use crate::source::MbtilesSource;
    use crate::writer::ArchiveType;
    use serde_json::json;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// Serves files from memory and records requested URLs.
    #[derive(Default)]
    struct MemoryDownloader {
        files: HashMap<String, Vec<u8>>,
        requests: RefCell<Vec<String>>,
    }

    impl Downloader for MemoryDownloader {
        fn download(&self, url: &str, dest: &Path) -> DownloadResult<u64> {
            self.requests.borrow_mut().push(url.to_string());
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
            vec![crate::download::part_path(dest)]
        }
    }

    fn header_json() -> serde_json::Value {
        json!({
            "min_zoom": 0, "max_zoom": 1,
            "min_lon_e7": -1_800_000_000, "max_lon_e7": 1_800_000_000,
            "min_lat_e7": -850_000_000, "max_lat_e7": 850_000_000,
            "tile_compression": 1, "tile_type": 2
        })
    }

    /// Local v0 mosaic with two slices under `dir/mosaic`; the keys lose
    /// their leading `../` and resolve next to the manifest.
    fn local_mosaic(dir: &Path) -> String {
        let mosaic_dir = dir.join("mosaic");
        fs::create_dir_all(mosaic_dir.join("slices")).unwrap();
        pmtiles_file(
            &mosaic_dir.join("slices/a.pmtiles"),
            &[(Tile::new(0, 0, 0), b"world"), (Tile::new(1, 0, 0), b"nw")],
            "a",
        );
        pmtiles_file(&mosaic_dir.join("slices/b.pmtiles"), &[(Tile::new(1, 1, 1), b"se")], "b");

        let manifest = json!({
            "../slices/a.pmtiles": {"header": header_json(), "metadata": {"name": "mosaic"}},
            "../slices/b.pmtiles": {"header": header_json(), "metadata": {"name": "ignored"}}
        });
        let path = mosaic_dir.join("world.mosaic.json");
        fs::write(&path, manifest.to_string()).unwrap();

        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_local_mosaic_to_mbtiles() {
        let dir = tempfile::tempdir().unwrap();
        let mosaic = local_mosaic(dir.path());
        let output = dir.path().join("out/world.mbtiles");

        let merger = Merger::new(
            MergeConfig::new(&mosaic, ArchiveType::Mbtiles, &output),
            MemoryDownloader::default(),
        );
        merger.process().unwrap();
        assert!(merger.tracker_path().exists());
        merger.cleanup().unwrap();
        assert!(!merger.tracker_path().exists());

        let source = MbtilesSource::open(&output).unwrap();
        assert_eq!(source.get_tile_data(Tile::new(1, 1, 1)).unwrap(), b"se");
        assert_eq!(source.enumerate_all().count(), 3);
        assert_eq!(source.get_metadata().unwrap().name.as_deref(), Some("mosaic"));
        assert!(merger.downloader.requests.borrow().is_empty());
    }

    #[test]
    fn test_finalized_output_survives_rerun_before_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let mosaic = local_mosaic(dir.path());
        let output = dir.path().join("world.pmtiles");

        let merger = Merger::new(
            MergeConfig::new(&mosaic, ArchiveType::Pmtiles, &output),
            MemoryDownloader::default(),
        );
        merger.process().unwrap();
        let finished = fs::read(&output).unwrap();
        assert!(fs::read_to_string(merger.tracker_path())
            .unwrap()
            .ends_with("finalize\n"));

        // cleanup never ran
        merger.process().unwrap();
        assert_eq!(fs::read(&output).unwrap(), finished);
        assert!(!crate::writer::checkpoint_path(&output).exists());
    }

    #[test]
    fn test_existing_output_without_tracker_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mosaic = local_mosaic(dir.path());
        let output = dir.path().join("world.pmtiles");
        fs::write(&output, b"precious").unwrap();

        let merger = Merger::new(
            MergeConfig::new(&mosaic, ArchiveType::Pmtiles, &output),
            MemoryDownloader::default(),
        );
        assert!(matches!(merger.process(), Err(MergeError::OutputExists(_))));
        assert_eq!(fs::read(&output).unwrap(), b"precious");
        assert!(!merger.tracker_path().exists());
    }

    #[test]
    fn test_force_replaces_existing_output() {
        let dir = tempfile::tempdir().unwrap();
        let mosaic = local_mosaic(dir.path());
        let output = dir.path().join("world.pmtiles");
        fs::write(&output, b"stale").unwrap();

        let merger = Merger::new(
            MergeConfig::new(&mosaic, ArchiveType::Pmtiles, &output).with_force(true),
            MemoryDownloader::default(),
        );
        merger.process().unwrap();

        let source = PmtilesSource::open(&output).unwrap();
        assert_eq!(source.enumerate_all().count(), 3);
    }

    #[test]
    fn test_remote_slices_are_downloaded_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        fs::create_dir_all(&scratch).unwrap();
        let slice = pmtiles_file(&scratch.join("s.pmtiles"), &[(Tile::new(0, 0, 0), b"x")], "s");

        let manifest = json!({
            "version": 1,
            "metadata": {"name": "remote"},
            "header": header_json(),
            "slices": {"part%201.pmtiles": {}}
        });
        let mut downloader = MemoryDownloader::default();
        downloader.files.insert(
            "https://tiles.example/m/world.mosaic.json".into(),
            manifest.to_string().into_bytes(),
        );
        downloader.files.insert(
            "https://tiles.example/m/part%201.pmtiles".into(),
            fs::read(slice).unwrap(),
        );

        let output = dir.path().join("out/world.pmtiles");
        let merger = Merger::new(
            MergeConfig::new("https://tiles.example/m/world.mosaic.json", ArchiveType::Pmtiles, &output),
            downloader,
        );
        merger.process().unwrap();

        let out_dir = dir.path().join("out");
        assert!(!out_dir.join("part 1.pmtiles").exists());
        assert!(out_dir.join("world.mosaic.json").exists());
        merger.cleanup().unwrap();
        assert!(!out_dir.join("world.mosaic.json").exists());
        assert_eq!(
            *merger.downloader.requests.borrow(),
            vec![
                "https://tiles.example/m/world.mosaic.json".to_string(),
                "https://tiles.example/m/part%201.pmtiles".to_string(),
            ]
        );
    }
}

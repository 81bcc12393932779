//! Append-only record of completed merge stages.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::error::{MergeError, MergeResult};

/// Stage id recorded once the output has been set up.
pub const PREPARE_STAGE: &str = "prepare";

/// Stage id recorded once the output archive has been written.
pub const FINALIZE_STAGE: &str = "finalize";

/// Tracker file kept next to `output` while a merge is in progress.
pub fn tracker_path(output: &Path) -> PathBuf {
    output.with_extension("tracker.txt")
}

/// Completed stages of one output, one id per line.
///
/// Ids are only ever appended; a stage recorded here is skipped by every
/// later run against the same output. A final line without its newline was
/// cut short by a crash; it is dropped from the file on open.
#[derive(Debug)]
pub struct StageTracker {
    path: PathBuf,
    done: HashSet<String>,
}

impl StageTracker {
    /// Open the tracker at `path`, creating an empty one if absent.
    pub fn open(path: impl Into<PathBuf>) -> MergeResult<Self> {
        let path = path.into();
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::write(&path, "").map_err(|source| tracker_error(&path, source))?;
                String::new()
            }
            Err(source) => return Err(tracker_error(&path, source)),
        };

        let (complete, torn) = match contents.rfind('\n') {
            Some(end) if end + 1 < contents.len() => (&contents[..=end], &contents[end + 1..]),
            Some(_) => (contents.as_str(), ""),
            None => ("", contents.as_str()),
        };
        if !torn.is_empty() {
            warn!(path = %path.display(), line = torn, "Dropping incomplete tracker line");
            OpenOptions::new()
                .write(true)
                .open(&path)
                .and_then(|file| {
                    file.set_len(complete.len() as u64)?;
                    file.sync_all()
                })
                .map_err(|source| tracker_error(&path, source))?;
        }

        let done: HashSet<String> = complete
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        debug!(path = %path.display(), stages = done.len(), "Loaded stage tracker");
        Ok(Self { path, done })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_done(&self, stage: &str) -> bool {
        self.done.contains(stage)
    }

    /// Durably record `stage` as complete.
    pub fn mark_done(&mut self, stage: &str) -> MergeResult<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|source| tracker_error(&self.path, source))?;
        writeln!(file, "{}", stage)
            .and_then(|()| file.sync_all())
            .map_err(|source| tracker_error(&self.path, source))?;
        self.done.insert(stage.to_string());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }
}

fn tracker_error(path: &Path, source: io::Error) -> MergeError {
    MergeError::Tracker {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_path() {
        assert_eq!(
            tracker_path(Path::new("out/world.mbtiles")),
            Path::new("out/world.tracker.txt")
        );
    }

    #[test]
    fn test_open_creates_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.tracker.txt");
        let tracker = StageTracker::open(&path).unwrap();
        assert!(tracker.is_empty());
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_marks_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.tracker.txt");

        let mut tracker = StageTracker::open(&path).unwrap();
        tracker.mark_done(PREPARE_STAGE).unwrap();
        tracker.mark_done("slices/0.pmtiles").unwrap();
        assert!(tracker.is_done("slices/0.pmtiles"));

        let reopened = StageTracker::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert!(reopened.is_done(PREPARE_STAGE));
        assert!(!reopened.is_done("slices/1.pmtiles"));
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "prepare\nslices/0.pmtiles\n"
        );
    }

    #[test]
    fn test_torn_last_line_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.tracker.txt");
        fs::write(&path, "prepare\neast.pmt").unwrap();

        let mut tracker = StageTracker::open(&path).unwrap();
        assert_eq!(tracker.len(), 1);
        assert!(!tracker.is_done("east.pmt"));

        tracker.mark_done("east.pmtiles").unwrap();
        tracker.mark_done("west.pmtiles").unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "prepare\neast.pmtiles\nwest.pmtiles\n"
        );

        let reopened = StageTracker::open(&path).unwrap();
        assert!(reopened.is_done("east.pmtiles"));
        assert!(reopened.is_done("west.pmtiles"));
    }

    #[test]
    fn test_torn_only_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.tracker.txt");
        fs::write(&path, "prep").unwrap();

        let mut tracker = StageTracker::open(&path).unwrap();
        assert!(tracker.is_empty());
        tracker.mark_done(PREPARE_STAGE).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "prepare\n");
    }
}

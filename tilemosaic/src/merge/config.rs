//! Configuration for a merge run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::writer::ArchiveType;

/// Default timeout for HTTP requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Default number of retries for HTTP requests.
pub const DEFAULT_HTTP_RETRIES: u32 = 3;

/// Everything a [`super::Merger`] needs to know about one run.
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// URL or local path of the mosaic manifest.
    pub mosaic_url: String,

    /// Format of the output archive.
    pub archive_type: ArchiveType,

    /// Output archive path. Downloads, the tracker and writer checkpoints
    /// live next to it.
    pub output_file: PathBuf,

    /// HTTP request timeout.
    pub request_timeout: Duration,

    /// Retries after a failed HTTP attempt.
    pub num_http_retries: u32,

    /// Discard leftovers of earlier runs and start from scratch.
    pub force: bool,
}

impl MergeConfig {
    /// Create a configuration with default network settings.
    pub fn new(
        mosaic_url: impl Into<String>,
        archive_type: ArchiveType,
        output_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            mosaic_url: mosaic_url.into(),
            archive_type,
            output_file: output_file.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            num_http_retries: DEFAULT_HTTP_RETRIES,
            force: false,
        }
    }

    /// Set the HTTP timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the HTTP retry count.
    pub fn with_http_retries(mut self, retries: u32) -> Self {
        self.num_http_retries = retries;
        self
    }

    /// Enable or disable starting from scratch.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Directory holding the output and its companions.
    pub fn output_dir(&self) -> &Path {
        match self.output_file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}

//! Fetching remote manifests and slice archives.
//!
//! The merge engine only needs one operation: get the bytes behind a URL
//! into a local file, surviving interruptions. [`Downloader`] is that seam;
//! [`HttpDownloader`] is the production implementation and tests swap in
//! an in-memory one.
//!
//! ```text
//! download(url, dest)
//!     │
//!     ├── HEAD: size, accept-ranges
//!     ├── GET (Range: bytes=N- when dest.part holds N bytes)
//!     │       └── stream into dest.part
//!     └── rename dest.part -> dest
//! ```

mod error;
mod http;

use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub use error::{DownloadError, DownloadResult};
pub use http::{HttpDownloader, DEFAULT_RETRIES, DEFAULT_TIMEOUT_SECS};

/// Source of remote files.
pub trait Downloader {
    /// Fetch `url` into `dest`, returning the final file size.
    ///
    /// On failure `dest` is not created, though partial data may remain in
    /// one of [`Downloader::leftover_paths`].
    fn download(&self, url: &str, dest: &Path) -> DownloadResult<u64>;

    /// Files an interrupted download into `dest` may leave behind.
    fn leftover_paths(&self, dest: &Path) -> Vec<PathBuf>;
}

impl<D: Downloader + ?Sized> Downloader for &D {
    fn download(&self, url: &str, dest: &Path) -> DownloadResult<u64> {
        (**self).download(url, dest)
    }

    fn leftover_paths(&self, dest: &Path) -> Vec<PathBuf> {
        (**self).leftover_paths(dest)
    }
}

/// In-progress download location for `dest`: the same name plus `.part`.
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name = OsString::from(dest.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

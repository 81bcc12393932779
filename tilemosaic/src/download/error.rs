//! Error types for the download agent.

use std::io;
use std::path::PathBuf;

/// Result type for download operations.
pub type DownloadResult<T> = Result<T, DownloadError>;

/// Errors that can occur while fetching a remote file.
#[derive(Debug)]
pub enum DownloadError {
    /// The request could not be sent or the body could not be read.
    RequestFailed { url: String, reason: String },

    /// The server answered with a non-success status.
    HttpStatus { url: String, status: u16 },

    /// The request did not complete within the configured timeout.
    Timeout { url: String, timeout_secs: u64 },

    /// Writing the local copy failed.
    WriteFailed { path: PathBuf, source: io::Error },

    /// The HTTP client could not be constructed.
    ClientBuild(String),

    /// Every attempt failed.
    RetriesExhausted {
        url: String,
        attempts: u32,
        last: Box<DownloadError>,
    },
}

impl DownloadError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RequestFailed { .. } | Self::Timeout { .. } => true,
            Self::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            Self::WriteFailed { .. } | Self::ClientBuild(_) | Self::RetriesExhausted { .. } => {
                false
            }
        }
    }
}

impl std::fmt::Display for DownloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RequestFailed { url, reason } => {
                write!(f, "failed to download {}: {}", url, reason)
            }
            Self::HttpStatus { url, status } => {
                write!(f, "request to {} failed with status {}", url, status)
            }
            Self::Timeout { url, timeout_secs } => {
                write!(f, "request to {} timed out after {}s", url, timeout_secs)
            }
            Self::WriteFailed { path, source } => {
                write!(f, "failed to write {}: {}", path.display(), source)
            }
            Self::ClientBuild(reason) => write!(f, "failed to build HTTP client: {}", reason),
            Self::RetriesExhausted {
                url,
                attempts,
                last,
            } => {
                write!(
                    f,
                    "giving up on {} after {} attempts: {}",
                    url, attempts, last
                )
            }
        }
    }
}

impl std::error::Error for DownloadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::WriteFailed { source, .. } => Some(source),
            Self::RetriesExhausted { last, .. } => Some(last.as_ref()),
            _ => None,
        }
    }
}

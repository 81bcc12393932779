//! HTTP downloader with resume and retry support.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use tracing::{debug, info, warn};

use super::error::{DownloadError, DownloadResult};
use super::{part_path, Downloader};

/// Default timeout in seconds for connecting and for each wait on the server.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Default number of retries after the first attempt.
pub const DEFAULT_RETRIES: u32 = 3;

/// Delay before the first retry; doubles on every further retry.
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Upper bound on the delay between retries.
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Buffer size for streaming response bodies (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Blocking HTTP downloader.
///
/// Bodies stream into `<dest>.part`. When a previous attempt left a partial
/// file and the server accepts byte ranges, the transfer continues from the
/// end of that file; otherwise it starts over. The completed file is renamed
/// to `dest`.
#[derive(Debug)]
pub struct HttpDownloader {
    client: Client,
    pub(crate) timeout: Duration,
    pub(crate) retries: u32,
}

impl HttpDownloader {
    /// Create a downloader with the given timeout and retry budget.
    ///
    /// The timeout bounds connecting, waiting for response headers, and
    /// every read of the body. A transfer that keeps delivering data is
    /// never cut off, however large the slice.
    pub fn new(timeout: Duration, retries: u32) -> DownloadResult<Self> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| DownloadError::ClientBuild(e.to_string()))?;

        Ok(Self {
            client,
            timeout,
            retries,
        })
    }

    /// Create a downloader with default settings.
    pub fn with_defaults() -> DownloadResult<Self> {
        Self::new(Duration::from_secs(DEFAULT_TIMEOUT_SECS), DEFAULT_RETRIES)
    }

    /// One transfer attempt, resuming from `part` where possible.
    fn attempt(&self, url: &str, dest: &Path) -> DownloadResult<u64> {
        let part = part_path(dest);
        let existing = fs::metadata(&part).map(|m| m.len()).unwrap_or(0);
        let (total, supports_range) = self.query_file_info(url)?;

        if existing > 0 && total == Some(existing) {
            debug!(path = %part.display(), "Partial download already complete");
            return finish(&part, dest, existing);
        }

        let resume_from = match total {
            Some(total) if existing > 0 && supports_range && existing < total => existing,
            _ => 0,
        };

        let mut request = self.client.get(url);
        if resume_from > 0 {
            info!(url, offset = resume_from, "Resuming download");
            request = request.header("Range", format!("bytes={}-", resume_from));
        }
        let response = request.send().map_err(|e| self.request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        // a 200 to a ranged request carries the whole body
        let append = resume_from > 0 && status == StatusCode::PARTIAL_CONTENT;
        let file = open_part(&part, append)?;
        let start = if append { resume_from } else { 0 };
        let size = self.stream_body(url, response, file, &part, start)?;

        finish(&part, dest, size)
    }

    /// Size and range support via a HEAD request.
    fn query_file_info(&self, url: &str) -> DownloadResult<(Option<u64>, bool)> {
        let response = self
            .client
            .head(url)
            .send()
            .map_err(|e| self.request_error(url, e))?;

        if !response.status().is_success() {
            return Err(DownloadError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let total = response
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());

        let supports_range = response
            .headers()
            .get("accept-ranges")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == "bytes");

        Ok((total, supports_range))
    }

    /// Copy the response body into `file`, returning the part file's size.
    ///
    /// Bytes received before a failed read stay in the part file so the
    /// next attempt can resume after them.
    fn stream_body(
        &self,
        url: &str,
        mut response: Response,
        file: File,
        part: &Path,
        start: u64,
    ) -> DownloadResult<u64> {
        let write_failed = |source| DownloadError::WriteFailed {
            path: part.to_path_buf(),
            source,
        };

        let mut writer = BufWriter::new(file);
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut downloaded = start;

        loop {
            let bytes_read = match response.read(&mut buffer) {
                Ok(n) => n,
                Err(e) => {
                    writer.flush().map_err(write_failed)?;
                    debug!(url, bytes = downloaded, "Body read failed, partial data kept");
                    return Err(self.read_error(url, e));
                }
            };
            if bytes_read == 0 {
                break;
            }
            writer.write_all(&buffer[..bytes_read]).map_err(write_failed)?;
            downloaded += bytes_read as u64;
        }

        writer.flush().map_err(write_failed)?;
        Ok(downloaded)
    }

    fn timeout_error(&self, url: &str) -> DownloadError {
        DownloadError::Timeout {
            url: url.to_string(),
            timeout_secs: self.timeout.as_secs(),
        }
    }

    fn request_error(&self, url: &str, e: reqwest::Error) -> DownloadError {
        if e.is_timeout() {
            self.timeout_error(url)
        } else {
            DownloadError::RequestFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }

    /// Classify a failed body read; the client reports stalls as wrapped
    /// timeout errors.
    fn read_error(&self, url: &str, e: io::Error) -> DownloadError {
        let timed_out = e.kind() == io::ErrorKind::TimedOut
            || e
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<reqwest::Error>())
                .is_some_and(reqwest::Error::is_timeout);
        if timed_out {
            self.timeout_error(url)
        } else {
            DownloadError::RequestFailed {
                url: url.to_string(),
                reason: format!("read error: {}", e),
            }
        }
    }
}

impl Downloader for HttpDownloader {
    fn download(&self, url: &str, dest: &Path) -> DownloadResult<u64> {
        info!(url, dest = %dest.display(), "Downloading");
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(url, dest) {
                Ok(size) => return Ok(size),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt > self.retries => {
                    return Err(DownloadError::RetriesExhausted {
                        url: url.to_string(),
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = backoff_delay(attempt);
                    warn!(url, attempt, error = %e, delay_ms = delay.as_millis() as u64, "Download failed, retrying");
                    thread::sleep(delay);
                }
            }
        }
    }

    fn leftover_paths(&self, dest: &Path) -> Vec<PathBuf> {
        vec![part_path(dest)]
    }
}

/// Delay after the `attempt`-th failure.
fn backoff_delay(attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    BACKOFF_BASE.saturating_mul(factor).min(BACKOFF_CAP)
}

fn open_part(part: &Path, append: bool) -> DownloadResult<File> {
    let write_failed = |source| DownloadError::WriteFailed {
        path: part.to_path_buf(),
        source,
    };

    if let Some(parent) = part.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_failed)?;
    }
    if append {
        OpenOptions::new().append(true).open(part).map_err(write_failed)
    } else {
        File::create(part).map_err(write_failed)
    }
}

fn finish(part: &Path, dest: &Path, size: u64) -> DownloadResult<u64> {
    fs::rename(part, dest).map_err(|source| DownloadError::WriteFailed {
        path: dest.to_path_buf(),
        source,
    })?;
    debug!(dest = %dest.display(), bytes = size, "Download complete");
    Ok(size)
}

//! CLI error handling.

use std::fmt;
use std::process;

use tilemosaic::download::DownloadError;
use tilemosaic::merge::MergeError;
use tilemosaic::source::SourceError;

/// Errors reported to the user before exiting.
#[derive(Debug)]
pub enum CliError {
    /// Arguments that cannot describe a run.
    Usage(String),
    /// The log subscriber could not be installed.
    Logging(String),
    /// The HTTP client could not be set up.
    Download(DownloadError),
    /// The merge run failed.
    Merge(MergeError),
    /// An inspected source could not be read.
    Source(SourceError),
}

impl CliError {
    /// Print the error and exit with status 1.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);
        process::exit(1);
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Usage(msg) => write!(f, "{}", msg),
            CliError::Logging(msg) => write!(f, "failed to initialize logging: {}", msg),
            CliError::Download(e) => write!(f, "{}", e),
            CliError::Merge(e) => write!(f, "{}", e),
            CliError::Source(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CliError {}

impl From<DownloadError> for CliError {
    fn from(e: DownloadError) -> Self {
        CliError::Download(e)
    }
}

impl From<MergeError> for CliError {
    fn from(e: MergeError) -> Self {
        CliError::Merge(e)
    }
}

impl From<SourceError> for CliError {
    fn from(e: SourceError) -> Self {
        CliError::Source(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_display_is_verbatim() {
        let err = CliError::Usage("pick an archive type".to_string());
        assert_eq!(err.to_string(), "pick an archive type");
    }

    #[test]
    fn test_merge_error_passes_through() {
        let err = CliError::from(MergeError::InvalidManifest("no slices".to_string()));
        assert_eq!(err.to_string(), "invalid mosaic manifest: no slices");
    }
}

//! `merge`: consolidate a mosaic into one archive.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use tilemosaic::download::HttpDownloader;
use tilemosaic::merge::{file_name_from_url, MergeConfig, Merger};
use tilemosaic::writer::ArchiveType;
use tracing::info;

use super::common::ArchiveTypeArg;
use crate::error::CliError;

const MOSAIC_SUFFIX: &str = ".mosaic.json";

/// Arguments of the `merge` command.
#[derive(Debug, Args)]
pub struct MergeArgs {
    /// URL or local path of the mosaic JSON file
    #[arg(long, short = 'u')]
    pub mosaic_url: String,

    /// Output .mbtiles or .pmtiles file; the format follows the extension
    #[arg(long, short = 'o')]
    pub output_file: Option<PathBuf>,

    /// Archive type to create; required without --output-file
    #[arg(long, short = 'a', value_enum)]
    pub archive_type: Option<ArchiveTypeArg>,

    /// Timeout for HTTP requests in seconds
    #[arg(long, short = 't', default_value_t = 60)]
    pub request_timeout_secs: u64,

    /// Number of retries for HTTP requests
    #[arg(long, short = 'r', default_value_t = 3)]
    pub num_http_retries: u32,

    /// Clear all leftover files and start the run from scratch
    #[arg(long, short = 'f')]
    pub force: bool,
}

/// Run the merge command.
pub fn run(args: MergeArgs) -> Result<(), CliError> {
    let (output, archive_type) = resolve_output(
        args.output_file.as_deref(),
        args.archive_type.map(ArchiveType::from),
        &args.mosaic_url,
    )?;

    let config = MergeConfig::new(args.mosaic_url, archive_type, output)
        .with_request_timeout(Duration::from_secs(args.request_timeout_secs))
        .with_http_retries(args.num_http_retries)
        .with_force(args.force);
    let downloader = HttpDownloader::new(config.request_timeout, config.num_http_retries)?;

    let merger = Merger::new(config, downloader);
    merger.process()?;
    merger.cleanup()?;

    info!("Done");
    Ok(())
}

/// Decide the output path and format from the arguments.
///
/// An output extension decides the format and must agree with an explicit
/// archive type. Without an output file the name derives from the mosaic's.
pub fn resolve_output(
    output_file: Option<&Path>,
    archive_type: Option<ArchiveType>,
    mosaic_url: &str,
) -> Result<(PathBuf, ArchiveType), CliError> {
    if let Some(output) = output_file {
        let from_extension = ArchiveType::from_path(output).ok_or_else(|| {
            CliError::Usage(
                "--output-file must have a .mbtiles or .pmtiles extension".to_string(),
            )
        })?;
        if let Some(requested) = archive_type {
            if requested != from_extension {
                return Err(CliError::Usage(format!(
                    "output file extension is .{} but --archive-type is '{}'",
                    from_extension, requested
                )));
            }
        }
        return Ok((output.to_path_buf(), from_extension));
    }

    let archive_type = archive_type.ok_or_else(|| {
        CliError::Usage(
            "specify either --output-file (with .mbtiles or .pmtiles extension) or --archive-type"
                .to_string(),
        )
    })?;

    let mosaic_name = file_name_from_url(mosaic_url);
    let stem = mosaic_name.strip_suffix(MOSAIC_SUFFIX).ok_or_else(|| {
        CliError::Usage(format!(
            "mosaic URL must point to a file ending with {} when --output-file is not given",
            MOSAIC_SUFFIX
        ))
    })?;

    Ok((PathBuf::from(format!("{}.{}", stem, archive_type)), archive_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOSAIC: &str = "https://example.com/data/world.mosaic.json";

    #[test]
    fn test_extension_decides_type() {
        let (path, kind) = resolve_output(Some(Path::new("out/w.pmtiles")), None, MOSAIC).unwrap();
        assert_eq!(path, Path::new("out/w.pmtiles"));
        assert_eq!(kind, ArchiveType::Pmtiles);

        let (_, kind) = resolve_output(
            Some(Path::new("w.mbtiles")),
            Some(ArchiveType::Mbtiles),
            "anything.json",
        )
        .unwrap();
        assert_eq!(kind, ArchiveType::Mbtiles);
    }

    #[test]
    fn test_extension_and_flag_must_agree() {
        let err = resolve_output(Some(Path::new("w.mbtiles")), Some(ArchiveType::Pmtiles), MOSAIC)
            .unwrap_err();
        assert!(err.to_string().contains("--archive-type"));
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        assert!(matches!(
            resolve_output(Some(Path::new("w.zip")), Some(ArchiveType::Pmtiles), MOSAIC),
            Err(CliError::Usage(_))
        ));
    }

    #[test]
    fn test_type_required_without_output() {
        assert!(matches!(
            resolve_output(None, None, MOSAIC),
            Err(CliError::Usage(_))
        ));
    }

    #[test]
    fn test_default_name_from_mosaic() {
        let (path, kind) = resolve_output(None, Some(ArchiveType::Mbtiles), MOSAIC).unwrap();
        assert_eq!(path, Path::new("world.mbtiles"));
        assert_eq!(kind, ArchiveType::Mbtiles);

        let (path, _) =
            resolve_output(None, Some(ArchiveType::Pmtiles), "local/dir/my%20map.mosaic.json")
                .unwrap();
        assert_eq!(path, Path::new("my map.pmtiles"));
    }

    #[test]
    fn test_default_name_needs_mosaic_suffix() {
        assert!(matches!(
            resolve_output(None, Some(ArchiveType::Pmtiles), "https://example.com/world.json"),
            Err(CliError::Usage(_))
        ));
    }
}

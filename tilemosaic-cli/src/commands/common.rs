//! Argument types shared across commands.

use clap::ValueEnum;
use tilemosaic::logging::LogLevel;
use tilemosaic::writer::ArchiveType;

/// Output archive format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ArchiveTypeArg {
    /// SQLite-based MBTiles
    Mbtiles,
    /// Single-file PMTiles v3
    Pmtiles,
}

impl From<ArchiveTypeArg> for ArchiveType {
    fn from(arg: ArchiveTypeArg) -> Self {
        match arg {
            ArchiveTypeArg::Mbtiles => ArchiveType::Mbtiles,
            ArchiveTypeArg::Pmtiles => ArchiveType::Pmtiles,
        }
    }
}

/// Log verbosity selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevelArg {
    Debug,
    Info,
    Warning,
    Error,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Warning => LogLevel::Warning,
            LogLevelArg::Error => LogLevel::Error,
        }
    }
}

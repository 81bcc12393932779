//! Subcommand implementations.

pub mod common;
pub mod inspect;
pub mod merge;

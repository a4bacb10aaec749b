//! CLI subcommands.

pub mod config;
pub mod fetch;
pub mod levels;
pub mod simulate;

use std::path::Path;

use globetile::config::ConfigFile;

use crate::error::CliError;

/// Loads `path`, or the default configuration file when none is given.
pub fn load_config(path: Option<&Path>) -> Result<ConfigFile, CliError> {
    match path {
        Some(path) => Ok(ConfigFile::load_from(path)?),
        None => Ok(ConfigFile::load()?),
    }
}

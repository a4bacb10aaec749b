//! Configuration management CLI commands.
//!
//! Provides `config show`, `config path` and `config init` for inspecting
//! and creating the configuration file.

use std::path::{Path, PathBuf};

use clap::Subcommand;
use globetile::config::{config_file_path, ConfigFile};

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Show the configuration file path
    Path,

    /// Write a configuration file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Run a config subcommand. `explicit_path` is the `--config` argument.
pub fn run(
    command: ConfigCommands,
    config: &ConfigFile,
    explicit_path: Option<&Path>,
) -> Result<(), CliError> {
    let path = explicit_path
        .map(Path::to_path_buf)
        .unwrap_or_else(config_file_path);

    match command {
        ConfigCommands::Show => {
            print!("{}", config);
            Ok(())
        }
        ConfigCommands::Path => {
            println!("{}", path.display());
            Ok(())
        }
        ConfigCommands::Init { force } => {
            let written = init(&path, force)?;
            println!("Wrote {}", written.display());
            Ok(())
        }
    }
}

/// Writes default settings to `path`, refusing to clobber unless `force`.
fn init(path: &Path, force: bool) -> Result<PathBuf, CliError> {
    if path.exists() && !force {
        return Err(CliError::Config(format!(
            "{} already exists. Use --force to overwrite it.",
            path.display()
        )));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    ConfigFile::default().save_to(path)?;
    Ok(path.to_path_buf())
}

//! Tracing subscriber setup.
//!
//! Log output goes to stderr so command output on stdout stays clean. The
//! filter honours `RUST_LOG`; without it `--verbose` selects between `info`
//! and `debug` for the globetile crates. With `--log-file` a second,
//! non-blocking writer copies every event to that file.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::CliError;

/// Default filter directive when `RUST_LOG` is unset.
fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "globetile=debug,globetile_cli=debug"
    } else {
        "globetile=info,globetile_cli=info"
    }
}

/// Installs the global subscriber. Keep the returned guard alive until exit
/// so buffered file output is flushed.
pub fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>, CliError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_timer(LocalTime::rfc_3339())
        .with_target(verbose);

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .ok_or_else(|| CliError::Config(format!("Invalid log file path: {}", path.display())))?;
            std::fs::create_dir_all(directory)?;

            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_timer(LocalTime::rfc_3339());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| CliError::Startup(format!("Failed to install logger: {}", e)))?;

    Ok(guard)
}

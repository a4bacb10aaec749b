//! CLI error type.

use std::fmt;

use globetile::config::ConfigFileError;
use globetile::{ConfigurationError, RetrievalError};

/// Errors surfaced to the user by CLI commands.
#[derive(Debug)]
pub enum CliError {
    /// Invalid command line or configuration value.
    Config(String),
    /// A component rejected its configuration.
    Configuration(ConfigurationError),
    /// The configuration file could not be read or written.
    ConfigFile(ConfigFileError),
    /// A tile could not be retrieved.
    Retrieval(RetrievalError),
    /// Logging or the async runtime failed to start.
    Startup(String),
    Io(std::io::Error),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Configuration(e) => write!(f, "Invalid configuration: {}", e),
            CliError::ConfigFile(e) => write!(f, "{}", e),
            CliError::Retrieval(e) => write!(f, "Retrieval failed: {}", e),
            CliError::Startup(msg) => write!(f, "Startup failed: {}", msg),
            CliError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Configuration(e) => Some(e),
            CliError::ConfigFile(e) => Some(e),
            CliError::Retrieval(e) => Some(e),
            CliError::Io(e) => Some(e),
            CliError::Config(_) | CliError::Startup(_) => None,
        }
    }
}

impl From<ConfigurationError> for CliError {
    fn from(e: ConfigurationError) -> Self {
        CliError::Configuration(e)
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::ConfigFile(e)
    }
}

impl From<RetrievalError> for CliError {
    fn from(e: RetrievalError) -> Self {
        CliError::Retrieval(e)
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_cause() {
        let err = CliError::from(RetrievalError::Http {
            status: 503,
            url: "http://localhost/0/0/0".to_string(),
        });
        let message = err.to_string();
        assert!(message.starts_with("Retrieval failed"));
        assert!(message.contains("503"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_plain_messages_have_no_source() {
        let err = CliError::Config("bad key".to_string());
        assert_eq!(err.to_string(), "Configuration error: bad key");
        assert!(std::error::Error::source(&err).is_none());
    }
}

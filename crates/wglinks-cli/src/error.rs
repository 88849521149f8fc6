//! CLI error types.

use std::path::PathBuf;

use thiserror::Error;
use wglinks::WgLinksError;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// The fleet definition could not be read.
    #[error("cannot read fleet definition {}: {source}", path.display())]
    FleetRead {
        /// Path that was read.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A convergence, build or state operation failed.
    #[error(transparent)]
    WgLinks(#[from] WgLinksError),

    /// Output formatting error.
    #[error("format error: {0}")]
    Format(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_error_display_fleet_read() {
        let err = CliError::FleetRead {
            path: PathBuf::from("/nope/fleet.json"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert_eq!(err.to_string(), "cannot read fleet definition /nope/fleet.json: missing");
    }

    #[test]
    fn cli_error_is_transparent_for_core_errors() {
        let err = CliError::from(WgLinksError::SelfLink {
            endpoint: "alpha".into(),
        });
        assert_eq!(err.to_string(), "'wgLinksTo' in machine 'alpha' refers to itself");
    }

    #[test]
    fn cli_error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let cli_err = CliError::from(io_err);
        assert!(matches!(cli_err, CliError::Io(_)));
    }
}

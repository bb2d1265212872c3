//! Errors raised by the CLI layer itself.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("resource '{}' not found or not a file", .path.display())]
    ResourceNotFound { path: PathBuf },

    #[error("destination '{destination}' of resource '{source_file}' resolved to '{resolved}', which is not absolute")]
    RelativeDestination {
        source_file: String,
        destination: String,
        resolved: String,
    },

    #[error("command '{name}' not found in project '{project}'")]
    UnknownCommand { name: String, project: String },

    #[error("{0}")]
    Usage(String),
}

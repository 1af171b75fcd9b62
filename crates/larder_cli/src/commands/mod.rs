//! CLI command implementations.

pub mod cursors;
pub mod inspect;

use larder_entities::RESOURCES;
use larder_storage::StorageError;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Error, Debug)]
pub enum CliError {
    /// The directory holds no Larder tables.
    #[error("no Larder store found at {0}")]
    NoStore(PathBuf),

    /// The resource name is not one of the synced resources.
    #[error("unknown resource `{0}` (expected one of: {list})", list = RESOURCES.join(", "))]
    UnknownResource(String),

    /// A table or the cursor file could not be read or written.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Output could not be serialized.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

pub(crate) fn require_store(path: &Path) -> CliResult<()> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(CliError::NoStore(path.to_path_buf()))
    }
}

pub(crate) fn resource_name(name: &str) -> CliResult<&'static str> {
    let name = name.trim_start_matches('/');
    RESOURCES
        .into_iter()
        .find(|r| *r == name)
        .ok_or_else(|| CliError::UnknownResource(name.to_string()))
}

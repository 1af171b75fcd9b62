//! Error types for local store operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A table could not be encoded for writing.
    #[error("encode error: {0}")]
    Encode(String),

    /// A table file could not be decoded.
    #[error("decode error in {path}: {message}")]
    Decode {
        /// File that failed to decode.
        path: PathBuf,
        /// Decoder message.
        message: String,
    },

    /// Another process holds the table lock.
    #[error("store is locked by another process: {0}")]
    Locked(PathBuf),

    /// The store refused the operation (disk full, read-only mount, ...).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    pub(crate) fn decode(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Decode {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

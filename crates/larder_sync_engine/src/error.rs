//! Error types for the sync engine.

use larder_storage::StorageError;
use larder_sync_protocol::ProtocolError;
use thiserror::Error;
use uuid::Uuid;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The request did not complete in time.
    #[error("operation timed out")]
    Timeout,

    /// The server refused the record (validation, referential integrity,
    /// unknown ID on update).
    #[error("rejected by server ({status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Server-provided reason.
        message: String,
    },

    /// Credentials were missing, expired or insufficient.
    #[error("not authorized: {0}")]
    Unauthorized(String),

    /// The local store failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A server response or local record could not be mapped.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A local mutation referenced a record that does not exist.
    #[error("record {0} not found")]
    RecordNotFound(Uuid),

    /// A local mutation targeted a record awaiting deletion.
    #[error("record {0} is deleted")]
    RecordDeleted(Uuid),

    /// Another cycle for the same resource is running.
    #[error("a sync cycle for {0} is already running")]
    CycleInProgress(&'static str),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,
}

/// Coarse classification used to decide how a failure is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retried automatically on a later cycle.
    Transient,
    /// Needs the user's attention; not retried by backoff.
    Rejected,
    /// Stops the cycle until credentials are refreshed.
    Unauthorized,
    /// Local failure (store, mapping, cancellation).
    System,
    /// Invalid local mutation; never reaches the network.
    Local,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Maps a non-2xx HTTP status to an error.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::Unauthorized(message),
            408 => Self::Timeout,
            429 | 500..=599 => Self::Transport {
                message: format!("{status}: {message}"),
                retryable: true,
            },
            _ => Self::Rejected { status, message },
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            _ => false,
        }
    }

    /// Returns true if this error aborts the whole cycle rather than a
    /// single record.
    pub fn is_cycle_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Unauthorized(_) | SyncError::Storage(_) | SyncError::Cancelled
        )
    }

    /// Classifies the error.
    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::Transport { retryable: true, .. } | SyncError::Timeout => {
                ErrorClass::Transient
            }
            SyncError::Transport { retryable: false, .. } | SyncError::Rejected { .. } => {
                ErrorClass::Rejected
            }
            SyncError::Unauthorized(_) => ErrorClass::Unauthorized,
            SyncError::Storage(_)
            | SyncError::Protocol(_)
            | SyncError::Cancelled
            | SyncError::CycleInProgress(_) => ErrorClass::System,
            SyncError::RecordNotFound(_) | SyncError::RecordDeleted(_) => ErrorClass::Local,
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::Protocol(err.to_string())
    }
}

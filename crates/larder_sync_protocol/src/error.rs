//! Protocol error types.

use thiserror::Error;

/// Result type for protocol encoding and parsing.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors produced while encoding or parsing wire messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A JSON body could not be encoded or decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A query string parameter is malformed.
    #[error("invalid query parameter `{name}`: {message}")]
    InvalidQuery {
        /// Parameter name.
        name: String,
        /// What was wrong with it.
        message: String,
    },

    /// The request path does not match `/<resource>` or `/<resource>/<id>`.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A record is missing one of the envelope fields.
    #[error("record is missing field `{0}`")]
    MissingField(&'static str),

    /// A record envelope field has the wrong shape.
    #[error("record field `{field}` is invalid: {message}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// What was wrong with it.
        message: String,
    },
}

impl ProtocolError {
    pub(crate) fn query(name: &str, message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            name: name.to_string(),
            message: message.into(),
        }
    }
}

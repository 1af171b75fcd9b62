//! Error types for the reference server.

use larder_sync_protocol::{Method, ProtocolError};
use thiserror::Error;
use uuid::Uuid;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur while serving a request.
///
/// Each variant maps to one HTTP status via [`ServerError::status`].
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Missing, malformed or expired credentials.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// The record does not exist.
    #[error("{resource}/{id} not found")]
    NotFound {
        /// Resource name.
        resource: String,
        /// Record ID.
        id: Uuid,
    },

    /// The resource is not registered.
    #[error("unknown resource: {0}")]
    UnknownResource(String),

    /// The route exists but not for this method.
    #[error("method {method} not allowed on {path}")]
    MethodNotAllowed {
        /// Request method.
        method: Method,
        /// Request path.
        path: String,
    },

    /// The request conflicts with server state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A resource validation hook refused the record.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// HTTP status code for this error.
    pub fn status(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) => 400,
            ServerError::NotAuthorized(_) => 401,
            ServerError::NotFound { .. } | ServerError::UnknownResource(_) => 404,
            ServerError::MethodNotAllowed { .. } => 405,
            ServerError::Conflict(_) => 409,
            ServerError::Validation(_) => 422,
            ServerError::Internal(_) => 500,
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status())
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status() >= 500
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        ServerError::InvalidRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert!(!ServerError::InvalidRequest("bad".into()).is_server_error());
        assert_eq!(ServerError::Validation("x".into()).status(), 422);
        assert_eq!(ServerError::UnknownResource("pets".into()).status(), 404);
    }

    #[test]
    fn error_display() {
        let id = Uuid::nil();
        let err = ServerError::NotFound {
            resource: "recipes".into(),
            id,
        };
        assert_eq!(err.to_string(), format!("recipes/{id} not found"));

        let err = ServerError::MethodNotAllowed {
            method: Method::Put,
            path: "/recipes".into(),
        };
        assert!(err.to_string().contains("PUT"));
        assert_eq!(err.status(), 405);
    }

    #[test]
    fn protocol_errors_are_bad_requests() {
        let err: ServerError = ProtocolError::MissingField("id").into();
        assert_eq!(err.status(), 400);
    }
}

//! Transport-neutral HTTP request and response types.
//!
//! The gateway and the reference server exchange these instead of binding
//! to a particular HTTP library. A real deployment adapts them to its
//! client of choice; tests route them in-process.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `DELETE`
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        })
    }
}

/// An outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Method.
    pub method: Method,
    /// Full URL or path, including the query string.
    pub url: String,
    /// Header map; names are lowercase.
    pub headers: BTreeMap<String, String>,
    /// JSON body, if any.
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// Creates a request without headers or body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    /// Attaches a JSON body.
    pub fn with_json<T: Serialize + ?Sized>(mut self, body: &T) -> ProtocolResult<Self> {
        self.body = Some(serde_json::to_vec(body)?);
        self.headers
            .insert("content-type".into(), "application/json".into());
        Ok(self)
    }

    /// Sets a header; the name is stored lowercase.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Returns a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Returns the bearer token from the `authorization` header.
    pub fn bearer_token(&self) -> Option<&str> {
        self.header("authorization")
            .and_then(|v| v.strip_prefix("Bearer "))
    }
}

/// An incoming response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Raw body.
    pub body: Vec<u8>,
}

/// JSON body used for every non-2xx response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable reason.
    pub error: String,
}

impl HttpResponse {
    /// Creates a JSON response.
    pub fn json<T: Serialize + ?Sized>(status: u16, body: &T) -> ProtocolResult<Self> {
        Ok(Self {
            status,
            body: serde_json::to_vec(body)?,
        })
    }

    /// Creates an error response with an [`ErrorBody`].
    pub fn error(status: u16, message: impl Into<String>) -> Self {
        let body = ErrorBody {
            error: message.into(),
        };
        Self {
            status,
            // ErrorBody always serializes.
            body: serde_json::to_vec(&body).unwrap_or_default(),
        }
    }

    /// Creates an empty `204 No Content` response.
    pub fn no_content() -> Self {
        Self {
            status: 204,
            body: Vec::new(),
        }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decodes the body as JSON.
    pub fn decode_json<T: serde::de::DeserializeOwned>(&self) -> ProtocolResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Best-effort error message from an [`ErrorBody`] or the raw body.
    pub fn error_message(&self) -> String {
        match serde_json::from_slice::<ErrorBody>(&self.body) {
            Ok(body) => body.error,
            Err(_) => String::from_utf8_lossy(&self.body).into_owned(),
        }
    }
}

/// A parsed request path: `/<resource>[/<id>][?<query>]`.
///
/// Resource names may contain `-` and lowercase ASCII letters and digits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Resource path including the leading slash, e.g. `/recipes`.
    pub resource: String,
    /// Record ID for item routes.
    pub id: Option<Uuid>,
    /// Raw query string, without the `?`.
    pub query: Option<String>,
}

impl Route {
    /// Parses a path relative to the server root.
    pub fn parse(path: &str) -> ProtocolResult<Self> {
        let (path, query) = match path.split_once('?') {
            Some((p, q)) => (p, Some(q.to_string())),
            None => (path, None),
        };

        let rest = path
            .strip_prefix('/')
            .ok_or_else(|| ProtocolError::InvalidPath(path.to_string()))?;
        let mut segments = rest.split('/');

        let resource = segments
            .next()
            .filter(|s| is_resource_name(s))
            .ok_or_else(|| ProtocolError::InvalidPath(path.to_string()))?;

        let id = match segments.next() {
            None | Some("") => None,
            Some(raw) => Some(
                Uuid::parse_str(raw).map_err(|_| ProtocolError::InvalidPath(path.to_string()))?,
            ),
        };

        if segments.next().is_some() {
            return Err(ProtocolError::InvalidPath(path.to_string()));
        }

        Ok(Self {
            resource: format!("/{resource}"),
            id,
            query,
        })
    }
}

fn is_resource_name(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

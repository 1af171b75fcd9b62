//! Incremental list queries and paginated responses.

use crate::error::{ProtocolError, ProtocolResult};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Query for `GET /<resource>`.
///
/// Returns canonical records with `updated_at` strictly greater than
/// `updated_after`, one page at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    /// Lower bound (exclusive) on `updated_at`.
    pub updated_after: DateTime<Utc>,
    /// Opaque page token from a previous [`ListPage::next_cursor`].
    pub cursor: Option<String>,
    /// Requested page size; the server may cap it.
    pub limit: Option<u32>,
}

impl ListQuery {
    /// Creates a query for the first page after `updated_after`.
    pub fn new(updated_after: DateTime<Utc>) -> Self {
        Self {
            updated_after,
            cursor: None,
            limit: None,
        }
    }

    /// Sets the page size.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Continues from a page token.
    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    /// Encodes as a URL query string (without the leading `?`).
    ///
    /// Timestamps use RFC 3339 with a `Z` suffix and microseconds, which
    /// keeps the value free of characters needing percent-encoding.
    pub fn to_query_string(&self) -> String {
        let mut parts = vec![format!(
            "updated_after={}",
            format_timestamp(&self.updated_after)
        )];
        if let Some(cursor) = &self.cursor {
            parts.push(format!("cursor={cursor}"));
        }
        if let Some(limit) = self.limit {
            parts.push(format!("limit={limit}"));
        }
        parts.join("&")
    }

    /// Parses a URL query string (without the leading `?`).
    ///
    /// A missing `updated_after` means "since the epoch". Unknown
    /// parameters are ignored.
    pub fn from_query_string(query: &str) -> ProtocolResult<Self> {
        let mut result = Self::new(DateTime::<Utc>::UNIX_EPOCH);

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            match name {
                "updated_after" => {
                    result.updated_after = parse_timestamp(value)
                        .map_err(|e| ProtocolError::query(name, e.to_string()))?;
                }
                "cursor" => {
                    if !is_token(value) {
                        return Err(ProtocolError::query(name, "page token must be URL-safe"));
                    }
                    result.cursor = Some(value.to_string());
                }
                "limit" => {
                    let limit = value
                        .parse::<u32>()
                        .map_err(|e| ProtocolError::query(name, e.to_string()))?;
                    result.limit = Some(limit);
                }
                _ => {}
            }
        }

        Ok(result)
    }
}

/// One page of a list response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListPage {
    /// Canonical records and deletion markers, ordered by
    /// (`updated_at`, `id`). See [`crate::DeletionMarker`].
    pub records: Vec<Value>,
    /// Token for the next page; `None` on the last page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    /// Server clock when the listing began.
    ///
    /// Everything changed at or before this instant and after the query's
    /// `updated_after` is covered by the full set of pages.
    pub server_time: DateTime<Utc>,
}

impl ListPage {
    /// Creates a final page.
    pub fn last(records: Vec<Value>, server_time: DateTime<Utc>) -> Self {
        Self {
            records,
            next_cursor: None,
            server_time,
        }
    }

    /// Returns true if more pages follow.
    pub fn has_more(&self) -> bool {
        self.next_cursor.is_some()
    }
}

/// Keyset position used as a page token.
///
/// Pages are ordered by (`updated_at`, `id`); the next page starts strictly
/// after the last record of the previous one. Unlike an offset, the
/// position stays valid when records are modified between page requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PageToken {
    /// `updated_at` of the last record returned.
    pub updated_at: DateTime<Utc>,
    /// ID of the last record returned.
    pub id: Uuid,
}

impl PageToken {
    /// Encodes the token as `<micros>_<hex id>`.
    pub fn encode(&self) -> String {
        format!("{}_{}", self.updated_at.timestamp_micros(), self.id.simple())
    }

    /// Decodes a token produced by [`PageToken::encode`].
    pub fn decode(token: &str) -> ProtocolResult<Self> {
        let invalid = || ProtocolError::query("cursor", format!("malformed page token {token:?}"));
        let (micros, id) = token.split_once('_').ok_or_else(invalid)?;
        let micros = micros.parse::<i64>().map_err(|_| invalid())?;
        let updated_at = DateTime::from_timestamp_micros(micros).ok_or_else(invalid)?;
        let id = Uuid::parse_str(id).map_err(|_| invalid())?;
        Ok(Self { updated_at, id })
    }
}

/// Formats a timestamp the way the wire format expects it.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parses an RFC 3339 timestamp into UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value).map(|ts| ts.with_timezone(&Utc))
}

fn is_token(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

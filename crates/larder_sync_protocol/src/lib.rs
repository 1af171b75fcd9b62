//! # Larder Sync Protocol
//!
//! Wire types for the Larder remote gateway.
//!
//! This crate provides:
//! - [`ListQuery`] / [`ListPage`] for incremental, paginated pulls
//! - [`RecordMeta`] for the envelope every transport record carries
//! - [`DeletionMarker`] for deletions carried in list pages
//! - [`HttpRequest`] / [`HttpResponse`] / [`Route`] for transport-neutral
//!   HTTP plumbing
//! - JSON encoding via `serde_json`
//!
//! ## Endpoints
//!
//! | Method | Path | Body | Response |
//! |---|---|---|---|
//! | `GET` | `/R?updated_after=&cursor=&limit=` | - | [`ListPage`] with records and deletion markers |
//! | `GET` | `/R/{id}` | - | canonical record |
//! | `POST` | `/R` | client record | canonical record |
//! | `PUT` | `/R/{id}` | client record | canonical record |
//! | `DELETE` | `/R/{id}` | - | `204`, idempotent |
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod http;
mod list;
mod record;

pub use error::{ProtocolError, ProtocolResult};
pub use http::{ErrorBody, HttpRequest, HttpResponse, Method, Route};
pub use list::{format_timestamp, parse_timestamp, ListPage, ListQuery, PageToken};
pub use record::{
    DeletionMarker, RecordMeta, FIELD_CREATED_AT, FIELD_DELETED, FIELD_ID, FIELD_UPDATED_AT,
};

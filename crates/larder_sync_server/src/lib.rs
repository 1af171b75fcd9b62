//! # Larder Sync Server
//!
//! Reference remote store for the Larder sync engine.
//!
//! This crate provides:
//! - The record endpoints (list, get, create, update, delete) for any
//!   number of registered resources
//! - A server clock issuing strictly increasing `updated_at` values
//! - Per-resource validation and decoration hooks
//! - Authentication (HMAC-SHA256 bearer tokens)
//! - Fault injection for tests
//!
//! # Architecture
//!
//! The server is transport-neutral: [`SyncServer::handle`] takes a
//! [`larder_sync_protocol::HttpRequest`] and returns a response. Tests
//! route requests to it in-process; a deployment puts it behind an HTTP
//! listener.
//!
//! # Authentication
//!
//! Authentication is optional:
//!
//! ```rust
//! use larder_sync_server::{ServerConfig, SyncServer};
//! use uuid::Uuid;
//!
//! let config = ServerConfig::new().with_auth(b"my-secure-secret".to_vec());
//! let server = SyncServer::new(config);
//!
//! // Hand each device a token; it sends `Authorization: Bearer <token>`.
//! let token = server.issue_token(Uuid::new_v4()).unwrap();
//! assert!(!token.is_empty());
//! ```
//!
//! # Semantics
//!
//! - Creating an existing ID replaces the record (retry-safe create).
//! - Updating an unknown ID is a 404.
//! - Deletes are idempotent and remembered; a deleted ID cannot be
//!   created again (409).
//! - Lists are ordered by (`updated_at`, `id`) and paginated with keyset
//!   tokens. Deleted IDs appear in them as deletion markers.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod handler;
mod server;
mod store;

pub use auth::{AuthConfig, TokenValidator};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler, RequestLog};
pub use server::SyncServer;
pub use store::{Created, Decorator, RecordStore, ResourceOptions, Validator, FIELD_SERVER_VERSION};

//! # Larder Storage
//!
//! Local store contract and sync record model for Larder.
//!
//! This crate provides the lowest layer of the offline-first stack: the
//! record envelope every entity is wrapped in, the [`LocalStore`] contract
//! the sync engine depends on, and cursor persistence.
//!
//! ## Design Principles
//!
//! - Stores are dumb tables (get, scan, upsert, remove)
//! - Stores know the sync status only to answer `list_dirty`
//! - Must be `Send + Sync`; the engine serializes per-record writes itself
//! - Deletion is a status change first, a physical removal later
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For tests and ephemeral sessions
//! - [`FileStore`] - One CBOR file per table, atomic rewrites
//! - [`MemoryCursorStore`] / [`FileCursorStore`] - Per-resource sync cursors
//!
//! ## Example
//!
//! ```rust
//! use larder_storage::{InMemoryStore, LocalStore, SyncRecord, SyncStatus};
//!
//! let store = InMemoryStore::new();
//! let record = SyncRecord::new_local("basmati rice".to_string(), chrono::Utc::now());
//! store.upsert(record).unwrap();
//! assert_eq!(store.list_dirty().unwrap()[0].status, SyncStatus::PendingCreate);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cursor;
mod error;
mod file;
mod memory;
mod record;
mod store;

pub use cursor::{epoch, CursorStore, FileCursorStore, MemoryCursorStore};
pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use record::{SyncRecord, SyncStatus};
pub use store::LocalStore;

//! # Larder Sync Engine
//!
//! Offline-first synchronization between local stores and a REST backend.
//!
//! This crate provides:
//! - Mutation tracking: local writes land immediately with a pending status
//! - Sync coordination: push, pull and merge per entity type
//! - Bounded concurrent pushes with per-record failure isolation
//! - Incremental pulls driven by a persisted server-time cursor
//! - A scheduler with interval, manual and backoff-retry triggers
//! - HTTP gateway abstraction with a loopback client for tests
//!
//! ## Architecture
//!
//! Each entity type gets one [`EntitySyncService`], built from a
//! [`larder_storage::LocalStore`], a [`RemoteGateway`] and an
//! [`EntityAdapter`]. A cycle is **push-then-pull**:
//! 1. Push every dirty record that is not already in flight
//! 2. Pull every page changed since the cursor
//! 3. Merge, then advance the cursor
//!
//! ## Key Invariants
//!
//! - A record with pending local changes is never overwritten by a pull
//! - A record deleted on the server is removed locally unless it has
//!   pending local changes
//! - A record the server refused is not pushed again until it changes
//! - At most one request per record is in flight at any time
//! - At most one cycle per entity type runs at any time
//! - The cursor never moves backwards
//! - A failed record stays pending and does not affect other records
//! - Record locks are never held across an `.await`

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod config;
mod coordinator;
mod error;
mod http;
mod resolver;
mod scheduler;
mod service;
mod state;
mod table;
mod tracker;
mod transport;

#[cfg(test)]
mod test_support;

pub use adapter::{decode_record, encode_record, EntityAdapter};
pub use config::{RetryConfig, SyncConfig};
pub use coordinator::SyncCoordinator;
pub use error::{ErrorClass, SyncError, SyncResult};
pub use http::{HttpClient, HttpGateway, LoopbackClient, LoopbackServer};
pub use resolver::{MergeOutcome, MergeResolver, RemoteChange};
pub use scheduler::{CycleRunner, SchedulerEvent, SyncScheduler};
pub use service::EntitySyncService;
pub use state::{CycleReport, RecordFailure, SyncOp, SyncState, SyncStats};
pub use table::{InFlightGuard, InFlightRegistry, RecordLocks, SyncTable};
pub use tracker::{DeleteOutcome, MutationTracker};
pub use transport::{GatewayOp, MockFailure, MockGateway, RemoteGateway, WriteGate};

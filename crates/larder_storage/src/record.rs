//! The sync record envelope shared by every entity type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Synchronization state of a local record.
///
/// Exactly one status applies to a record at any time. Every status other
/// than [`SyncStatus::Synced`] marks the record as dirty, which means it
/// still has local intent the server has not acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Local copy matches the last canonical server version.
    Synced,
    /// Created locally, never acknowledged by the server.
    PendingCreate,
    /// Known to the server, edited locally since.
    PendingUpdate,
    /// Deleted locally; kept as a tombstone until the server confirms.
    PendingDelete,
}

impl SyncStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [SyncStatus; 4] = [
        SyncStatus::Synced,
        SyncStatus::PendingCreate,
        SyncStatus::PendingUpdate,
        SyncStatus::PendingDelete,
    ];

    /// Returns true if the record carries unacknowledged local intent.
    pub fn is_dirty(&self) -> bool {
        !matches!(self, SyncStatus::Synced)
    }

    /// Returns true if the record is a tombstone.
    pub fn is_tombstone(&self) -> bool {
        matches!(self, SyncStatus::PendingDelete)
    }

    /// Stable lowercase name, used in logs and CLI output.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::PendingCreate => "pending_create",
            SyncStatus::PendingUpdate => "pending_update",
            SyncStatus::PendingDelete => "pending_delete",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A domain entity wrapped with its sync metadata.
///
/// The identifier is assigned on the device at creation time so records
/// created offline are addressable before the server has seen them.
///
/// `local_revision` increases on every local mutation and never on server
/// writes. A push that finishes compares it against the revision it
/// dispatched to detect an edit that raced with the request.
///
/// `rejected_revision` is set when the server refuses a push. While it
/// equals `local_revision` the record is not pushed again; the next local
/// edit moves the revision past it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord<T> {
    /// Client-assigned stable identifier.
    pub id: Uuid,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time (local or server).
    pub updated_at: DateTime<Utc>,
    /// Current sync status.
    pub status: SyncStatus,
    /// Local mutation counter.
    pub local_revision: u64,
    /// Revision the server last refused, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_revision: Option<u64>,
    /// The entity itself.
    pub body: T,
}

impl<T> SyncRecord<T> {
    /// Creates a record for a fresh local creation.
    pub fn new_local(body: T, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            status: SyncStatus::PendingCreate,
            local_revision: 1,
            rejected_revision: None,
            body,
        }
    }

    /// Creates a record mirroring a canonical server version.
    pub fn synced(
        id: Uuid,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        body: T,
    ) -> Self {
        Self {
            id,
            created_at,
            updated_at,
            status: SyncStatus::Synced,
            local_revision: 0,
            rejected_revision: None,
            body,
        }
    }

    /// Returns true if the record carries unacknowledged local intent.
    pub fn is_dirty(&self) -> bool {
        self.status.is_dirty()
    }

    /// Returns true if the server refused the current local revision.
    pub fn is_rejected(&self) -> bool {
        self.is_dirty() && self.rejected_revision == Some(self.local_revision)
    }
}

//! Sync state, statistics and per-cycle reports.

use crate::error::SyncError;
use crate::resolver::MergeOutcome;
use chrono::{DateTime, Utc};
use larder_storage::SyncStatus;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// The current state of a coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No cycle has run yet.
    Idle,
    /// Pushing pending local changes.
    Pushing,
    /// Pulling server changes.
    Pulling,
    /// Merging pulled records into the store.
    Merging,
    /// The last cycle completed.
    Synced,
    /// The last cycle failed.
    Error,
}

impl SyncState {
    /// Returns true while a cycle is running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Pushing | SyncState::Pulling | SyncState::Merging
        )
    }
}

/// Statistics accumulated across cycles.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Cycles that ran to completion.
    pub cycles_completed: u64,
    /// Cycles aborted by an error.
    pub cycles_failed: u64,
    /// Records confirmed by the server.
    pub records_pushed: u64,
    /// Records received from the server.
    pub records_pulled: u64,
    /// Per-record push failures.
    pub push_failures: u64,
    /// Completion time of the last successful cycle.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Message of the last cycle-level error.
    pub last_error: Option<String>,
}

/// The remote operation a record needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOp {
    /// `create`
    Create,
    /// `update`
    Update,
    /// `delete`
    Delete,
    /// A pulled record that could not be mapped.
    Pull,
}

impl SyncOp {
    /// The push operation for a pending status, or `None` for `Synced`.
    pub fn for_status(status: SyncStatus) -> Option<Self> {
        match status {
            SyncStatus::PendingCreate => Some(SyncOp::Create),
            SyncStatus::PendingUpdate => Some(SyncOp::Update),
            SyncStatus::PendingDelete => Some(SyncOp::Delete),
            SyncStatus::Synced => None,
        }
    }
}

impl fmt::Display for SyncOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncOp::Create => "create",
            SyncOp::Update => "update",
            SyncOp::Delete => "delete",
            SyncOp::Pull => "pull",
        })
    }
}

/// A record that failed to sync in a cycle. It stays pending.
///
/// Transient failures are retried on the next cycle. A record the server
/// rejected is held back until it changes; see [`CycleReport::held`].
#[derive(Debug)]
pub struct RecordFailure {
    /// Record ID (nil if a pulled record had no readable ID).
    pub id: Uuid,
    /// What was attempted.
    pub op: SyncOp,
    /// Why it failed.
    pub error: SyncError,
}

/// Result of one sync cycle.
#[derive(Debug)]
pub struct CycleReport {
    /// Resource the cycle ran for.
    pub resource: &'static str,
    /// Creates confirmed by the server.
    pub created: usize,
    /// Updates confirmed by the server.
    pub updated: usize,
    /// Deletes confirmed by the server.
    pub deleted: usize,
    /// Dirty records skipped because a request for them was still in
    /// flight.
    pub deferred: usize,
    /// Dirty records not pushed because the server refused their current
    /// version in an earlier cycle.
    pub held: Vec<Uuid>,
    /// Per-record failures.
    pub failures: Vec<RecordFailure>,
    /// Pages fetched.
    pub pages: usize,
    /// Records received.
    pub pulled: usize,
    /// How pulled records were merged.
    pub merge: MergeOutcome,
    /// Cursor after the cycle.
    pub cursor: DateTime<Utc>,
    /// Wall-clock duration.
    pub duration: Duration,
}

impl CycleReport {
    /// Creates an empty report.
    pub fn new(resource: &'static str, cursor: DateTime<Utc>) -> Self {
        Self {
            resource,
            created: 0,
            updated: 0,
            deleted: 0,
            deferred: 0,
            held: Vec::new(),
            failures: Vec::new(),
            pages: 0,
            pulled: 0,
            merge: MergeOutcome::default(),
            cursor,
            duration: Duration::ZERO,
        }
    }

    /// Records confirmed by the server in this cycle.
    pub fn pushed(&self) -> usize {
        self.created + self.updated + self.deleted
    }

    /// Returns true if no record failed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Returns the failure for `id`, if any.
    pub fn failure(&self, id: Uuid) -> Option<&RecordFailure> {
        self.failures.iter().find(|f| f.id == id)
    }

    pub(crate) fn count_push(&mut self, op: SyncOp) {
        match op {
            SyncOp::Create => self.created += 1,
            SyncOp::Update => self.updated += 1,
            SyncOp::Delete => self.deleted += 1,
            SyncOp::Pull => {}
        }
    }
}

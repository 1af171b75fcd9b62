//! Local mutation tracking.
//!
//! Every local change goes to the store immediately with a pending status.
//! No network call happens here; pushing is the coordinator's job.

use crate::error::{SyncError, SyncResult};
use crate::table::SyncTable;
use chrono::Utc;
use larder_storage::{SyncRecord, SyncStatus};
use std::sync::Arc;
use uuid::Uuid;

/// What [`MutationTracker::on_delete`] did with the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The record never reached the server and was removed outright.
    Purged,
    /// The record is kept as a `PendingDelete` tombstone until the server
    /// confirms the deletion.
    Tombstoned,
    /// No such record.
    Missing,
}

/// Records local creates, updates and deletes.
pub struct MutationTracker<T> {
    table: Arc<SyncTable<T>>,
}

impl<T> Clone for MutationTracker<T> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> MutationTracker<T> {
    /// Creates a tracker over a shared table.
    pub fn new(table: Arc<SyncTable<T>>) -> Self {
        Self { table }
    }

    /// Stores a new record as `PendingCreate` and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Storage`] if the record cannot be stored.
    pub fn on_create(&self, body: T) -> SyncResult<SyncRecord<T>> {
        let record = SyncRecord::new_local(body, Utc::now());
        let _lock = self.table.locks.lock(record.id);
        self.table.store.upsert(record.clone())?;
        tracing::debug!(id = %record.id, "tracked local create");
        Ok(record)
    }

    /// Replaces the body of an existing record.
    ///
    /// A `PendingCreate` record stays `PendingCreate`; anything else
    /// becomes `PendingUpdate`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::RecordNotFound`] for unknown IDs and
    /// [`SyncError::RecordDeleted`] for tombstones.
    pub fn on_update(&self, id: Uuid, body: T) -> SyncResult<SyncRecord<T>> {
        self.modify(id, move |current| *current = body)
    }

    /// Edits the body of an existing record in place.
    ///
    /// The closure runs under the record lock, so a concurrent sync can't
    /// interleave with the read-modify-write.
    ///
    /// # Errors
    ///
    /// Same as [`MutationTracker::on_update`].
    pub fn modify<F>(&self, id: Uuid, edit: F) -> SyncResult<SyncRecord<T>>
    where
        F: FnOnce(&mut T),
    {
        let _lock = self.table.locks.lock(id);
        let mut record = self
            .table
            .store
            .get(id)?
            .ok_or(SyncError::RecordNotFound(id))?;
        if record.status.is_tombstone() {
            return Err(SyncError::RecordDeleted(id));
        }

        edit(&mut record.body);
        record.updated_at = Utc::now().max(record.updated_at);
        record.local_revision += 1;
        record.rejected_revision = None;
        if record.status != SyncStatus::PendingCreate {
            record.status = SyncStatus::PendingUpdate;
        }

        self.table.store.upsert(record.clone())?;
        tracing::debug!(%id, revision = record.local_revision, "tracked local update");
        Ok(record)
    }

    /// Deletes a record.
    ///
    /// A record the server has never seen is purged without a network
    /// call, unless its create request is in flight right now; then it is
    /// tombstoned like any other record so the server-side copy gets
    /// deleted too.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Storage`] if the store fails.
    pub fn on_delete(&self, id: Uuid) -> SyncResult<DeleteOutcome> {
        let _lock = self.table.locks.lock(id);
        let Some(mut record) = self.table.store.get(id)? else {
            return Ok(DeleteOutcome::Missing);
        };

        match record.status {
            SyncStatus::PendingDelete => Ok(DeleteOutcome::Tombstoned),
            SyncStatus::PendingCreate if !self.table.in_flight.contains(id) => {
                self.table.store.remove(id)?;
                tracing::debug!(%id, "purged unsynced record");
                Ok(DeleteOutcome::Purged)
            }
            _ => {
                record.status = SyncStatus::PendingDelete;
                record.local_revision += 1;
                record.rejected_revision = None;
                record.updated_at = Utc::now().max(record.updated_at);
                self.table.store.upsert(record)?;
                tracing::debug!(%id, "tombstoned record");
                Ok(DeleteOutcome::Tombstoned)
            }
        }
    }

    /// Makes a record the server refused eligible for the next push
    /// without changing it.
    ///
    /// Returns false if the record is missing or was not refused.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Storage`] if the store fails.
    pub fn retry(&self, id: Uuid) -> SyncResult<bool> {
        let _lock = self.table.locks.lock(id);
        let Some(mut record) = self.table.store.get(id)? else {
            return Ok(false);
        };
        if !record.is_rejected() {
            return Ok(false);
        }
        record.rejected_revision = None;
        self.table.store.upsert(record)?;
        tracing::debug!(%id, "cleared rejection");
        Ok(true)
    }

    /// Returns the records whose current version the server refused.
    ///
    /// These stay dirty but are not pushed until edited, deleted or
    /// passed to [`MutationTracker::retry`].
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Storage`] if the store fails.
    pub fn rejected(&self) -> SyncResult<Vec<SyncRecord<T>>> {
        Ok(self
            .table
            .store
            .list_dirty()?
            .into_iter()
            .filter(SyncRecord::is_rejected)
            .collect())
    }

    /// Returns a record, tombstones excluded.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Storage`] if the store fails.
    pub fn get(&self, id: Uuid) -> SyncResult<Option<SyncRecord<T>>> {
        Ok(self
            .table
            .store
            .get(id)?
            .filter(|r| !r.status.is_tombstone()))
    }

    /// Returns every visible record, tombstones excluded.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Storage`] if the store fails.
    pub fn list(&self) -> SyncResult<Vec<SyncRecord<T>>> {
        Ok(self
            .table
            .store
            .list_all()?
            .into_iter()
            .filter(|r| !r.status.is_tombstone())
            .collect())
    }

    /// Returns the number of records awaiting push, tombstones included.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Storage`] if the store fails.
    pub fn pending_count(&self) -> SyncResult<usize> {
        Ok(self.table.store.list_dirty()?.len())
    }
}

//! Merging pulled records into the local store.
//!
//! Policy: a record with unpushed local changes is never overwritten or
//! removed by the server's version. Everything else adopts the server's
//! version, including its deletions.

use crate::error::SyncResult;
use crate::table::SyncTable;
use larder_storage::{SyncRecord, SyncStatus};
use std::sync::Arc;
use uuid::Uuid;

/// One entry of a pulled change feed.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteChange<T> {
    /// A canonical record, new or changed.
    Upsert(SyncRecord<T>),
    /// The record was deleted on the server.
    Deleted(Uuid),
}

impl<T> RemoteChange<T> {
    /// The record the change applies to.
    pub fn id(&self) -> Uuid {
        match self {
            RemoteChange::Upsert(record) => record.id,
            RemoteChange::Deleted(id) => *id,
        }
    }
}

/// Counts from one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Records that did not exist locally.
    pub inserted: usize,
    /// `Synced` records replaced by a newer server version.
    pub overwritten: usize,
    /// `Synced` records removed because the server deleted them.
    pub removed: usize,
    /// Changes left unapplied because the record has pending local
    /// changes.
    pub skipped: usize,
    /// Changes that matched the local state already.
    pub unchanged: usize,
}

impl MergeOutcome {
    /// Total changes examined.
    pub fn total(&self) -> usize {
        self.inserted + self.overwritten + self.removed + self.skipped + self.unchanged
    }

    /// Changes actually applied to the store.
    pub fn written(&self) -> usize {
        self.inserted + self.overwritten + self.removed
    }
}

/// Applies pulled changes to the local table.
pub struct MergeResolver<T> {
    table: Arc<SyncTable<T>>,
}

impl<T: Clone + PartialEq + Send + Sync + 'static> MergeResolver<T> {
    /// Creates a resolver over a shared table.
    pub fn new(table: Arc<SyncTable<T>>) -> Self {
        Self { table }
    }

    /// Merges pulled changes, each under its record lock.
    ///
    /// Changes are processed in order, so when the same ID appears twice
    /// the later change wins.
    ///
    /// # Errors
    ///
    /// Returns the first storage error; changes merged before it stay
    /// merged.
    pub fn merge(&self, incoming: Vec<RemoteChange<T>>) -> SyncResult<MergeOutcome> {
        let mut outcome = MergeOutcome::default();

        for change in incoming {
            match change {
                RemoteChange::Upsert(remote) => self.merge_record(remote, &mut outcome)?,
                RemoteChange::Deleted(id) => self.merge_deletion(id, &mut outcome)?,
            }
        }

        Ok(outcome)
    }

    fn merge_record(&self, remote: SyncRecord<T>, outcome: &mut MergeOutcome) -> SyncResult<()> {
        let _lock = self.table.locks.lock(remote.id);
        match self.table.store.get(remote.id)? {
            None => {
                self.table.store.upsert(remote)?;
                outcome.inserted += 1;
            }
            Some(local) if local.is_dirty() => {
                tracing::debug!(id = %local.id, status = %local.status, "keeping pending local change");
                outcome.skipped += 1;
            }
            Some(local) if same_content(&local, &remote) => {
                outcome.unchanged += 1;
            }
            Some(local) => {
                let mut next = remote;
                next.status = SyncStatus::Synced;
                next.local_revision = local.local_revision;
                self.table.store.upsert(next)?;
                outcome.overwritten += 1;
            }
        }
        Ok(())
    }

    fn merge_deletion(&self, id: Uuid, outcome: &mut MergeOutcome) -> SyncResult<()> {
        let _lock = self.table.locks.lock(id);
        match self.table.store.get(id)? {
            None => outcome.unchanged += 1,
            Some(local) if local.is_dirty() => {
                tracing::debug!(%id, status = %local.status, "keeping pending local change over remote deletion");
                outcome.skipped += 1;
            }
            Some(_) => {
                self.table.store.remove(id)?;
                tracing::debug!(%id, "removed record deleted on server");
                outcome.removed += 1;
            }
        }
        Ok(())
    }
}

fn same_content<T: PartialEq>(local: &SyncRecord<T>, remote: &SyncRecord<T>) -> bool {
    local.body == remote.body
        && local.updated_at == remote.updated_at
        && local.created_at == remote.created_at
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{note_table, Note};
    use crate::tracker::MutationTracker;
    use chrono::{Duration, Utc};
    use larder_storage::LocalStore;

    fn remote(id: Uuid, text: &str, minutes: i64) -> RemoteChange<Note> {
        let t = Utc::now() + Duration::minutes(minutes);
        RemoteChange::Upsert(SyncRecord::synced(id, t, t, Note::new(text)))
    }

    fn synced(id: Uuid, text: &str) -> SyncRecord<Note> {
        let t = Utc::now();
        SyncRecord::synced(id, t, t, Note::new(text))
    }

    #[test]
    fn inserts_new_records() {
        let (store, table) = note_table();
        let resolver = MergeResolver::new(table);

        let outcome = resolver
            .merge(vec![remote(Uuid::new_v4(), "a", 0), remote(Uuid::new_v4(), "b", 0)])
            .unwrap();
        assert_eq!(outcome.inserted, 2);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn overwrites_synced_records() {
        let (store, table) = note_table();
        let id = Uuid::new_v4();
        let mut old = synced(id, "old");
        old.local_revision = 7;
        store.upsert(old).unwrap();

        let outcome = MergeResolver::new(table)
            .merge(vec![remote(id, "new", 5)])
            .unwrap();
        assert_eq!(outcome.overwritten, 1);

        let stored = store.get(id).unwrap().unwrap();
        assert_eq!(stored.body.text, "new");
        assert_eq!(stored.status, SyncStatus::Synced);
        assert_eq!(stored.local_revision, 7);
    }

    #[test]
    fn pending_changes_win() {
        let (store, table) = note_table();
        let id = Uuid::new_v4();
        store.upsert(synced(id, "base")).unwrap();
        let tracker = MutationTracker::new(Arc::clone(&table));
        tracker.on_update(id, Note::new("local edit")).unwrap();

        let created = tracker.on_create(Note::new("unsynced")).unwrap();
        let deleted = synced(Uuid::new_v4(), "doomed");
        store.upsert(deleted.clone()).unwrap();
        tracker.on_delete(deleted.id).unwrap();

        let outcome = MergeResolver::new(table)
            .merge(vec![
                remote(id, "server edit", 5),
                remote(created.id, "server", 5),
                remote(deleted.id, "resurrected", 5),
            ])
            .unwrap();
        assert_eq!(outcome.skipped, 3);

        assert_eq!(store.get(id).unwrap().unwrap().body.text, "local edit");
        assert_eq!(store.get(created.id).unwrap().unwrap().body.text, "unsynced");
        assert_eq!(
            store.get(deleted.id).unwrap().unwrap().status,
            SyncStatus::PendingDelete
        );
    }

    #[test]
    fn remote_deletions_remove_synced_copies() {
        let (store, table) = note_table();
        let gone = Uuid::new_v4();
        store.upsert(synced(gone, "gone")).unwrap();

        let outcome = MergeResolver::new(table)
            .merge(vec![RemoteChange::Deleted(gone), RemoteChange::Deleted(Uuid::new_v4())])
            .unwrap();
        assert_eq!(outcome.removed, 1);
        assert_eq!(outcome.unchanged, 1);
        assert_eq!(outcome.written(), 1);
        assert!(store.get(gone).unwrap().is_none());
    }

    #[test]
    fn remote_deletions_keep_pending_edits() {
        let (store, table) = note_table();
        let id = Uuid::new_v4();
        store.upsert(synced(id, "base")).unwrap();
        let tracker = MutationTracker::new(Arc::clone(&table));
        tracker.on_update(id, Note::new("edited offline")).unwrap();

        let outcome = MergeResolver::new(table)
            .merge(vec![RemoteChange::Deleted(id)])
            .unwrap();
        assert_eq!(outcome.skipped, 1);

        let stored = store.get(id).unwrap().unwrap();
        assert_eq!(stored.status, SyncStatus::PendingUpdate);
        assert_eq!(stored.body.text, "edited offline");
    }

    #[test]
    fn identical_records_are_unchanged() {
        let (store, table) = note_table();
        let record = synced(Uuid::new_v4(), "same");
        store.upsert(record.clone()).unwrap();

        let outcome = MergeResolver::new(table)
            .merge(vec![RemoteChange::Upsert(record)])
            .unwrap();
        assert_eq!(outcome.unchanged, 1);
        assert_eq!(outcome.written(), 0);
        assert_eq!(outcome.total(), 1);
    }

    #[test]
    fn later_change_wins() {
        let (store, table) = note_table();
        let id = Uuid::new_v4();
        let resolver = MergeResolver::new(table);
        resolver
            .merge(vec![remote(id, "first", 0), remote(id, "second", 1)])
            .unwrap();
        assert_eq!(store.get(id).unwrap().unwrap().body.text, "second");

        resolver
            .merge(vec![remote(id, "third", 2), RemoteChange::Deleted(id)])
            .unwrap();
        assert!(store.get(id).unwrap().is_none());
    }
}

//! In-memory local store.

use crate::error::{StorageError, StorageResult};
use crate::record::SyncRecord;
use crate::store::LocalStore;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// An in-memory local store.
///
/// Suitable for:
/// - Unit tests
/// - Integration tests
/// - Sessions that do not need to survive a restart
///
/// The store can be switched offline with [`InMemoryStore::set_available`],
/// after which every operation fails with [`StorageError::Unavailable`].
/// Tests use it to simulate disk failures.
///
/// # Example
///
/// ```rust
/// use larder_storage::{InMemoryStore, LocalStore, SyncRecord};
///
/// let store = InMemoryStore::new();
/// let record = SyncRecord::new_local("oat milk".to_string(), chrono::Utc::now());
/// store.upsert(record.clone()).unwrap();
/// assert_eq!(store.get(record.id).unwrap(), Some(record));
/// ```
#[derive(Debug)]
pub struct InMemoryStore<T> {
    records: RwLock<BTreeMap<Uuid, SyncRecord<T>>>,
    available: AtomicBool,
}

impl<T> InMemoryStore<T> {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Creates a store pre-populated with records.
    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = SyncRecord<T>>) -> Self {
        Self {
            records: RwLock::new(records.into_iter().map(|r| (r.id, r)).collect()),
            available: AtomicBool::new(true),
        }
    }

    /// Returns the number of records, tombstones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Makes every subsequent operation succeed or fail.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable("in-memory store switched off".into()))
        }
    }
}

impl<T> Default for InMemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync> LocalStore<T> for InMemoryStore<T> {
    fn get(&self, id: Uuid) -> StorageResult<Option<SyncRecord<T>>> {
        self.check_available()?;
        Ok(self.records.read().get(&id).cloned())
    }

    fn list_all(&self) -> StorageResult<Vec<SyncRecord<T>>> {
        self.check_available()?;
        Ok(self.records.read().values().cloned().collect())
    }

    fn list_dirty(&self) -> StorageResult<Vec<SyncRecord<T>>> {
        self.check_available()?;
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| r.is_dirty())
            .cloned()
            .collect())
    }

    fn upsert(&self, record: SyncRecord<T>) -> StorageResult<()> {
        self.check_available()?;
        self.records.write().insert(record.id, record);
        Ok(())
    }

    fn remove(&self, id: Uuid) -> StorageResult<bool> {
        self.check_available()?;
        Ok(self.records.write().remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SyncStatus;
    use chrono::Utc;

    fn synced(body: &str) -> SyncRecord<String> {
        let now = Utc::now();
        SyncRecord::synced(Uuid::new_v4(), now, now, body.to_string())
    }

    #[test]
    fn memory_new_is_empty() {
        let store: InMemoryStore<String> = InMemoryStore::new();
        assert!(store.is_empty());
        assert!(store.list_all().unwrap().is_empty());
    }

    #[test]
    fn upsert_replaces_existing() {
        let store = InMemoryStore::new();
        let mut record = synced("flour");
        store.upsert(record.clone()).unwrap();

        record.body = "rye flour".into();
        store.upsert(record.clone()).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(record.id).unwrap().unwrap().body, "rye flour");
    }

    #[test]
    fn list_dirty_filters_synced() {
        let local = SyncRecord::new_local("eggs".to_string(), Utc::now());
        let mut tombstone = synced("butter");
        tombstone.status = SyncStatus::PendingDelete;
        let store = InMemoryStore::with_records([synced("salt"), local.clone(), tombstone.clone()]);

        let mut dirty: Vec<Uuid> = store.list_dirty().unwrap().into_iter().map(|r| r.id).collect();
        dirty.sort();
        let mut expected = vec![local.id, tombstone.id];
        expected.sort();
        assert_eq!(dirty, expected);
    }

    #[test]
    fn remove_reports_presence() {
        let store = InMemoryStore::new();
        let record = synced("rice");
        store.upsert(record.clone()).unwrap();

        assert!(store.remove(record.id).unwrap());
        assert!(!store.remove(record.id).unwrap());
        assert!(store.get(record.id).unwrap().is_none());
    }

    #[test]
    fn unavailable_store_fails_every_operation() {
        let store = InMemoryStore::new();
        let record = synced("oil");
        store.upsert(record.clone()).unwrap();

        store.set_available(false);
        assert!(matches!(store.get(record.id), Err(StorageError::Unavailable(_))));
        assert!(store.upsert(record.clone()).is_err());
        assert!(store.list_dirty().is_err());

        store.set_available(true);
        assert!(store.get(record.id).unwrap().is_some());
    }
}

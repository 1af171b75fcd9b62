//! Shared per-entity state: the local store plus the coordination
//! primitives the tracker and the coordinator both use.

use larder_storage::LocalStore;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

const LOCK_STRIPES: usize = 64;

/// Striped per-record locks.
///
/// Every read-modify-write of a single record, local or sync-driven, runs
/// under the record's lock. Locks are synchronous and must never be held
/// across an `.await`.
pub struct RecordLocks {
    stripes: Vec<Mutex<()>>,
}

impl RecordLocks {
    /// Creates the lock set.
    pub fn new() -> Self {
        Self {
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Locks the record `id`.
    pub fn lock(&self, id: Uuid) -> MutexGuard<'_, ()> {
        let stripe = (id.as_u128() % LOCK_STRIPES as u128) as usize;
        self.stripes[stripe].lock()
    }
}

impl Default for RecordLocks {
    fn default() -> Self {
        Self::new()
    }
}

/// Records with a push request currently outstanding.
///
/// A record is claimed before its request is dispatched and released only
/// after the response has been applied locally, so no record ever has two
/// requests in flight.
#[derive(Default)]
pub struct InFlightRegistry {
    ids: Mutex<HashSet<Uuid>>,
}

impl InFlightRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `id`, or returns `None` if it is already in flight.
    pub fn try_claim(self: &Arc<Self>, id: Uuid) -> Option<InFlightGuard> {
        if self.ids.lock().insert(id) {
            Some(InFlightGuard {
                registry: Arc::clone(self),
                id,
            })
        } else {
            None
        }
    }

    /// Returns true if `id` is in flight.
    pub fn contains(&self, id: Uuid) -> bool {
        self.ids.lock().contains(&id)
    }

    /// Returns the number of records in flight.
    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    /// Returns true if nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases an in-flight claim on drop.
pub struct InFlightGuard {
    registry: Arc<InFlightRegistry>,
    id: Uuid,
}

impl InFlightGuard {
    /// The claimed record.
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.ids.lock().remove(&self.id);
    }
}

/// The local table of one entity type, shared by tracker, resolver and
/// coordinator.
pub struct SyncTable<T> {
    pub(crate) store: Arc<dyn LocalStore<T>>,
    pub(crate) locks: RecordLocks,
    pub(crate) in_flight: Arc<InFlightRegistry>,
}

impl<T> SyncTable<T> {
    /// Wraps a store.
    pub fn new(store: Arc<dyn LocalStore<T>>) -> Self {
        Self {
            store,
            locks: RecordLocks::new(),
            in_flight: Arc::new(InFlightRegistry::new()),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn LocalStore<T>> {
        &self.store
    }

    /// The in-flight registry.
    pub fn in_flight(&self) -> &Arc<InFlightRegistry> {
        &self.in_flight
    }
}

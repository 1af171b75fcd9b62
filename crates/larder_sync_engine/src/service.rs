//! Per-entity sync service: local mutations plus sync cycles.

use crate::adapter::EntityAdapter;
use crate::config::SyncConfig;
use crate::coordinator::SyncCoordinator;
use crate::error::SyncResult;
use crate::state::{CycleReport, SyncState, SyncStats};
use crate::table::SyncTable;
use crate::tracker::{DeleteOutcome, MutationTracker};
use crate::transport::RemoteGateway;
use larder_storage::{CursorStore, LocalStore, SyncRecord};
use std::sync::Arc;
use uuid::Uuid;

/// Everything the app needs for one entity type.
///
/// UI code calls the mutation methods, which only touch the local store;
/// the scheduler (or the app) calls [`EntitySyncService::sync`].
pub struct EntitySyncService<A: EntityAdapter, G: RemoteGateway> {
    tracker: MutationTracker<A::Entity>,
    coordinator: SyncCoordinator<A, G>,
}

impl<A: EntityAdapter, G: RemoteGateway + 'static> EntitySyncService<A, G> {
    /// Creates a service over a store, gateway and cursor store.
    pub fn new(
        store: Arc<dyn LocalStore<A::Entity>>,
        gateway: Arc<G>,
        cursors: Arc<dyn CursorStore>,
        config: SyncConfig,
    ) -> Self {
        let table = Arc::new(SyncTable::new(store));
        Self {
            tracker: MutationTracker::new(Arc::clone(&table)),
            coordinator: SyncCoordinator::new(table, gateway, cursors, config),
        }
    }

    /// The resource this service syncs.
    pub fn resource(&self) -> &'static str {
        A::RESOURCE
    }

    /// The mutation tracker.
    pub fn tracker(&self) -> &MutationTracker<A::Entity> {
        &self.tracker
    }

    /// The coordinator.
    pub fn coordinator(&self) -> &SyncCoordinator<A, G> {
        &self.coordinator
    }

    /// See [`MutationTracker::on_create`].
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn create(&self, body: A::Entity) -> SyncResult<SyncRecord<A::Entity>> {
        self.tracker.on_create(body)
    }

    /// See [`MutationTracker::on_update`].
    ///
    /// # Errors
    ///
    /// Returns an error for unknown or deleted records.
    pub fn update(&self, id: Uuid, body: A::Entity) -> SyncResult<SyncRecord<A::Entity>> {
        self.tracker.on_update(id, body)
    }

    /// See [`MutationTracker::modify`].
    ///
    /// # Errors
    ///
    /// Returns an error for unknown or deleted records.
    pub fn modify<F>(&self, id: Uuid, edit: F) -> SyncResult<SyncRecord<A::Entity>>
    where
        F: FnOnce(&mut A::Entity),
    {
        self.tracker.modify(id, edit)
    }

    /// See [`MutationTracker::on_delete`].
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn delete(&self, id: Uuid) -> SyncResult<DeleteOutcome> {
        self.tracker.on_delete(id)
    }

    /// Returns a visible record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn get(&self, id: Uuid) -> SyncResult<Option<SyncRecord<A::Entity>>> {
        self.tracker.get(id)
    }

    /// Returns every visible record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn list(&self) -> SyncResult<Vec<SyncRecord<A::Entity>>> {
        self.tracker.list()
    }

    /// Returns the number of records awaiting push.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn pending_count(&self) -> SyncResult<usize> {
        self.tracker.pending_count()
    }

    /// Returns records the server refused, for the user to fix or retry.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn rejected(&self) -> SyncResult<Vec<SyncRecord<A::Entity>>> {
        self.tracker.rejected()
    }

    /// Makes a refused record eligible for the next push unchanged.
    /// Returns false if it was not held.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn retry(&self, id: Uuid) -> SyncResult<bool> {
        self.tracker.retry(id)
    }

    /// Runs one sync cycle. See [`SyncCoordinator::run_cycle`].
    ///
    /// # Errors
    ///
    /// See [`SyncCoordinator::run_cycle`].
    pub async fn sync(&self) -> SyncResult<CycleReport> {
        self.coordinator.run_cycle().await
    }

    /// Cancels the running cycle.
    pub fn cancel(&self) {
        self.coordinator.cancel();
    }

    /// Current coordinator state.
    pub fn state(&self) -> SyncState {
        self.coordinator.state()
    }

    /// Accumulated statistics.
    pub fn stats(&self) -> SyncStats {
        self.coordinator.stats()
    }
}

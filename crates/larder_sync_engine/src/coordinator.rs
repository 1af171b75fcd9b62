//! Sync cycle orchestration for one entity type.
//!
//! A cycle runs three phases in order:
//!
//! 1. **Push** - every dirty record not already in flight is sent with
//!    bounded concurrency; responses are applied under the record lock
//! 2. **Pull** - all pages changed since the stored cursor are fetched
//! 3. **Merge** - pulled records and deletions are merged, then the cursor
//!    advances to the server time at which the pull began
//!
//! Per-record failures leave the record pending and are reported in the
//! [`CycleReport`]. A record the server rejects is held: it is not pushed
//! again until its local revision moves. Authorization and storage
//! failures abort the cycle.

use crate::adapter::EntityAdapter;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::resolver::{MergeResolver, RemoteChange};
use crate::state::{CycleReport, RecordFailure, SyncOp, SyncState, SyncStats};
use crate::table::SyncTable;
use crate::transport::RemoteGateway;
use chrono::{DateTime, Utc};
use larder_storage::{epoch, CursorStore, SyncRecord, SyncStatus};
use larder_sync_protocol::{DeletionMarker, ListQuery, FIELD_ID};
use serde_json::Value;
use parking_lot::RwLock;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

enum PushResult {
    Done(SyncOp),
    Failed(SyncOp, SyncError),
    NotSent,
}

/// Runs sync cycles for the entity bound by `A` against gateway `G`.
pub struct SyncCoordinator<A: EntityAdapter, G: RemoteGateway> {
    table: Arc<SyncTable<A::Entity>>,
    gateway: Arc<G>,
    cursors: Arc<dyn CursorStore>,
    resolver: MergeResolver<A::Entity>,
    config: SyncConfig,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    cancelled: Arc<AtomicBool>,
    running: tokio::sync::Mutex<()>,
    _adapter: PhantomData<fn() -> A>,
}

impl<A: EntityAdapter, G: RemoteGateway + 'static> SyncCoordinator<A, G> {
    /// Creates a coordinator.
    pub fn new(
        table: Arc<SyncTable<A::Entity>>,
        gateway: Arc<G>,
        cursors: Arc<dyn CursorStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            resolver: MergeResolver::new(Arc::clone(&table)),
            table,
            gateway,
            cursors,
            config,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            cancelled: Arc::new(AtomicBool::new(false)),
            running: tokio::sync::Mutex::new(()),
            _adapter: PhantomData,
        }
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the stored cursor.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Storage`] if the cursor cannot be read.
    pub fn cursor(&self) -> SyncResult<DateTime<Utc>> {
        Ok(self.cursors.load(A::RESOURCE)?)
    }

    /// Cancels the running cycle at its next checkpoint. With no cycle
    /// running, the next cycle to start is cancelled instead.
    ///
    /// Requests already sent are allowed to complete and their responses
    /// are applied. A cancellation is used up by the cycle that ends after
    /// it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    /// Runs one push, pull and merge cycle.
    ///
    /// # Errors
    ///
    /// - [`SyncError::CycleInProgress`] if a cycle is already running
    /// - [`SyncError::Unauthorized`] or [`SyncError::Storage`] if the cycle
    ///   was aborted; records pushed before the abort stay pushed
    /// - [`SyncError::Cancelled`] after [`SyncCoordinator::cancel`]
    /// - any pull error; the cursor is left unchanged
    pub async fn run_cycle(&self) -> SyncResult<CycleReport> {
        let Ok(_running) = self.running.try_lock() else {
            return Err(SyncError::CycleInProgress(A::RESOURCE));
        };

        let start = Instant::now();
        tracing::debug!(resource = A::RESOURCE, "sync cycle starting");
        let mut report = CycleReport::new(A::RESOURCE, epoch());
        let result = match self.cursors.load(A::RESOURCE) {
            Ok(cursor) => {
                report.cursor = cursor;
                self.drive(&mut report).await
            }
            Err(e) => Err(e.into()),
        };
        report.duration = start.elapsed();
        self.cancelled.store(false, Ordering::SeqCst);

        let mut stats = self.stats.write();
        stats.records_pushed += report.pushed() as u64;
        stats.push_failures += report.failures.len() as u64;

        match result {
            Ok(()) => {
                self.set_state(SyncState::Synced);
                stats.cycles_completed += 1;
                stats.records_pulled += report.pulled as u64;
                stats.last_sync_time = Some(Utc::now());
                stats.last_error = None;
                tracing::info!(
                    resource = A::RESOURCE,
                    pushed = report.pushed(),
                    failed = report.failures.len(),
                    pulled = report.pulled,
                    merged = report.merge.written(),
                    duration_ms = report.duration.as_millis() as u64,
                    "sync cycle complete"
                );
                Ok(report)
            }
            Err(e) => {
                self.set_state(SyncState::Error);
                stats.cycles_failed += 1;
                stats.last_error = Some(e.to_string());
                tracing::warn!(
                    resource = A::RESOURCE,
                    error = %e,
                    pushed = report.pushed(),
                    "sync cycle aborted"
                );
                Err(e)
            }
        }
    }

    async fn drive(&self, report: &mut CycleReport) -> SyncResult<()> {
        self.check_cancelled()?;
        self.set_state(SyncState::Pushing);
        self.push_phase(report).await?;
        self.check_cancelled()?;

        self.set_state(SyncState::Pulling);
        let (changes, watermark) = self.pull_phase(report).await?;
        self.check_cancelled()?;

        self.set_state(SyncState::Merging);
        report.merge = self.resolver.merge(changes)?;
        report.cursor = self.advance_cursor(watermark)?;
        Ok(())
    }

    async fn push_phase(&self, report: &mut CycleReport) -> SyncResult<()> {
        let dirty = self.table.store.list_dirty()?;
        if dirty.is_empty() {
            return Ok(());
        }

        let semaphore = Arc::new(Semaphore::new(self.config.push_concurrency.max(1)));
        let abort = Arc::new(AtomicBool::new(false));
        let mut join_set = JoinSet::new();

        for record in dirty {
            let Some(op) = SyncOp::for_status(record.status) else {
                continue;
            };
            if record.is_rejected() {
                tracing::debug!(id = %record.id, %op, "holding rejected record");
                report.held.push(record.id);
                continue;
            }
            let Some(claim) = self.table.in_flight.try_claim(record.id) else {
                tracing::debug!(id = %record.id, "push already in flight");
                report.deferred += 1;
                continue;
            };

            let table = Arc::clone(&self.table);
            let gateway = Arc::clone(&self.gateway);
            let semaphore = Arc::clone(&semaphore);
            let abort = Arc::clone(&abort);
            let cancelled = Arc::clone(&self.cancelled);
            let id = record.id;

            join_set.spawn(async move {
                let _claim = claim;
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            id,
                            PushResult::Failed(
                                op,
                                SyncError::transport_fatal("Semaphore closed unexpectedly"),
                            ),
                        );
                    }
                };

                if abort.load(Ordering::SeqCst) || cancelled.load(Ordering::SeqCst) {
                    return (id, PushResult::NotSent);
                }

                let result = match push_record::<A, G>(&table, &gateway, id).await {
                    Ok(Some(done)) => PushResult::Done(done),
                    Ok(None) => PushResult::NotSent,
                    Err(e) => {
                        if e.is_cycle_fatal() {
                            abort.store(true, Ordering::SeqCst);
                        }
                        PushResult::Failed(op, e)
                    }
                };
                (id, result)
            });
        }

        let mut fatal = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((_, PushResult::Done(op))) => report.count_push(op),
                Ok((_, PushResult::NotSent)) => {}
                Ok((_, PushResult::Failed(_, error))) if error.is_cycle_fatal() => {
                    if fatal.is_none() {
                        fatal = Some(error);
                    }
                }
                Ok((id, PushResult::Failed(op, error))) => {
                    tracing::warn!(%id, %op, error = %error, "push failed");
                    report.failures.push(RecordFailure { id, op, error });
                }
                Err(e) => {
                    tracing::error!(error = %e, "push task failed");
                }
            }
        }

        match fatal {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn pull_phase(
        &self,
        report: &mut CycleReport,
    ) -> SyncResult<(Vec<RemoteChange<A::Entity>>, Option<DateTime<Utc>>)> {
        let cursor = self.cursors.load(A::RESOURCE)?;
        let mut query = ListQuery::new(cursor).with_limit(self.config.page_size);
        let mut changes = Vec::new();
        let mut watermark = None;

        loop {
            self.check_cancelled()?;
            let page = self.gateway.list(A::RESOURCE, &query).await?;
            report.pages += 1;
            // Pages after the first may include later writes; the first
            // page's time is the instant everything before it is covered.
            watermark.get_or_insert(page.server_time);

            for value in page.records {
                match read_change::<A>(value) {
                    Ok(change) => changes.push(change),
                    Err((id, error)) => {
                        tracing::warn!(%id, error = %error, "skipping malformed record");
                        report.failures.push(RecordFailure {
                            id,
                            op: SyncOp::Pull,
                            error,
                        });
                    }
                }
            }

            match page.next_cursor {
                Some(next) => query = query.with_cursor(next),
                None => break,
            }
        }

        report.pulled = changes.len();
        Ok((changes, watermark))
    }

    fn advance_cursor(&self, watermark: Option<DateTime<Utc>>) -> SyncResult<DateTime<Utc>> {
        let current = self.cursors.load(A::RESOURCE)?;
        match watermark {
            Some(next) if next > current => {
                self.cursors.save(A::RESOURCE, next)?;
                tracing::debug!(resource = A::RESOURCE, cursor = %next, "cursor advanced");
                Ok(next)
            }
            _ => Ok(current),
        }
    }
}

/// Maps one pulled value to a change. A value that cannot be read comes
/// back with its ID, or the nil ID if even that is unreadable.
fn read_change<A: EntityAdapter>(
    value: Value,
) -> Result<RemoteChange<A::Entity>, (Uuid, SyncError)> {
    let id = value
        .get(FIELD_ID)
        .and_then(Value::as_str)
        .and_then(|id| Uuid::parse_str(id).ok())
        .unwrap_or_else(Uuid::nil);
    match DeletionMarker::from_value(&value) {
        Ok(Some(marker)) => return Ok(RemoteChange::Deleted(marker.id)),
        Ok(None) => {}
        Err(e) => return Err((id, e.into())),
    }
    A::from_remote(value)
        .map(RemoteChange::Upsert)
        .map_err(|e| (id, e))
}

/// Pushes the current version of one claimed record.
///
/// Returns the operation the server confirmed, or `None` if the record no
/// longer needed a push. A server rejection is remembered on the record.
async fn push_record<A: EntityAdapter, G: RemoteGateway>(
    table: &SyncTable<A::Entity>,
    gateway: &G,
    id: Uuid,
) -> SyncResult<Option<SyncOp>> {
    let snapshot = {
        let _lock = table.locks.lock(id);
        table.store.get(id)?
    };
    let Some(snapshot) = snapshot else {
        return Ok(None);
    };

    let pushed = send_record::<A, G>(table, gateway, &snapshot).await;
    if let Err(error @ SyncError::Rejected { .. }) = &pushed {
        mark_rejected::<A>(table, &snapshot, error)?;
    }
    pushed
}

async fn send_record<A: EntityAdapter, G: RemoteGateway>(
    table: &SyncTable<A::Entity>,
    gateway: &G,
    snapshot: &SyncRecord<A::Entity>,
) -> SyncResult<Option<SyncOp>> {
    let id = snapshot.id;
    match snapshot.status {
        SyncStatus::Synced => Ok(None),
        SyncStatus::PendingCreate => {
            let payload = A::to_remote(snapshot)?;
            let canonical = A::from_remote(gateway.create(A::RESOURCE, payload).await?)?;
            apply_canonical::<A>(table, snapshot, canonical)?;
            Ok(Some(SyncOp::Create))
        }
        SyncStatus::PendingUpdate => {
            let payload = A::to_remote(snapshot)?;
            let canonical = A::from_remote(gateway.update(A::RESOURCE, id, payload).await?)?;
            apply_canonical::<A>(table, snapshot, canonical)?;
            Ok(Some(SyncOp::Update))
        }
        SyncStatus::PendingDelete => {
            gateway.delete(A::RESOURCE, id).await?;
            let _lock = table.locks.lock(id);
            if let Some(current) = table.store.get(id)? {
                if current.status == SyncStatus::PendingDelete {
                    table.store.remove(id)?;
                }
            }
            Ok(Some(SyncOp::Delete))
        }
    }
}

/// Holds a record the server refused, unless it changed while the request
/// was in flight.
fn mark_rejected<A: EntityAdapter>(
    table: &SyncTable<A::Entity>,
    dispatched: &SyncRecord<A::Entity>,
    error: &SyncError,
) -> SyncResult<()> {
    let _lock = table.locks.lock(dispatched.id);
    let Some(mut current) = table.store.get(dispatched.id)? else {
        return Ok(());
    };
    if current.local_revision == dispatched.local_revision && current.is_dirty() {
        tracing::warn!(
            id = %current.id,
            revision = current.local_revision,
            error = %error,
            "server rejected record; holding it until it changes"
        );
        current.rejected_revision = Some(current.local_revision);
        table.store.upsert(current)?;
    }
    Ok(())
}

/// Applies a server-confirmed record, unless the local record changed
/// while the request was in flight.
fn apply_canonical<A: EntityAdapter>(
    table: &SyncTable<A::Entity>,
    dispatched: &SyncRecord<A::Entity>,
    canonical: SyncRecord<A::Entity>,
) -> SyncResult<()> {
    let _lock = table.locks.lock(dispatched.id);
    let Some(mut current) = table.store.get(dispatched.id)? else {
        tracing::warn!(id = %dispatched.id, "record vanished while its push was in flight");
        return Ok(());
    };
    let rekeyed = canonical.id != current.id;
    if rekeyed {
        tracing::debug!(local = %current.id, server = %canonical.id, "server assigned a new ID");
        table.store.remove(current.id)?;
    }

    if current.status.is_tombstone() {
        // Deleted while in flight: the tombstone must follow the server ID.
        current.id = canonical.id;
        table.store.upsert(current)?;
    } else if current.local_revision == dispatched.local_revision {
        let mut next = canonical;
        next.status = SyncStatus::Synced;
        next.local_revision = current.local_revision;
        table.store.upsert(next)?;
    } else {
        tracing::debug!(id = %current.id, "record edited during push; keeping local changes");
        A::absorb_server_fields(&mut current.body, &canonical.body);
        current.id = canonical.id;
        current.created_at = canonical.created_at;
        current.status = SyncStatus::PendingUpdate;
        table.store.upsert(current)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{count_words, note_table, Note, NoteAdapter};
    use crate::tracker::MutationTracker;
    use crate::transport::{GatewayOp, MockFailure, MockGateway};
    use larder_storage::{InMemoryStore, LocalStore, MemoryCursorStore, StorageError};
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        store: Arc<InMemoryStore<Note>>,
        tracker: MutationTracker<Note>,
        gateway: Arc<MockGateway>,
        cursors: Arc<MemoryCursorStore>,
        coordinator: Arc<SyncCoordinator<NoteAdapter, MockGateway>>,
    }

    fn harness(config: SyncConfig) -> Harness {
        let (store, table) = note_table();
        let gateway = Arc::new(MockGateway::new());
        let cursors = Arc::new(MemoryCursorStore::new());
        let coordinator = Arc::new(SyncCoordinator::new(
            Arc::clone(&table),
            Arc::clone(&gateway),
            cursors.clone(),
            config,
        ));
        Harness {
            store,
            tracker: MutationTracker::new(table),
            gateway,
            cursors,
            coordinator,
        }
    }

    fn remote_note(id: Uuid, text: &str) -> serde_json::Value {
        json!({
            "id": id.to_string(),
            "created_at": "2023-06-01T00:00:00Z",
            "updated_at": "2023-06-01T00:00:00Z",
            "text": text,
        })
    }

    #[tokio::test]
    async fn push_create_adopts_canonical_record() {
        let h = harness(SyncConfig::new());
        h.gateway.set_decorator("notes", count_words);
        let record = h.tracker.on_create(Note::new("two words")).unwrap();

        let report = h.coordinator.run_cycle().await.unwrap();
        assert_eq!(report.created, 1);
        assert!(report.is_clean());

        let stored = h.store.get(record.id).unwrap().unwrap();
        assert_eq!(stored.status, SyncStatus::Synced);
        assert_eq!(stored.body.word_count, 2);
        assert_eq!(stored.updated_at, h.gateway.now());
        assert_eq!(h.coordinator.state(), SyncState::Synced);
    }

    #[tokio::test]
    async fn synced_records_are_not_pushed() {
        let h = harness(SyncConfig::new());
        h.tracker.on_create(Note::new("x")).unwrap();
        h.coordinator.run_cycle().await.unwrap();
        let report = h.coordinator.run_cycle().await.unwrap();

        assert_eq!(report.pushed(), 0);
        assert_eq!(h.gateway.calls(GatewayOp::Create), 1);
        assert_eq!(h.gateway.calls(GatewayOp::Update), 0);
    }

    #[tokio::test]
    async fn push_update_and_delete() {
        let h = harness(SyncConfig::new());
        let a = h.tracker.on_create(Note::new("a")).unwrap();
        let b = h.tracker.on_create(Note::new("b")).unwrap();
        h.coordinator.run_cycle().await.unwrap();

        h.tracker.on_update(a.id, Note::new("a2")).unwrap();
        h.tracker.on_delete(b.id).unwrap();
        let report = h.coordinator.run_cycle().await.unwrap();

        assert_eq!((report.updated, report.deleted), (1, 1));
        assert_eq!(h.gateway.record("notes", a.id).unwrap()["text"], "a2");
        assert!(h.gateway.record("notes", b.id).is_none());
        assert!(h.store.get(b.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn failures_are_isolated() {
        let h = harness(SyncConfig::new());
        let ids: Vec<Uuid> = (0..5)
            .map(|i| h.tracker.on_create(Note::new(&format!("n{i}"))).unwrap().id)
            .collect();
        h.gateway.fail_id(ids[2], MockFailure::Rejected(422));

        let report = h.coordinator.run_cycle().await.unwrap();
        assert_eq!(report.created, 4);
        assert_eq!(report.failures.len(), 1);
        let failure = report.failure(ids[2]).unwrap();
        assert_eq!(failure.op, SyncOp::Create);
        assert!(matches!(failure.error, SyncError::Rejected { status: 422, .. }));

        for (i, id) in ids.iter().enumerate() {
            let status = h.store.get(*id).unwrap().unwrap().status;
            if i == 2 {
                assert_eq!(status, SyncStatus::PendingCreate);
            } else {
                assert_eq!(status, SyncStatus::Synced);
            }
        }

        h.gateway.clear_id_failure(ids[2]);
        let report = h.coordinator.run_cycle().await.unwrap();
        assert_eq!(report.created, 0);
        assert_eq!(report.held, vec![ids[2]]);

        assert!(h.tracker.retry(ids[2]).unwrap());
        let report = h.coordinator.run_cycle().await.unwrap();
        assert_eq!(report.created, 1);
        assert!(report.held.is_empty());
        assert_eq!(h.gateway.len("notes"), 5);
    }

    #[tokio::test]
    async fn rejected_record_is_not_resent() {
        let h = harness(SyncConfig::new());
        let record = h.tracker.on_create(Note::new("bad")).unwrap();
        h.gateway.fail_id(record.id, MockFailure::Rejected(422));

        h.coordinator.run_cycle().await.unwrap();
        for _ in 0..2 {
            let report = h.coordinator.run_cycle().await.unwrap();
            assert!(report.failures.is_empty());
            assert_eq!(report.held, vec![record.id]);
        }
        assert_eq!(h.gateway.calls_for(GatewayOp::Create, record.id), 1);
        let stored = h.store.get(record.id).unwrap().unwrap();
        assert_eq!(stored.status, SyncStatus::PendingCreate);
        assert!(stored.is_rejected());

        h.gateway.clear_id_failure(record.id);
        h.tracker.on_update(record.id, Note::new("fixed")).unwrap();
        let report = h.coordinator.run_cycle().await.unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(h.gateway.calls_for(GatewayOp::Create, record.id), 2);
        assert_eq!(h.gateway.record("notes", record.id).unwrap()["text"], "fixed");
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let h = harness(SyncConfig::new());
        let record = h.tracker.on_create(Note::new("x")).unwrap();
        h.gateway.fail_next(GatewayOp::Create, MockFailure::Timeout, 1);

        let report = h.coordinator.run_cycle().await.unwrap();
        assert_eq!(report.failures.len(), 1);
        assert!(!h.store.get(record.id).unwrap().unwrap().is_rejected());

        let report = h.coordinator.run_cycle().await.unwrap();
        assert_eq!(report.created, 1);
        assert!(report.held.is_empty());
    }

    #[tokio::test]
    async fn remote_deletion_removes_synced_copy() {
        let h = harness(SyncConfig::new());
        let kept = h.tracker.on_create(Note::new("kept")).unwrap();
        let gone = h.tracker.on_create(Note::new("gone")).unwrap();
        h.coordinator.run_cycle().await.unwrap();

        h.tracker.on_update(kept.id, Note::new("kept, edited")).unwrap();
        h.gateway.fail_id(kept.id, MockFailure::Transient);
        assert!(h.gateway.remove_remote("notes", kept.id));
        assert!(h.gateway.remove_remote("notes", gone.id));

        let report = h.coordinator.run_cycle().await.unwrap();
        assert_eq!(report.pulled, 2);
        assert_eq!(report.merge.removed, 1);
        assert_eq!(report.merge.skipped, 1);
        assert!(h.store.get(gone.id).unwrap().is_none());
        let stored = h.store.get(kept.id).unwrap().unwrap();
        assert_eq!(stored.body.text, "kept, edited");

        let report = h.coordinator.run_cycle().await.unwrap();
        assert_eq!(report.pulled, 0);
    }

    #[tokio::test]
    async fn delete_of_missing_server_record_succeeds() {
        let h = harness(SyncConfig::new());
        let id = Uuid::new_v4();
        let t = Utc::now();
        h.store
            .upsert(SyncRecord::synced(id, t, t, Note::new("gone")))
            .unwrap();
        h.tracker.on_delete(id).unwrap();

        let report = h.coordinator.run_cycle().await.unwrap();
        assert_eq!(report.deleted, 1);
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn push_concurrency_is_bounded() {
        let h = harness(SyncConfig::new().with_push_concurrency(3));
        h.gateway.set_latency(Duration::from_millis(20));
        for i in 0..10 {
            h.tracker.on_create(Note::new(&i.to_string())).unwrap();
        }

        let report = h.coordinator.run_cycle().await.unwrap();
        assert_eq!(report.created, 10);
        assert!(h.gateway.peak_concurrency() <= 3);
        assert!(h.gateway.peak_concurrency() >= 2);
    }

    #[tokio::test]
    async fn edit_during_push_is_kept() {
        let h = harness(SyncConfig::new());
        h.gateway.set_decorator("notes", count_words);
        let record = h.tracker.on_create(Note::new("one")).unwrap();
        let gate = h.gateway.hold_writes();

        let coordinator = Arc::clone(&h.coordinator);
        let cycle = tokio::spawn(async move { coordinator.run_cycle().await });
        gate.entered().await;

        h.tracker
            .on_update(record.id, Note::new("one two three"))
            .unwrap();
        gate.release();
        cycle.await.unwrap().unwrap();

        let stored = h.store.get(record.id).unwrap().unwrap();
        assert_eq!(stored.body.text, "one two three");
        assert_eq!(stored.status, SyncStatus::PendingUpdate);
        // Server-owned field from the stale response is still absorbed.
        assert_eq!(stored.body.word_count, 1);

        h.coordinator.run_cycle().await.unwrap();
        let stored = h.store.get(record.id).unwrap().unwrap();
        assert_eq!(stored.status, SyncStatus::Synced);
        assert_eq!(stored.body.word_count, 3);
        assert_eq!(h.gateway.record("notes", record.id).unwrap()["text"], "one two three");
    }

    #[tokio::test]
    async fn delete_during_create_deletes_on_server() {
        let h = harness(SyncConfig::new());
        let record = h.tracker.on_create(Note::new("short-lived")).unwrap();
        let gate = h.gateway.hold_writes();

        let coordinator = Arc::clone(&h.coordinator);
        let cycle = tokio::spawn(async move { coordinator.run_cycle().await });
        gate.entered().await;

        assert_eq!(
            h.tracker.on_delete(record.id).unwrap(),
            crate::tracker::DeleteOutcome::Tombstoned
        );
        gate.release();
        cycle.await.unwrap().unwrap();

        assert_eq!(
            h.store.get(record.id).unwrap().unwrap().status,
            SyncStatus::PendingDelete
        );
        assert!(h.gateway.record("notes", record.id).is_some());

        h.coordinator.run_cycle().await.unwrap();
        assert!(h.store.get(record.id).unwrap().is_none());
        assert!(h.gateway.record("notes", record.id).is_none());
    }

    #[tokio::test]
    async fn overlapping_cycles_are_refused() {
        let h = harness(SyncConfig::new());
        h.tracker.on_create(Note::new("x")).unwrap();
        let gate = h.gateway.hold_writes();

        let coordinator = Arc::clone(&h.coordinator);
        let cycle = tokio::spawn(async move { coordinator.run_cycle().await });
        gate.entered().await;

        assert!(matches!(
            h.coordinator.run_cycle().await,
            Err(SyncError::CycleInProgress("notes"))
        ));
        gate.release();
        cycle.await.unwrap().unwrap();
        assert_eq!(h.gateway.calls(GatewayOp::Create), 1);
    }

    #[tokio::test]
    async fn pull_inserts_and_advances_cursor() {
        let h = harness(SyncConfig::new().with_page_size(2));
        for i in 0..5 {
            h.gateway
                .seed("notes", remote_note(Uuid::new_v4(), &format!("remote {i}")))
                .unwrap();
        }

        let report = h.coordinator.run_cycle().await.unwrap();
        assert_eq!(report.pages, 3);
        assert_eq!(report.pulled, 5);
        assert_eq!(report.merge.inserted, 5);
        assert_eq!(report.cursor, h.gateway.now());
        assert_eq!(h.cursors.load("notes").unwrap(), h.gateway.now());
        assert_eq!(h.store.len(), 5);
    }

    #[tokio::test]
    async fn pull_is_incremental() {
        let h = harness(SyncConfig::new());
        h.gateway.seed("notes", remote_note(Uuid::new_v4(), "old")).unwrap();
        h.coordinator.run_cycle().await.unwrap();
        let first_cursor = h.coordinator.cursor().unwrap();

        let id = Uuid::new_v4();
        h.gateway.seed("notes", remote_note(id, "new")).unwrap();
        let report = h.coordinator.run_cycle().await.unwrap();

        assert_eq!(report.pulled, 1);
        assert_eq!(report.merge.inserted, 1);
        assert!(report.cursor > first_cursor);
        assert_eq!(h.store.get(id).unwrap().unwrap().body.text, "new");
    }

    #[tokio::test]
    async fn cursor_never_moves_backwards() {
        let h = harness(SyncConfig::new());
        let future = h.gateway.now() + chrono::Duration::days(365);
        h.cursors.save("notes", future).unwrap();

        let report = h.coordinator.run_cycle().await.unwrap();
        assert_eq!(report.cursor, future);
        assert_eq!(h.cursors.load("notes").unwrap(), future);
    }

    #[tokio::test]
    async fn remote_changes_do_not_clobber_pending_edits() {
        let h = harness(SyncConfig::new());
        let record = h.tracker.on_create(Note::new("mine")).unwrap();
        h.coordinator.run_cycle().await.unwrap();

        h.tracker.on_update(record.id, Note::new("mine, edited")).unwrap();
        h.gateway.fail_id(record.id, MockFailure::Transient);
        h.gateway.seed("notes", remote_note(record.id, "theirs")).unwrap();

        let report = h.coordinator.run_cycle().await.unwrap();
        assert_eq!(report.merge.skipped, 1);
        assert_eq!(report.failures.len(), 1);
        let stored = h.store.get(record.id).unwrap().unwrap();
        assert_eq!(stored.body.text, "mine, edited");
        assert_eq!(stored.status, SyncStatus::PendingUpdate);
    }

    #[tokio::test]
    async fn unauthorized_aborts_cycle() {
        let h = harness(SyncConfig::new().with_push_concurrency(1));
        for i in 0..3 {
            h.tracker.on_create(Note::new(&i.to_string())).unwrap();
        }
        h.gateway
            .seed("notes", remote_note(Uuid::new_v4(), "remote"))
            .unwrap();
        h.gateway
            .fail_next(GatewayOp::Create, MockFailure::Unauthorized, 1);

        let err = h.coordinator.run_cycle().await.unwrap_err();
        assert!(matches!(err, SyncError::Unauthorized(_)));
        assert_eq!(h.coordinator.state(), SyncState::Error);
        assert_eq!(h.gateway.calls(GatewayOp::List), 0);
        assert_eq!(h.cursors.load("notes").unwrap(), larder_storage::epoch());
        assert_eq!(h.tracker.pending_count().unwrap(), 3);

        let report = h.coordinator.run_cycle().await.unwrap();
        assert_eq!(report.created, 3);
        assert_eq!(report.merge.inserted, 1);
    }

    #[tokio::test]
    async fn pull_failure_keeps_cursor() {
        let h = harness(SyncConfig::new());
        h.gateway.seed("notes", remote_note(Uuid::new_v4(), "r")).unwrap();
        h.gateway.fail_next(GatewayOp::List, MockFailure::Timeout, 1);

        let err = h.coordinator.run_cycle().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(h.cursors.load("notes").unwrap(), larder_storage::epoch());
        assert!(h.store.is_empty());
        assert_eq!(h.coordinator.stats().cycles_failed, 1);
    }

    #[tokio::test]
    async fn storage_failure_is_fatal() {
        let h = harness(SyncConfig::new());
        h.tracker.on_create(Note::new("x")).unwrap();
        h.store.set_available(false);

        let err = h.coordinator.run_cycle().await.unwrap_err();
        assert!(matches!(err, SyncError::Storage(StorageError::Unavailable(_))));
        assert_eq!(h.gateway.calls(GatewayOp::Create), 0);
    }

    #[tokio::test]
    async fn malformed_pulled_records_are_reported() {
        let h = harness(SyncConfig::new());
        let id = Uuid::new_v4();
        let mut bad = remote_note(id, "x");
        bad["pinned"] = json!("not a bool");
        h.gateway.seed("notes", bad).unwrap();
        h.gateway.seed("notes", remote_note(Uuid::new_v4(), "ok")).unwrap();

        let report = h.coordinator.run_cycle().await.unwrap();
        assert_eq!(report.merge.inserted, 1);
        let failure = report.failure(id).unwrap();
        assert_eq!(failure.op, SyncOp::Pull);
    }

    #[tokio::test]
    async fn cancelled_cycle_stops_before_pull() {
        let h = harness(SyncConfig::new());
        h.tracker.on_create(Note::new("x")).unwrap();
        let gate = h.gateway.hold_writes();

        let coordinator = Arc::clone(&h.coordinator);
        let cycle = tokio::spawn(async move { coordinator.run_cycle().await });
        gate.entered().await;
        h.coordinator.cancel();
        gate.release();

        assert!(matches!(cycle.await.unwrap(), Err(SyncError::Cancelled)));
        assert_eq!(h.gateway.calls(GatewayOp::List), 0);
        // The request that was already sent is still applied.
        assert_eq!(h.tracker.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn cancel_before_cycle_is_not_lost() {
        let h = harness(SyncConfig::new());
        h.tracker.on_create(Note::new("x")).unwrap();

        h.coordinator.cancel();
        assert!(matches!(h.coordinator.run_cycle().await, Err(SyncError::Cancelled)));
        assert_eq!(h.gateway.calls(GatewayOp::Create), 0);

        let report = h.coordinator.run_cycle().await.unwrap();
        assert_eq!(report.created, 1);
    }
}

//! Remote gateway abstraction.
//!
//! The engine talks to the backend only through [`RemoteGateway`]. Records
//! cross this boundary as JSON objects; entity mapping happens in the
//! [`crate::EntityAdapter`] on either side of the call.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use larder_sync_protocol::{DeletionMarker, ListPage, ListQuery, PageToken, RecordMeta};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use uuid::Uuid;

/// Resource-oriented access to the backend.
///
/// `resource` is the collection name without a leading slash, e.g.
/// `"inventory"`.
///
/// # Contract
///
/// - `create` and `update` return the canonical record, including
///   server-assigned fields
/// - `delete` is idempotent: deleting an unknown ID succeeds
/// - `list` returns records and deletion markers with
///   `updated_at > query.updated_after`, ordered by (`updated_at`, `id`)
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Fetches one page of records changed after `query.updated_after`.
    async fn list(&self, resource: &str, query: &ListQuery) -> SyncResult<ListPage>;

    /// Fetches a single record.
    async fn get(&self, resource: &str, id: Uuid) -> SyncResult<Option<Value>>;

    /// Creates a record and returns the canonical version.
    async fn create(&self, resource: &str, record: Value) -> SyncResult<Value>;

    /// Replaces a record and returns the canonical version.
    async fn update(&self, resource: &str, id: Uuid, record: Value) -> SyncResult<Value>;

    /// Deletes a record.
    async fn delete(&self, resource: &str, id: Uuid) -> SyncResult<()>;
}

#[async_trait]
impl<G: RemoteGateway + ?Sized> RemoteGateway for Arc<G> {
    async fn list(&self, resource: &str, query: &ListQuery) -> SyncResult<ListPage> {
        (**self).list(resource, query).await
    }

    async fn get(&self, resource: &str, id: Uuid) -> SyncResult<Option<Value>> {
        (**self).get(resource, id).await
    }

    async fn create(&self, resource: &str, record: Value) -> SyncResult<Value> {
        (**self).create(resource, record).await
    }

    async fn update(&self, resource: &str, id: Uuid, record: Value) -> SyncResult<Value> {
        (**self).update(resource, id, record).await
    }

    async fn delete(&self, resource: &str, id: Uuid) -> SyncResult<()> {
        (**self).delete(resource, id).await
    }
}

/// Gateway operation kinds, used by [`MockGateway`] for call accounting
/// and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOp {
    /// `list`
    List,
    /// `get`
    Get,
    /// `create`
    Create,
    /// `update`
    Update,
    /// `delete`
    Delete,
}

/// A failure the mock gateway can be told to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    /// Retryable transport failure.
    Transient,
    /// Request timeout.
    Timeout,
    /// Server rejection with a status code.
    Rejected(u16),
    /// Expired credentials.
    Unauthorized,
}

impl MockFailure {
    fn to_error(&self) -> SyncError {
        match self {
            MockFailure::Transient => SyncError::transport_retryable("connection reset"),
            MockFailure::Timeout => SyncError::Timeout,
            MockFailure::Rejected(status) => SyncError::Rejected {
                status: *status,
                message: "rejected by mock".into(),
            },
            MockFailure::Unauthorized => SyncError::Unauthorized("token expired".into()),
        }
    }
}

type Decorator = Box<dyn Fn(&mut Value) + Send + Sync>;

/// Pauses write requests until released.
///
/// Obtained from [`MockGateway::hold_writes`]. Lets tests mutate a record
/// while its push is provably in flight.
#[derive(Clone)]
pub struct WriteGate {
    entered: Arc<Notify>,
    release: Arc<Semaphore>,
}

impl WriteGate {
    /// Waits until a write request has reached the gate.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Lets every held and future write through.
    pub fn release(&self) {
        self.release.close();
    }

    async fn pass(&self) {
        self.entered.notify_one();
        // Closed means released.
        let _ = self.release.acquire().await;
    }
}

/// In-memory gateway for tests.
///
/// Behaves like the reference server: a strictly increasing clock stamps
/// `updated_at` on every write and deletion, lists are keyset-paginated
/// and carry deletion markers, deletes are idempotent, updates to unknown
/// IDs are rejected with 404 and creates of deleted IDs with 409.
pub struct MockGateway {
    tables: Mutex<HashMap<String, BTreeMap<Uuid, Value>>>,
    clock: Mutex<DateTime<Utc>>,
    decorators: Mutex<HashMap<String, Decorator>>,
    id_failures: Mutex<HashMap<Uuid, MockFailure>>,
    op_failures: Mutex<HashMap<GatewayOp, (MockFailure, usize)>>,
    calls: Mutex<Vec<(GatewayOp, Option<Uuid>)>>,
    latency: Mutex<Duration>,
    gate: Mutex<Option<WriteGate>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl MockGateway {
    /// Creates an empty gateway whose clock starts at 2024-01-01.
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            clock: Mutex::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_default()),
            decorators: Mutex::new(HashMap::new()),
            id_failures: Mutex::new(HashMap::new()),
            op_failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            latency: Mutex::new(Duration::ZERO),
            gate: Mutex::new(None),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Registers a hook that adds server-computed fields on every write.
    pub fn set_decorator(
        &self,
        resource: &str,
        decorator: impl Fn(&mut Value) + Send + Sync + 'static,
    ) {
        self.decorators
            .lock()
            .insert(resource.to_string(), Box::new(decorator));
    }

    /// Makes every request touching `id` fail until cleared.
    pub fn fail_id(&self, id: Uuid, failure: MockFailure) {
        self.id_failures.lock().insert(id, failure);
    }

    /// Clears a failure set with [`MockGateway::fail_id`].
    pub fn clear_id_failure(&self, id: Uuid) {
        self.id_failures.lock().remove(&id);
    }

    /// Makes the next `count` calls of `op` fail.
    pub fn fail_next(&self, op: GatewayOp, failure: MockFailure, count: usize) {
        if count > 0 {
            self.op_failures.lock().insert(op, (failure, count));
        }
    }

    /// Adds artificial latency to every call.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Holds create and update requests at a gate.
    pub fn hold_writes(&self) -> WriteGate {
        let gate = WriteGate {
            entered: Arc::new(Notify::new()),
            release: Arc::new(Semaphore::new(0)),
        };
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    /// Inserts a record as if another device had written it.
    ///
    /// Stamps `updated_at` from the server clock and returns the stored
    /// record.
    pub fn seed(&self, resource: &str, mut record: Value) -> SyncResult<Value> {
        let now = self.tick();
        let meta = stamp(&mut record, now)?;
        self.tables
            .lock()
            .entry(resource.to_string())
            .or_default()
            .insert(meta.id, record.clone());
        Ok(record)
    }

    /// Deletes a record as if another device had deleted it.
    ///
    /// Returns true if a live record was removed. The first deletion of an
    /// ID leaves a marker stamped by the server clock.
    pub fn remove_remote(&self, resource: &str, id: Uuid) -> bool {
        let mut tables = self.tables.lock();
        let table = tables.entry(resource.to_string()).or_default();
        let existed = match table.get(&id) {
            Some(stored) if is_marker(stored) => return false,
            Some(_) => true,
            None => false,
        };
        let marker = DeletionMarker {
            id,
            deleted_at: self.tick(),
        };
        table.insert(id, marker.to_value());
        existed
    }

    /// Returns the stored record; `None` for unknown and deleted IDs.
    pub fn record(&self, resource: &str, id: Uuid) -> Option<Value> {
        self.tables
            .lock()
            .get(resource)?
            .get(&id)
            .filter(|stored| !is_marker(stored))
            .cloned()
    }

    /// Returns true if `id` was deleted.
    pub fn is_deleted(&self, resource: &str, id: Uuid) -> bool {
        self.tables
            .lock()
            .get(resource)
            .and_then(|t| t.get(&id))
            .is_some_and(is_marker)
    }

    /// Returns the number of live records for `resource`.
    pub fn len(&self, resource: &str) -> usize {
        self.tables
            .lock()
            .get(resource)
            .map_or(0, |t| t.values().filter(|stored| !is_marker(stored)).count())
    }

    /// Returns the number of calls of `op`.
    pub fn calls(&self, op: GatewayOp) -> usize {
        self.calls.lock().iter().filter(|(o, _)| *o == op).count()
    }

    /// Returns the number of calls of `op` for `id`.
    pub fn calls_for(&self, op: GatewayOp, id: Uuid) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(o, i)| *o == op && *i == Some(id))
            .count()
    }

    /// Returns the highest number of concurrently active calls observed.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Returns the current server time without advancing it.
    pub fn now(&self) -> DateTime<Utc> {
        *self.clock.lock()
    }

    fn tick(&self) -> DateTime<Utc> {
        let mut clock = self.clock.lock();
        *clock += ChronoDuration::milliseconds(1);
        *clock
    }

    async fn enter(&self, op: GatewayOp, id: Option<Uuid>) -> SyncResult<CallGuard<'_>> {
        self.calls.lock().push((op, id));
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        let guard = CallGuard(&self.active);

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if matches!(op, GatewayOp::Create | GatewayOp::Update) {
            let gate = self.gate.lock().clone();
            if let Some(gate) = gate {
                gate.pass().await;
            }
        }

        if let Some(failure) = id.and_then(|id| self.id_failures.lock().get(&id).cloned()) {
            return Err(failure.to_error());
        }

        let mut op_failures = self.op_failures.lock();
        if let Some((failure, remaining)) = op_failures.get_mut(&op) {
            let err = failure.to_error();
            *remaining -= 1;
            if *remaining == 0 {
                op_failures.remove(&op);
            }
            return Err(err);
        }

        Ok(guard)
    }

    fn write(&self, resource: &str, mut record: Value) -> SyncResult<Value> {
        let now = self.tick();
        let meta = stamp(&mut record, now)?;
        if let Some(decorate) = self.decorators.lock().get(resource) {
            decorate(&mut record);
        }
        self.tables
            .lock()
            .entry(resource.to_string())
            .or_default()
            .insert(meta.id, record.clone());
        Ok(record)
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

struct CallGuard<'a>(&'a AtomicUsize);

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn is_marker(stored: &Value) -> bool {
    matches!(DeletionMarker::from_value(stored), Ok(Some(_)))
}

fn feed_position(stored: &Value) -> SyncResult<PageToken> {
    if let Some(marker) = DeletionMarker::from_value(stored)? {
        return Ok(PageToken {
            updated_at: marker.deleted_at,
            id: marker.id,
        });
    }
    let meta = RecordMeta::from_value(stored)?;
    Ok(PageToken {
        updated_at: meta.updated_at,
        id: meta.id,
    })
}

fn stamp(record: &mut Value, now: DateTime<Utc>) -> SyncResult<RecordMeta> {
    let mut meta = RecordMeta::from_value(record)?;
    meta.updated_at = now;
    meta.write_into(record)?;
    Ok(meta)
}

#[async_trait]
impl RemoteGateway for MockGateway {
    async fn list(&self, resource: &str, query: &ListQuery) -> SyncResult<ListPage> {
        let _call = self.enter(GatewayOp::List, None).await?;
        let server_time = self.now();
        let after = query.cursor.as_deref().map(PageToken::decode).transpose()?;

        let mut matching: Vec<(PageToken, Value)> = Vec::new();
        if let Some(table) = self.tables.lock().get(resource) {
            for record in table.values() {
                let position = feed_position(record)?;
                if position.updated_at > query.updated_after && after.map_or(true, |a| position > a) {
                    matching.push((position, record.clone()));
                }
            }
        }
        matching.sort_by(|a, b| a.0.cmp(&b.0));

        let limit = query.limit.unwrap_or(u32::MAX).max(1) as usize;
        let next_cursor = (matching.len() > limit).then(|| matching[limit - 1].0.encode());
        matching.truncate(limit);

        Ok(ListPage {
            records: matching.into_iter().map(|(_, r)| r).collect(),
            next_cursor,
            server_time,
        })
    }

    async fn get(&self, resource: &str, id: Uuid) -> SyncResult<Option<Value>> {
        let _call = self.enter(GatewayOp::Get, Some(id)).await?;
        Ok(self.record(resource, id))
    }

    async fn create(&self, resource: &str, record: Value) -> SyncResult<Value> {
        let id = RecordMeta::from_value(&record)?.id;
        let _call = self.enter(GatewayOp::Create, Some(id)).await?;
        if self.is_deleted(resource, id) {
            return Err(SyncError::Rejected {
                status: 409,
                message: format!("{resource}/{id} was deleted"),
            });
        }
        self.write(resource, record)
    }

    async fn update(&self, resource: &str, id: Uuid, record: Value) -> SyncResult<Value> {
        let _call = self.enter(GatewayOp::Update, Some(id)).await?;
        if self.record(resource, id).is_none() {
            return Err(SyncError::Rejected {
                status: 404,
                message: format!("{resource}/{id} not found"),
            });
        }
        self.write(resource, record)
    }

    async fn delete(&self, resource: &str, id: Uuid) -> SyncResult<()> {
        let _call = self.enter(GatewayOp::Delete, Some(id)).await?;
        self.remove_remote(resource, id);
        Ok(())
    }
}

//! Integration tests for the sync engine against the reference server.

use larder_storage::{
    CursorStore, FileCursorStore, FileStore, InMemoryStore, LocalStore, MemoryCursorStore,
    SyncRecord, SyncStatus,
};
use larder_sync_engine::{
    decode_record, encode_record, DeleteOutcome, EntityAdapter, EntitySyncService, ErrorClass,
    HttpGateway, LoopbackClient, LoopbackServer, SchedulerEvent, SyncConfig, SyncError, SyncOp,
    SyncResult, SyncScheduler,
};
use larder_sync_protocol::{HttpRequest, HttpResponse, Method};
use larder_sync_server::{ResourceOptions, ServerConfig, SyncServer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Spice {
    name: String,
    grams: i64,
}

fn spice(name: &str, grams: i64) -> Spice {
    Spice {
        name: name.to_string(),
        grams,
    }
}

struct SpiceAdapter;

impl EntityAdapter for SpiceAdapter {
    type Entity = Spice;
    const RESOURCE: &'static str = "spices";

    fn to_remote(record: &SyncRecord<Spice>) -> SyncResult<Value> {
        encode_record(record, &record.body)
    }

    fn from_remote(value: Value) -> SyncResult<SyncRecord<Spice>> {
        let (meta, body) = decode_record::<Spice>(value)?;
        Ok(SyncRecord::synced(meta.id, meta.created_at, meta.updated_at, body))
    }
}

/// Routes loopback requests into the in-process server.
struct Backend(Arc<SyncServer>);

impl LoopbackServer for Backend {
    fn handle(&self, request: &HttpRequest) -> HttpResponse {
        self.0.handle(request)
    }
}

type Gateway = HttpGateway<LoopbackClient<Backend>>;
type Service = EntitySyncService<SpiceAdapter, Gateway>;

fn server_with(config: ServerConfig) -> Arc<SyncServer> {
    let server = SyncServer::new(config.with_base_path("/api"));
    server.register_resource(
        "spices",
        ResourceOptions::new().with_validator(|v| match v["grams"].as_i64() {
            Some(g) if g < 0 => Err("grams must not be negative".into()),
            _ => Ok(()),
        }),
    );
    Arc::new(server)
}

fn server() -> Arc<SyncServer> {
    server_with(ServerConfig::new())
}

fn gateway(server: &Arc<SyncServer>) -> Arc<Gateway> {
    Arc::new(HttpGateway::new(
        "https://larder.test/api",
        LoopbackClient::new(Backend(Arc::clone(server))),
    ))
}

/// One device: its own store and cursors, talking to `server`.
struct Device {
    store: Arc<InMemoryStore<Spice>>,
    cursors: Arc<MemoryCursorStore>,
    service: Service,
}

fn device(server: &Arc<SyncServer>, config: SyncConfig) -> Device {
    let store = Arc::new(InMemoryStore::new());
    let cursors = Arc::new(MemoryCursorStore::new());
    let service = EntitySyncService::new(
        store.clone(),
        gateway(server),
        cursors.clone(),
        config,
    );
    Device {
        store,
        cursors,
        service,
    }
}

fn writes(server: &SyncServer) -> (usize, usize, usize) {
    (
        server.request_count(Method::Post),
        server.request_count(Method::Put),
        server.request_count(Method::Delete),
    )
}

fn sorted(mut records: Vec<SyncRecord<Spice>>) -> Vec<SyncRecord<Spice>> {
    records.sort_by_key(|r| r.id);
    records
}

#[tokio::test]
async fn create_edit_delete_round_trip() {
    let server = server();
    let device = device(&server, SyncConfig::new());

    let created = device.service.create(spice("saffron", 2)).unwrap();
    let report = device.service.sync().await.unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(writes(&server), (1, 0, 0));
    let stored = device.store.get(created.id).unwrap().unwrap();
    assert_eq!(stored.status, SyncStatus::Synced);
    assert_eq!(server.store().len("spices"), 1);

    device.service.modify(created.id, |s| s.grams = 1).unwrap();
    let report = device.service.sync().await.unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(writes(&server), (1, 1, 0));
    assert_eq!(server.store().get("spices", created.id).unwrap()["grams"], 1);

    assert_eq!(device.service.delete(created.id).unwrap(), DeleteOutcome::Tombstoned);
    let report = device.service.sync().await.unwrap();
    assert_eq!(report.deleted, 1);
    assert_eq!(writes(&server), (1, 1, 1));
    assert!(device.store.get(created.id).unwrap().is_none());
    assert!(server.store().is_deleted("spices", created.id));
}

#[tokio::test]
async fn second_cycle_changes_nothing() {
    let server = server();
    let device = device(&server, SyncConfig::new());
    device.service.create(spice("cumin", 40)).unwrap();
    device.service.create(spice("clove", 15)).unwrap();

    device.service.sync().await.unwrap();
    let records = sorted(device.store.list_all().unwrap());
    let cursor = device.cursors.load("spices").unwrap();

    let report = device.service.sync().await.unwrap();
    assert_eq!(report.pushed(), 0);
    assert_eq!(report.pulled, 0);
    assert_eq!(sorted(device.store.list_all().unwrap()), records);
    assert_eq!(device.cursors.load("spices").unwrap(), cursor);
}

#[tokio::test]
async fn offline_create_then_delete_sends_no_writes() {
    let server = server();
    let device = device(&server, SyncConfig::new());

    let record = device.service.create(spice("mace", 3)).unwrap();
    assert_eq!(device.service.delete(record.id).unwrap(), DeleteOutcome::Purged);

    let report = device.service.sync().await.unwrap();
    assert_eq!(report.pushed(), 0);
    assert_eq!(writes(&server), (0, 0, 0));
    assert!(device.store.is_empty());
}

#[tokio::test]
async fn last_local_mutation_survives() {
    let server = server();
    let device = device(&server, SyncConfig::new());

    let record = device.service.create(spice("sumac", 10)).unwrap();
    device.service.sync().await.unwrap();
    device.service.update(record.id, spice("sumac", 7)).unwrap();
    device.service.sync().await.unwrap();

    let stored = device.store.get(record.id).unwrap().unwrap();
    assert_eq!(stored.body, spice("sumac", 7));
    assert_eq!(stored.status, SyncStatus::Synced);
    assert_eq!(server.store().get("spices", record.id).unwrap()["grams"], 7);
}

#[tokio::test]
async fn devices_converge_through_the_server() {
    let server = server();
    let phone = device(&server, SyncConfig::new());
    let tablet = device(&server, SyncConfig::new());

    let record = phone.service.create(spice("paprika", 50)).unwrap();
    phone.service.sync().await.unwrap();

    let report = tablet.service.sync().await.unwrap();
    assert_eq!(report.merge.inserted, 1);
    tablet.service.modify(record.id, |s| s.grams = 45).unwrap();
    tablet.service.sync().await.unwrap();

    let report = phone.service.sync().await.unwrap();
    assert_eq!(report.merge.overwritten, 1);
    let mine = phone.store.get(record.id).unwrap().unwrap();
    let theirs = tablet.store.get(record.id).unwrap().unwrap();
    assert_eq!(mine.body.grams, 45);
    assert_eq!(mine.body, theirs.body);
    assert_eq!(mine.updated_at, theirs.updated_at);
}

#[tokio::test]
async fn pull_only_fetches_changes_after_cursor() {
    let server = server();
    let writer = device(&server, SyncConfig::new());
    let reader = device(&server, SyncConfig::new());

    writer.service.create(spice("anise", 12)).unwrap();
    writer.service.sync().await.unwrap();
    assert_eq!(reader.service.sync().await.unwrap().pulled, 1);
    let cursor = reader.cursors.load("spices").unwrap();

    let later = writer.service.create(spice("fennel", 30)).unwrap();
    writer.service.sync().await.unwrap();

    let report = reader.service.sync().await.unwrap();
    assert_eq!(report.pulled, 1);
    assert_eq!(report.merge.inserted, 1);
    assert!(reader.store.get(later.id).unwrap().is_some());
    assert!(reader.cursors.load("spices").unwrap() > cursor);
}

#[tokio::test]
async fn pending_update_survives_pulled_version() {
    let server = server();
    let a = device(&server, SyncConfig::new());
    let b = device(&server, SyncConfig::new());

    let record = a.service.create(spice("nutmeg", 20)).unwrap();
    a.service.sync().await.unwrap();
    b.service.sync().await.unwrap();

    a.service.modify(record.id, |s| s.grams = 5).unwrap();
    a.service.sync().await.unwrap();
    b.service.modify(record.id, |s| s.grams = 18).unwrap();

    // The push is the first request of the cycle; fail it so the pull
    // brings a's version while b's edit is still pending.
    server.fail_next(1, 503);
    let report = b.service.sync().await.unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].op, SyncOp::Update);
    assert_eq!(report.merge.skipped, 1);

    let stored = b.store.get(record.id).unwrap().unwrap();
    assert_eq!(stored.body.grams, 18);
    assert_eq!(stored.status, SyncStatus::PendingUpdate);

    b.service.sync().await.unwrap();
    assert_eq!(server.store().get("spices", record.id).unwrap()["grams"], 18);
}

#[tokio::test]
async fn pull_drains_every_page() {
    let server = server_with(ServerConfig::new().with_max_page_size(2));
    let writer = device(&server, SyncConfig::new().with_push_concurrency(3));
    for i in 0..5 {
        writer.service.create(spice(&format!("blend {i}"), i)).unwrap();
    }
    writer.service.sync().await.unwrap();

    let reader = device(&server, SyncConfig::new().with_page_size(10));
    let report = reader.service.sync().await.unwrap();
    assert_eq!(report.pages, 3);
    assert_eq!(report.pulled, 5);
    assert_eq!(reader.store.len(), 5);
}

#[tokio::test]
async fn rejected_record_does_not_block_others() {
    let server = server();
    let device = device(&server, SyncConfig::new());

    let bad = device.service.create(spice("ghost pepper", -1)).unwrap();
    let good = device.service.create(spice("pepper", 100)).unwrap();

    let report = device.service.sync().await.unwrap();
    assert_eq!(report.created, 1);
    let failure = report.failure(bad.id).unwrap();
    assert_eq!(failure.error.class(), ErrorClass::Rejected);
    assert!(matches!(failure.error, SyncError::Rejected { status: 422, .. }));

    assert_eq!(device.store.get(bad.id).unwrap().unwrap().status, SyncStatus::PendingCreate);
    assert_eq!(device.store.get(good.id).unwrap().unwrap().status, SyncStatus::Synced);

    let report = device.service.sync().await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.held, vec![bad.id]);
    assert_eq!(server.request_count(Method::Post), 2);

    device.service.update(bad.id, spice("ghost pepper", 1)).unwrap();
    let report = device.service.sync().await.unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(server.store().get("spices", bad.id).unwrap()["grams"], 1);
}

#[tokio::test]
async fn deletions_propagate_through_the_server() {
    let server = server();
    let phone = device(&server, SyncConfig::new());
    let tablet = device(&server, SyncConfig::new());

    let record = phone.service.create(spice("saffron", 1)).unwrap();
    phone.service.sync().await.unwrap();
    tablet.service.sync().await.unwrap();
    assert!(tablet.store.get(record.id).unwrap().is_some());

    phone.service.delete(record.id).unwrap();
    phone.service.sync().await.unwrap();

    let report = tablet.service.sync().await.unwrap();
    assert_eq!(report.pulled, 1);
    assert_eq!(report.merge.removed, 1);
    assert!(tablet.store.get(record.id).unwrap().is_none());
    assert_eq!(tablet.service.sync().await.unwrap().pulled, 0);
}

#[tokio::test]
async fn unauthorized_aborts_until_token_is_set() {
    let server = server_with(ServerConfig::new().with_auth(b"kitchen-secret".to_vec()));
    let gateway = gateway(&server);
    let store = Arc::new(InMemoryStore::new());
    let cursors = Arc::new(MemoryCursorStore::new());
    let service: Service = EntitySyncService::new(
        store.clone(),
        Arc::clone(&gateway),
        cursors.clone(),
        SyncConfig::new(),
    );

    let record = service.create(spice("vanilla", 1)).unwrap();
    let err = service.sync().await.unwrap_err();
    assert!(matches!(err, SyncError::Unauthorized(_)));
    assert_eq!(store.get(record.id).unwrap().unwrap().status, SyncStatus::PendingCreate);
    assert!(cursors.entries().unwrap().is_empty());

    gateway.set_token(server.issue_token(Uuid::new_v4()).unwrap());
    let report = service.sync().await.unwrap();
    assert_eq!(report.created, 1);
}

#[tokio::test]
async fn failed_pull_keeps_cursor() {
    let server = server();
    let writer = device(&server, SyncConfig::new());
    let reader = device(&server, SyncConfig::new());
    reader.service.sync().await.unwrap();
    let cursor = reader.cursors.load("spices").unwrap();

    let record = writer.service.create(spice("cardamom", 8)).unwrap();
    writer.service.sync().await.unwrap();

    // Nothing to push, so the listing is the first request.
    server.fail_next(1, 500);
    let err = reader.service.sync().await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(reader.cursors.load("spices").unwrap(), cursor);
    assert!(reader.store.get(record.id).unwrap().is_none());
    assert_eq!(reader.service.stats().cycles_failed, 1);

    let report = reader.service.sync().await.unwrap();
    assert_eq!(report.pulled, 1);
    assert!(reader.cursors.load("spices").unwrap() > cursor);
}

#[tokio::test]
async fn file_backed_device_resumes_after_restart() {
    let server = server();
    let dir = tempfile::tempdir().unwrap();

    let id = {
        let store: Arc<FileStore<Spice>> = Arc::new(FileStore::open(dir.path(), "spices").unwrap());
        let cursors = Arc::new(FileCursorStore::open(dir.path()).unwrap());
        let service: Service =
            EntitySyncService::new(store, gateway(&server), cursors, SyncConfig::new());
        service.create(spice("turmeric", 25)).unwrap().id
    };

    let store: Arc<FileStore<Spice>> = Arc::new(FileStore::open(dir.path(), "spices").unwrap());
    assert_eq!(store.get(id).unwrap().unwrap().status, SyncStatus::PendingCreate);
    let cursors = Arc::new(FileCursorStore::open(dir.path()).unwrap());
    let service: Service = EntitySyncService::new(
        store.clone(),
        gateway(&server),
        cursors.clone(),
        SyncConfig::new(),
    );

    let report = service.sync().await.unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(store.get(id).unwrap().unwrap().status, SyncStatus::Synced);
    assert_eq!(cursors.load("spices").unwrap(), server.store().now());
}

#[tokio::test]
async fn scheduler_runs_triggered_cycles() {
    let server = server();
    let device = device(&server, SyncConfig::new());
    device.service.create(spice("allspice", 9)).unwrap();

    let service = Arc::new(device.service);
    let scheduler = SyncScheduler::start(service.clone(), &SyncConfig::new());
    let mut events = scheduler.events();

    scheduler.trigger();
    let report = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            events.changed().await.unwrap();
            if let SchedulerEvent::Completed(report) = events.borrow_and_update().clone() {
                return report;
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(report.created, 1);
    assert_eq!(service.pending_count().unwrap(), 0);
    scheduler.shutdown().await;
}

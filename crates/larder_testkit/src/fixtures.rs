//! Test fixtures: an in-process backend and client devices wired to it.

use larder_entities::{
    stamp_total_cost, InventoryItem, LarderClient, MealPlan, Recipe, ShoppingList, Validate,
    RESOURCES,
};
use larder_sync_engine::{HttpGateway, LoopbackClient, LoopbackServer, SyncConfig};
use larder_sync_protocol::{HttpRequest, HttpResponse, Method};
use larder_sync_server::{ResourceOptions, ServerConfig, SyncServer};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;

/// Path prefix the test backend is mounted under.
pub const BASE_PATH: &str = "/api";

/// Base URL clients are configured with.
pub const BASE_URL: &str = "https://larder.test/api";

/// Routes loopback requests into an in-process [`SyncServer`].
#[derive(Clone)]
pub struct Backend(pub Arc<SyncServer>);

impl LoopbackServer for Backend {
    fn handle(&self, request: &HttpRequest) -> HttpResponse {
        self.0.handle(request)
    }
}

/// Gateway type used by harness devices.
pub type TestGateway = HttpGateway<LoopbackClient<Backend>>;

/// Client type used by harness devices.
pub type TestClient = LarderClient<TestGateway>;

/// Builds a reference server with all four Larder resources registered.
///
/// Every resource rejects records that fail [`Validate`] with `422`, and
/// shopping lists get their `total_cost_cents` computed server-side.
pub fn larder_server(config: ServerConfig) -> SyncServer {
    let server = SyncServer::new(config.with_base_path(BASE_PATH));
    let [inventory, recipes, meal_plans, shopping_lists] = RESOURCES;
    server.register_resource(inventory, validated::<InventoryItem>());
    server.register_resource(recipes, validated::<Recipe>());
    server.register_resource(meal_plans, validated::<MealPlan>());
    server.register_resource(
        shopping_lists,
        validated::<ShoppingList>().with_decorator(stamp_total_cost),
    );
    server
}

fn validated<T: DeserializeOwned + Validate + 'static>() -> ResourceOptions {
    ResourceOptions::new().with_validator(|value: &Value| {
        let body: T = serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
        body.validate().map_err(|e| e.to_string())
    })
}

/// One backend shared by any number of simulated devices.
///
/// # Example
///
/// ```rust
/// use larder_entities::InventoryItem;
/// use larder_testkit::TestHarness;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let harness = TestHarness::new();
/// let phone = harness.device();
/// let laptop = harness.device();
///
/// let flour = phone.inventory.create(InventoryItem::new("flour", 1.5, "kg")).unwrap();
/// phone.sync_all().await;
/// laptop.sync_all().await;
///
/// assert!(laptop.inventory.get(flour.id).unwrap().is_some());
/// # });
/// ```
pub struct TestHarness {
    server: Arc<SyncServer>,
}

impl TestHarness {
    /// Creates a harness with a default server.
    pub fn new() -> Self {
        Self::with_config(ServerConfig::new())
    }

    /// Creates a harness with a custom server configuration.
    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            server: Arc::new(larder_server(config)),
        }
    }

    /// The backend.
    pub fn server(&self) -> &Arc<SyncServer> {
        &self.server
    }

    /// A fresh gateway to the backend.
    pub fn gateway(&self) -> Arc<TestGateway> {
        Arc::new(HttpGateway::new(
            BASE_URL,
            LoopbackClient::new(Backend(Arc::clone(&self.server))),
        ))
    }

    /// A new device with in-memory stores.
    pub fn device(&self) -> TestClient {
        self.device_with(SyncConfig::new())
    }

    /// A new device with in-memory stores and a custom sync configuration.
    pub fn device_with(&self, config: SyncConfig) -> TestClient {
        LarderClient::in_memory(self.gateway(), config)
    }

    /// A new device with file-backed stores in a temporary directory.
    pub fn file_device(&self) -> FileDevice {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let client = LarderClient::open(temp_dir.path(), self.gateway(), SyncConfig::new())
            .expect("Failed to open file-backed stores");
        FileDevice { client, temp_dir }
    }

    /// Number of records the backend holds for `resource`.
    pub fn server_len(&self, resource: &str) -> usize {
        self.server.store().len(resource)
    }

    /// Write requests the backend has received: `(POST, PUT, DELETE)`.
    pub fn writes(&self) -> (usize, usize, usize) {
        (
            self.server.request_count(Method::Post),
            self.server.request_count(Method::Put),
            self.server.request_count(Method::Delete),
        )
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// A file-backed device whose directory is removed on drop.
pub struct FileDevice {
    client: TestClient,
    temp_dir: TempDir,
}

impl FileDevice {
    /// Directory holding the device's tables and cursors.
    pub fn path(&self) -> &std::path::Path {
        self.temp_dir.path()
    }
}

impl std::ops::Deref for FileDevice {
    type Target = TestClient;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

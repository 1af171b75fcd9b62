//! The reference server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler, RequestLog};
use crate::store::{RecordStore, ResourceOptions};
use larder_sync_protocol::{HttpRequest, HttpResponse, Method};
use std::sync::Arc;
use uuid::Uuid;

/// The reference sync server.
///
/// Serves the record endpoints for every registered resource from an
/// in-memory [`RecordStore`]. It does no I/O of its own: hand it requests
/// through [`SyncServer::handle`] from whatever transport you use.
///
/// # Example
///
/// ```
/// use larder_sync_protocol::{HttpRequest, Method};
/// use larder_sync_server::{ResourceOptions, ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::new().with_base_path("/v1"));
/// server.register_resource("recipes", ResourceOptions::new());
///
/// let response = server.handle(&HttpRequest::new(Method::Get, "/v1/recipes"));
/// assert_eq!(response.status, 200);
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl SyncServer {
    /// Creates a server with an empty store.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_store(config, Arc::new(RecordStore::new()))
    }

    /// Creates a server over an existing store.
    pub fn with_store(config: ServerConfig, store: Arc<RecordStore>) -> Self {
        let context = Arc::new(HandlerContext::new(config, store));
        let handler = RequestHandler::new(Arc::clone(&context));

        Self { handler, context }
    }

    /// Serves `name` with the given hooks.
    pub fn register_resource(&self, name: &str, options: ResourceOptions) {
        self.context.store.register(name, options);
    }

    /// Handles a request. The URL must be a path plus query string.
    pub fn handle(&self, request: &HttpRequest) -> HttpResponse {
        self.handler.handle(request)
    }

    /// Issues a bearer token for a device.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if auth is not enabled.
    pub fn issue_token(&self, device_id: Uuid) -> ServerResult<String> {
        self.context
            .tokens()
            .ok_or_else(|| ServerError::InvalidRequest("authentication is disabled".into()))?
            .create_token(device_id)
    }

    /// Makes the next `count` requests fail with `status`.
    pub fn fail_next(&self, count: usize, status: u16) {
        self.context.fail_next(count, status);
    }

    /// The canonical store.
    pub fn store(&self) -> &Arc<RecordStore> {
        &self.context.store
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<RequestLog> {
        self.context.requests()
    }

    /// Number of requests received with `method`.
    pub fn request_count(&self, method: Method) -> usize {
        self.context
            .requests()
            .iter()
            .filter(|r| r.method == method)
            .count()
    }
}

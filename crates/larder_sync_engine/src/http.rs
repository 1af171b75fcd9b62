//! HTTP gateway implementation.
//!
//! This module maps [`RemoteGateway`] calls onto the REST endpoints of the
//! backend. The actual HTTP client is abstracted via a trait to allow
//! different implementations (reqwest, hyper, etc.).

use crate::error::{SyncError, SyncResult};
use crate::transport::RemoteGateway;
use async_trait::async_trait;
use larder_sync_protocol::{HttpRequest, HttpResponse, ListPage, ListQuery, Method};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport. An `Err`
/// means the request never produced a response (DNS, connection reset,
/// TLS); every status code, including 4xx and 5xx, is an `Ok`.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a request and returns the response.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String>;
}

#[async_trait]
impl<C: HttpClient + ?Sized> HttpClient for Arc<C> {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        (**self).send(request).await
    }
}

/// REST gateway over an [`HttpClient`].
///
/// Uses JSON bodies and a bearer token in the `authorization` header.
pub struct HttpGateway<C: HttpClient> {
    /// Base URL of the backend (e.g., "https://api.example.com/v1").
    base_url: String,
    /// HTTP client implementation.
    client: C,
    /// Bearer token, replaced on re-authentication.
    token: RwLock<Option<String>>,
    /// Per-request timeout.
    timeout: Duration,
    /// Last transport error message.
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpGateway<C> {
    /// Creates a new gateway with a 30 second request timeout.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            token: RwLock::new(None),
            timeout: Duration::from_secs(30),
            last_error: RwLock::new(None),
        }
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the initial bearer token.
    pub fn with_token(self, token: impl Into<String>) -> Self {
        self.set_token(token);
        self
    }

    /// Replaces the bearer token, e.g. after re-authentication.
    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    /// Removes the bearer token.
    pub fn clear_token(&self) {
        *self.token.write() = None;
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last transport error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn collection_url(&self, resource: &str) -> String {
        format!("{}/{}", self.base_url, resource)
    }

    fn item_url(&self, resource: &str, id: Uuid) -> String {
        format!("{}/{}/{}", self.base_url, resource, id)
    }

    async fn execute(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
        let token = self.token.read().clone();
        let request = match token {
            Some(token) => request.with_header("authorization", format!("Bearer {token}")),
            None => request,
        };

        tracing::trace!(method = %request.method, url = %request.url, "sending request");
        let response = match tokio::time::timeout(self.timeout, self.client.send(request)).await
        {
            Err(_) => {
                *self.last_error.write() = Some("request timed out".into());
                return Err(SyncError::Timeout);
            }
            Ok(Err(e)) => {
                *self.last_error.write() = Some(e.clone());
                return Err(SyncError::transport_retryable(e));
            }
            Ok(Ok(response)) => response,
        };

        *self.last_error.write() = None;
        Ok(response)
    }
}

fn ensure_success(response: HttpResponse) -> SyncResult<HttpResponse> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(SyncError::from_status(
            response.status,
            response.error_message(),
        ))
    }
}

fn decode<T: serde::de::DeserializeOwned>(response: &HttpResponse) -> SyncResult<T> {
    response
        .decode_json()
        .map_err(|e| SyncError::Protocol(format!("failed to decode response: {e}")))
}

#[async_trait]
impl<C: HttpClient> RemoteGateway for HttpGateway<C> {
    async fn list(&self, resource: &str, query: &ListQuery) -> SyncResult<ListPage> {
        let url = format!(
            "{}?{}",
            self.collection_url(resource),
            query.to_query_string()
        );
        let response = ensure_success(self.execute(HttpRequest::new(Method::Get, url)).await?)?;
        decode(&response)
    }

    async fn get(&self, resource: &str, id: Uuid) -> SyncResult<Option<Value>> {
        let request = HttpRequest::new(Method::Get, self.item_url(resource, id));
        let response = self.execute(request).await?;
        if response.status == 404 {
            return Ok(None);
        }
        decode(&ensure_success(response)?).map(Some)
    }

    async fn create(&self, resource: &str, record: Value) -> SyncResult<Value> {
        let request = HttpRequest::new(Method::Post, self.collection_url(resource)).with_json(&record)?;
        let response = ensure_success(self.execute(request).await?)?;
        decode(&response)
    }

    async fn update(&self, resource: &str, id: Uuid, record: Value) -> SyncResult<Value> {
        let request = HttpRequest::new(Method::Put, self.item_url(resource, id)).with_json(&record)?;
        let response = ensure_success(self.execute(request).await?)?;
        decode(&response)
    }

    async fn delete(&self, resource: &str, id: Uuid) -> SyncResult<()> {
        let request = HttpRequest::new(Method::Delete, self.item_url(resource, id));
        let response = self.execute(request).await?;
        // Already gone counts as deleted.
        if response.status == 404 {
            return Ok(());
        }
        ensure_success(response).map(|_| ())
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer: Send + Sync {
    /// Handles a request whose URL has been reduced to a path and query.
    fn handle(&self, request: &HttpRequest) -> HttpResponse;
}

impl<S: LoopbackServer + ?Sized> LoopbackServer for Arc<S> {
    fn handle(&self, request: &HttpRequest) -> HttpResponse {
        (**self).handle(request)
    }
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }
}

#[async_trait]
impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    async fn send(&self, mut request: HttpRequest) -> Result<HttpResponse, String> {
        request.url = path_of(&request.url).to_string();
        Ok(self.server.handle(&request))
    }
}

/// Strips scheme and authority from a URL, leaving path and query.
fn path_of(url: &str) -> &str {
    match url.find("://") {
        Some(scheme_end) => {
            let rest = &url[scheme_end + 3..];
            rest.find('/').map_or("/", |i| &rest[i..])
        }
        None => url,
    }
}

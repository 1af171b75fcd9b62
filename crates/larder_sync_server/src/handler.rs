//! Request handling for the record endpoints.

use crate::auth::{AuthConfig, TokenValidator};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::store::RecordStore;
use larder_sync_protocol::{HttpRequest, HttpResponse, ListQuery, Method, Route};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Failures injected ahead of normal handling.
#[derive(Debug, Clone, Copy)]
struct Fault {
    status: u16,
    remaining: usize,
}

/// A request the server received, after base path stripping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLog {
    /// Request method.
    pub method: Method,
    /// Path without the query string.
    pub path: String,
}

/// Shared state for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Canonical records.
    pub store: Arc<RecordStore>,
    tokens: Option<TokenValidator>,
    fault: Mutex<Option<Fault>>,
    log: Mutex<Vec<RequestLog>>,
}

impl HandlerContext {
    /// Creates a context; auth is enabled when the config carries a secret.
    pub fn new(config: ServerConfig, store: Arc<RecordStore>) -> Self {
        let tokens = match (&config.auth_secret, config.require_auth) {
            (Some(secret), true) => Some(TokenValidator::new(
                AuthConfig::new(secret.clone()).with_expiry(config.token_expiry),
            )),
            _ => None,
        };
        Self {
            config,
            store,
            tokens,
            fault: Mutex::new(None),
            log: Mutex::new(Vec::new()),
        }
    }

    /// The token validator, if auth is enabled.
    pub fn tokens(&self) -> Option<&TokenValidator> {
        self.tokens.as_ref()
    }

    /// Makes the next `count` requests fail with `status`.
    pub fn fail_next(&self, count: usize, status: u16) {
        *self.fault.lock() = (count > 0).then_some(Fault {
            status,
            remaining: count,
        });
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<RequestLog> {
        self.log.lock().clone()
    }

    fn take_fault(&self) -> Option<u16> {
        let mut slot = self.fault.lock();
        let fault = slot.as_mut()?;
        let status = fault.status;
        fault.remaining -= 1;
        if fault.remaining == 0 {
            *slot = None;
        }
        Some(status)
    }
}

/// Handler for record requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Handles a request whose URL is a path plus query string.
    ///
    /// Never fails: errors become JSON error responses.
    pub fn handle(&self, request: &HttpRequest) -> HttpResponse {
        let response = match self.dispatch(request) {
            Ok(response) => response,
            Err(err) => {
                if err.is_server_error() {
                    tracing::warn!(method = %request.method, url = %request.url, error = %err, "request failed");
                } else {
                    tracing::debug!(method = %request.method, url = %request.url, error = %err, "request rejected");
                }
                HttpResponse::error(err.status(), err.to_string())
            }
        };
        tracing::debug!(method = %request.method, url = %request.url, status = response.status, "handled request");
        response
    }

    fn dispatch(&self, request: &HttpRequest) -> ServerResult<HttpResponse> {
        let path = self.strip_base(&request.url)?;
        self.context.log.lock().push(RequestLog {
            method: request.method,
            path: path.split('?').next().unwrap_or_default().to_string(),
        });

        if let Some(status) = self.context.take_fault() {
            return Ok(HttpResponse::error(status, "injected failure"));
        }
        self.authenticate(request)?;

        let route = Route::parse(path)?;
        let resource = route.resource.trim_start_matches('/');
        if !self.context.store.has_resource(resource) {
            return Err(ServerError::UnknownResource(resource.to_string()));
        }

        match (request.method, route.id) {
            (Method::Get, None) => self.list(resource, route.query.as_deref().unwrap_or("")),
            (Method::Get, Some(id)) => json(200, &self.context.store.get(resource, id)?),
            (Method::Post, None) => self.create(resource, request),
            (Method::Put, Some(id)) => self.update(resource, id, request),
            (Method::Delete, Some(id)) => {
                self.context.store.delete(resource, id)?;
                Ok(HttpResponse::no_content())
            }
            (method, _) => Err(ServerError::MethodNotAllowed {
                method,
                path: path.to_string(),
            }),
        }
    }

    fn strip_base<'a>(&self, url: &'a str) -> ServerResult<&'a str> {
        let base = self.context.config.base_path.as_str();
        match url.strip_prefix(base) {
            Some(rest) if rest.starts_with('/') => Ok(rest),
            _ => Err(ServerError::UnknownResource(url.to_string())),
        }
    }

    fn authenticate(&self, request: &HttpRequest) -> ServerResult<()> {
        let Some(tokens) = self.context.tokens() else {
            return Ok(());
        };
        let token = request
            .bearer_token()
            .ok_or_else(|| ServerError::NotAuthorized("missing bearer token".into()))?;
        let device = tokens.validate_token(token)?;
        tracing::trace!(device = %device, "authenticated");
        Ok(())
    }

    fn list(&self, resource: &str, query: &str) -> ServerResult<HttpResponse> {
        let query = ListQuery::from_query_string(query)?;
        let page = self
            .context
            .store
            .list(resource, &query, self.context.config.max_page_size)?;
        json(200, &page)
    }

    fn create(&self, resource: &str, request: &HttpRequest) -> ServerResult<HttpResponse> {
        let created = self.context.store.create(resource, body(request)?)?;
        json(if created.inserted { 201 } else { 200 }, &created.record)
    }

    fn update(&self, resource: &str, id: Uuid, request: &HttpRequest) -> ServerResult<HttpResponse> {
        let record = self.context.store.update(resource, id, body(request)?)?;
        json(200, &record)
    }
}

fn body(request: &HttpRequest) -> ServerResult<Value> {
    let bytes = request
        .body
        .as_deref()
        .ok_or_else(|| ServerError::InvalidRequest("missing body".into()))?;
    serde_json::from_slice(bytes).map_err(|e| ServerError::InvalidRequest(format!("invalid json: {e}")))
}

fn json<T: Serialize + ?Sized>(status: u16, body: &T) -> ServerResult<HttpResponse> {
    HttpResponse::json(status, body).map_err(|e| ServerError::Internal(e.to_string()))
}

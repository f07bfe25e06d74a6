//! Scripted in-process backend used by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::auth::{CredentialStore, DurableStore, MemoryStore};

use super::client::ApiClient;
use super::endpoints::Endpoints;
use super::error::TransportError;
use super::transport::{ApiRequest, ApiResponse, Transport};

pub(crate) const BASE_URL: &str = "http://backend.test";

const DATA_PATHS: [&str; 4] = [
    "/ai_chat/chats/",
    "/ai_chat/messages/",
    "/ai_chat/models/",
    "/ai_chat/agents/",
];

/// Data endpoints answer 200 only to `accepted_token`, 401 otherwise.
/// The renewal endpoint answers with a fixed reply, optionally held back
/// until a given number of 401s have been served.
pub(crate) struct ScriptedTransport {
    accepted_token: Option<String>,
    open_paths: Vec<String>,
    routes: HashMap<String, (StatusCode, String)>,
    renewal_reply: (StatusCode, String),
    hold_renewal_until: usize,
    fail_transport: bool,
    fail_renewal: bool,

    renewal_calls: AtomicUsize,
    unauthorized_served: AtomicUsize,
    data_requests: Mutex<Vec<ApiRequest>>,
    route_requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub fn accepting(token: &str) -> Self {
        Self::build(Some(token.to_string()))
    }

    pub fn rejecting_all() -> Self {
        Self::build(None)
    }

    fn build(accepted_token: Option<String>) -> Self {
        Self {
            accepted_token,
            open_paths: Vec::new(),
            routes: HashMap::new(),
            renewal_reply: (StatusCode::UNAUTHORIZED, String::new()),
            hold_renewal_until: 0,
            fail_transport: false,
            fail_renewal: false,
            renewal_calls: AtomicUsize::new(0),
            unauthorized_served: AtomicUsize::new(0),
            data_requests: Mutex::new(Vec::new()),
            route_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_renewal(mut self, status: StatusCode, body: &str) -> Self {
        self.renewal_reply = (status, body.to_string());
        self
    }

    pub fn with_route(mut self, path: &str, status: StatusCode, body: &str) -> Self {
        self.routes
            .insert(path.to_string(), (status, body.to_string()));
        self
    }

    pub fn with_open_path(mut self, path: &str) -> Self {
        self.open_paths.push(path.to_string());
        self
    }

    pub fn hold_renewal_until(mut self, unauthorized: usize) -> Self {
        self.hold_renewal_until = unauthorized;
        self
    }

    pub fn failing_transport(mut self) -> Self {
        self.fail_transport = true;
        self
    }

    /// Only the renewal call fails at the network level.
    pub fn failing_renewal(mut self) -> Self {
        self.fail_renewal = true;
        self
    }

    pub fn renewal_calls(&self) -> usize {
        self.renewal_calls.load(Ordering::SeqCst)
    }

    pub fn data_requests(&self) -> Vec<ApiRequest> {
        self.data_requests.lock().unwrap().clone()
    }

    pub fn route_requests(&self) -> Vec<ApiRequest> {
        self.route_requests.lock().unwrap().clone()
    }

    async fn renewal(&self) -> Result<ApiResponse, TransportError> {
        self.renewal_calls.fetch_add(1, Ordering::SeqCst);
        while self.unauthorized_served.load(Ordering::SeqCst) < self.hold_renewal_until {
            tokio::task::yield_now().await;
        }
        if self.fail_renewal {
            return Err(TransportError::Other("connection reset by peer".to_string()));
        }
        let (status, body) = &self.renewal_reply;
        Ok(ApiResponse::new(*status, body.as_bytes()))
    }

    fn data(&self, path: &str, request: &ApiRequest) -> ApiResponse {
        self.data_requests.lock().unwrap().push(request.clone());

        let open = self.open_paths.iter().any(|p| p == path);
        let authorized = self.accepted_token.is_some()
            && request.bearer_token() == self.accepted_token.as_deref();
        if !open && !authorized {
            self.unauthorized_served.fetch_add(1, Ordering::SeqCst);
            return ApiResponse::new(
                StatusCode::UNAUTHORIZED,
                r#"{"detail":"Given token not valid for any token type"}"#,
            );
        }

        if DATA_PATHS.contains(&path) {
            ApiResponse::new(StatusCode::OK, "[]")
        } else {
            ApiResponse::new(StatusCode::NOT_FOUND, r#"{"detail":"Not found."}"#)
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        if self.fail_transport {
            return Err(TransportError::Other("connection refused".to_string()));
        }

        let path = request
            .url
            .strip_prefix(BASE_URL)
            .unwrap_or(request.url.as_str());
        let path = path.split('?').next().unwrap_or(path);

        if path == "/ai_chat/auth/refresh/" {
            return self.renewal().await;
        }
        if let Some((status, body)) = self.routes.get(path) {
            self.route_requests.lock().unwrap().push(request.clone());
            return Ok(ApiResponse::new(*status, body.as_bytes()));
        }
        Ok(self.data(path, request))
    }
}

/// Client wired to a scripted transport and an in-memory durable store.
pub(crate) struct Harness {
    pub client: ApiClient,
    pub transport: Arc<ScriptedTransport>,
    pub durable: MemoryStore,
}

impl Harness {
    pub fn new(transport: ScriptedTransport) -> Self {
        Self::with_durable(transport, MemoryStore::new())
    }

    pub fn with_durable(transport: ScriptedTransport, durable: MemoryStore) -> Self {
        let transport = Arc::new(transport);
        let credentials = CredentialStore::new(Box::new(durable.clone()));
        let client = ApiClient::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::new(credentials),
            Endpoints::new(BASE_URL),
        );
        Self {
            client,
            transport,
            durable,
        }
    }

    pub fn stored_access(&self) -> Option<String> {
        self.durable.load("access").unwrap()
    }
}

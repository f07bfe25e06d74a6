//! Authenticated request client for the chat backend.
//!
//! Every request goes out with cookies included and, when a token is held,
//! an `Authorization: Bearer` header. A 401 triggers one token renewal shared
//! by every request that hits a 401 while it is in flight; each such request
//! is then replayed once with the renewed token.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use anyhow::{Context, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::auth::{open_store, CredentialStore};
use crate::config::Config;

use super::endpoints::Endpoints;
use super::error::{ApiError, RenewalError};
use super::transport::{
    ApiRequest, ApiResponse, CredentialsMode, ReqwestTransport, RequestOptions, Transport,
};

type RenewalOperation = Shared<BoxFuture<'static, Result<String, RenewalError>>>;
type RenewalSlot = Mutex<Option<RenewalOperation>>;

#[derive(Debug, Deserialize)]
struct RenewalResponse {
    access: Option<String>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    credentials: Arc<CredentialStore>,
    endpoints: Endpoints,
    renewal: Arc<RenewalSlot>,
}

/// Session context: credential slot, renewal slot and transport.
/// Clone is cheap and clones share both slots.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Arc<CredentialStore>,
        endpoints: Endpoints,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                credentials,
                endpoints,
                renewal: Arc::new(Mutex::new(None)),
            }),
        }
    }

    /// Build a client with the reqwest transport and the configured storage.
    pub fn from_config(config: &Config) -> Result<Self> {
        let endpoints = Endpoints::new(config.base_url()?);
        let transport = ReqwestTransport::new(config.request_timeout())
            .context("Failed to build HTTP client")?;
        let durable = open_store(config.storage_backend(), &config.cache_dir()?);
        let credentials = CredentialStore::new(durable);

        debug!(
            base_url = endpoints.base_url(),
            storage = %config.storage_backend(),
            "API client configured"
        );

        Ok(Self::new(
            Arc::new(transport),
            Arc::new(credentials),
            endpoints,
        ))
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.inner.credentials
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.inner.endpoints
    }

    /// Send a request with the current token, renewing and replaying once on 401.
    pub async fn request(
        &self,
        target: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse, ApiError> {
        self.request_with_retry(target, options, true).await
    }

    /// Like [`request`](Self::request); with `allow_retry == false` a 401 is
    /// returned as-is without attempting renewal.
    pub async fn request_with_retry(
        &self,
        target: &str,
        options: RequestOptions,
        allow_retry: bool,
    ) -> Result<ApiResponse, ApiError> {
        let mut request = self.prepare(target, options);
        if let Some(token) = self.inner.credentials.get() {
            attach_bearer(&mut request.headers, &token)?;
        }

        let response = self.inner.transport.send(&request).await?;
        if response.status != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        if !allow_retry {
            debug!(url = %request.url, "Unauthorized, retry not allowed");
            return Ok(response);
        }

        debug!(url = %request.url, "Unauthorized, renewing access token");
        // The renewal has already cleared the credential store on failure.
        let token = self.renew().await.map_err(ApiError::SessionEnded)?;

        let mut replay = request.clone();
        attach_bearer(&mut replay.headers, &token)?;
        let response = self.inner.transport.send(&replay).await?;
        if response.status == StatusCode::UNAUTHORIZED {
            warn!(url = %replay.url, "Still unauthorized after token renewal");
        }
        Ok(response)
    }

    /// Send a request without a bearer token and without renewal, e.g. login.
    pub async fn request_anonymous(
        &self,
        target: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse, ApiError> {
        let mut request = self.prepare(target, options);
        request.headers.remove(header::AUTHORIZATION);
        Ok(self.inner.transport.send(&request).await?)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, target: &str) -> Result<T, ApiError> {
        let response = self.request(target, RequestOptions::get()).await?;
        Self::parse_json(target, response)
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        target: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let options = RequestOptions::post()
            .json(body)
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
        let response = self.request(target, options).await?;
        Self::parse_json(target, response)
    }

    /// Check if response is successful, returning an error with body if not.
    pub fn check_response(response: ApiResponse) -> Result<ApiResponse, ApiError> {
        if response.is_success() {
            Ok(response)
        } else {
            Err(ApiError::from_status(response.status, &response.text()))
        }
    }

    fn parse_json<T: DeserializeOwned>(target: &str, response: ApiResponse) -> Result<T, ApiError> {
        let response = Self::check_response(response)?;
        response.json().map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON from {}: {}", target, e))
        })
    }

    fn prepare(&self, target: &str, options: RequestOptions) -> ApiRequest {
        ApiRequest {
            method: options.method,
            url: self.inner.endpoints.resolve(target),
            headers: options.headers,
            body: options.body,
            // The renewal endpoint relies on the cookie, so it always travels.
            credentials: CredentialsMode::Include,
        }
    }

    /// Join the in-flight renewal, or start one if none is running.
    async fn renew(&self) -> Result<String, RenewalError> {
        let operation = {
            let mut slot = self
                .inner
                .renewal
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(operation) => {
                    debug!("Joining in-flight token renewal");
                    operation.clone()
                }
                None => {
                    let operation = run_renewal(
                        Arc::clone(&self.inner.transport),
                        Arc::clone(&self.inner.credentials),
                        self.inner.endpoints.refresh.clone(),
                        Arc::downgrade(&self.inner.renewal),
                    )
                    .boxed()
                    .shared();
                    *slot = Some(operation.clone());
                    operation
                }
            }
        };
        operation.await
    }
}

fn bearer_value(token: &str) -> Option<HeaderValue> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token)).ok()?;
    value.set_sensitive(true);
    Some(value)
}

fn attach_bearer(headers: &mut HeaderMap, token: &str) -> Result<(), ApiError> {
    let value = bearer_value(token)
        .ok_or_else(|| ApiError::InvalidRequest("access token is not a valid header value".into()))?;
    headers.insert(header::AUTHORIZATION, value);
    Ok(())
}

/// One renewal wave. The slot is emptied before the outcome is committed and
/// before any awaiter wakes, so a later 401 starts a fresh renewal.
async fn run_renewal(
    transport: Arc<dyn Transport>,
    credentials: Arc<CredentialStore>,
    url: String,
    slot: Weak<RenewalSlot>,
) -> Result<String, RenewalError> {
    let result = call_renewal_endpoint(transport.as_ref(), url).await;

    if let Some(slot) = slot.upgrade() {
        slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    match result {
        Ok(ref token) => {
            credentials.set(token.as_str());
            info!("Access token renewed");
        }
        Err(ref e) => {
            warn!(error = %e, "Token renewal failed, clearing credentials");
            credentials.clear();
        }
    }
    result
}

async fn call_renewal_endpoint(transport: &dyn Transport, url: String) -> Result<String, RenewalError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    let request = ApiRequest {
        method: Method::POST,
        url,
        headers,
        body: Some(b"{}".to_vec()),
        credentials: CredentialsMode::Include,
    };

    let response = transport
        .send(&request)
        .await
        .map_err(|e| RenewalError::Transport(e.to_string()))?;
    if !response.is_success() {
        return Err(RenewalError::Rejected(response.status));
    }

    let renewal: RenewalResponse = response.json().map_err(|_| RenewalError::Malformed)?;
    // A token that cannot travel as a header is as unusable as a missing one.
    match renewal.access {
        Some(access) if !access.is_empty() && bearer_value(&access).is_some() => Ok(access),
        _ => Err(RenewalError::Malformed),
    }
}

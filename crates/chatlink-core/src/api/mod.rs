//! REST client module for the chat backend.
//!
//! This module provides the `ApiClient`, which attaches the current access
//! token to every request and renews it through the backend's refresh
//! endpoint when a request comes back 401. The renewal credential itself is
//! an HTTP-only cookie kept by the transport; this crate never reads it.

pub mod client;
pub mod endpoints;
pub mod error;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use client::ApiClient;
pub use endpoints::Endpoints;
pub use error::{ApiError, RenewalError, TransportError};
pub use transport::{
    ApiRequest, ApiResponse, CredentialsMode, ReqwestTransport, RequestOptions, Transport,
};

//! Core library for chatlink.
//!
//! Provides the authenticated request client for the chat backend, the
//! credential store it reads from, and the application configuration.

pub mod api;
pub mod auth;
pub mod config;

pub use api::{ApiClient, ApiError, ApiResponse, Endpoints, RequestOptions};
pub use auth::{CredentialStore, Session};
pub use config::Config;

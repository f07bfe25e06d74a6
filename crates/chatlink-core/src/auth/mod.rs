//! Authentication module for managing the access token and login state.
//!
//! This module provides:
//! - `CredentialStore`: in-memory access token mirrored to durable storage
//! - `DurableStore` implementations: session file, OS keychain, in-memory
//! - `Session`: login and logout against the backend

pub mod credentials;
pub mod session;
pub mod storage;

pub use credentials::CredentialStore;
pub use session::Session;
pub use storage::{open_store, DurableStore, FileStore, KeyringStore, MemoryStore};

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;
use tracing::{debug, warn};

use super::storage::DurableStore;

/// Durable key holding the access token
const ACCESS_KEY: &str = "access";

/// Durable key holding the cached user identity from login
const USER_KEY: &str = "user";

#[derive(Default)]
struct Slots {
    access: Option<String>,
    user: Option<Value>,
}

/// Holder of the current access token, mirrored into a durable store.
///
/// Reads only touch memory. Writes update memory and the durable copy while
/// holding the same lock, so a reader never sees one cleared without the other.
/// Durable-store failures are logged and otherwise ignored: the in-memory
/// value stays authoritative for this process.
pub struct CredentialStore {
    slots: RwLock<Slots>,
    durable: Box<dyn DurableStore>,
}

impl CredentialStore {
    /// Create a store, seeding memory from whatever the durable store holds.
    pub fn new(durable: Box<dyn DurableStore>) -> Self {
        let access = durable.load(ACCESS_KEY).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load stored access token");
            None
        });
        let user = durable
            .load(USER_KEY)
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to load stored user");
                None
            })
            .and_then(|raw| serde_json::from_str(&raw).ok());

        debug!(has_token = access.is_some(), "Credential store initialized");

        Self {
            slots: RwLock::new(Slots { access, user }),
            durable,
        }
    }

    /// Store a new access token. No validation of its shape.
    pub fn set(&self, token: impl Into<String>) {
        let token = token.into();
        let mut slots = self.write();
        if let Err(e) = self.durable.save(ACCESS_KEY, &token) {
            warn!(error = %e, "Failed to persist access token");
        }
        slots.access = Some(token);
    }

    /// Current access token, if any.
    pub fn get(&self) -> Option<String> {
        self.read().access.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().access.is_some()
    }

    /// Drop the access token and the cached user, in memory and on disk.
    pub fn clear(&self) {
        let mut slots = self.write();
        slots.access = None;
        slots.user = None;
        for key in [ACCESS_KEY, USER_KEY] {
            if let Err(e) = self.durable.remove(key) {
                warn!(error = %e, key, "Failed to remove stored credential");
            }
        }
        debug!("Credentials cleared");
    }

    /// Cache the user identity returned by login.
    pub fn set_user(&self, user: Value) {
        let mut slots = self.write();
        if let Err(e) = self.durable.save(USER_KEY, &user.to_string()) {
            warn!(error = %e, "Failed to persist user");
        }
        slots.user = Some(user);
    }

    pub fn user(&self) -> Option<Value> {
        self.read().user.clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, Slots> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Slots> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }
}

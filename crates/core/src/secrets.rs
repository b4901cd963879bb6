//! Secret storage abstraction.
//!
//! The access token for the building API is kept in local persistent storage
//! and read back on every authenticated request. Each host (CLI, tests)
//! provides its own backend.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::errors::{Error, Result};

/// Key under which the bearer token for the building API is stored.
pub const ACCESS_TOKEN_KEY: &str = "access_token";

const SERVICE_PREFIX: &str = "condo_";

/// Namespaces a service key so different tools can share one backing file.
pub fn format_service_id(service: &str) -> String {
    if service.starts_with(SERVICE_PREFIX) {
        service.to_string()
    } else {
        format!("{}{}", SERVICE_PREFIX, service)
    }
}

/// Persistent key/value storage for credentials.
pub trait SecretStore: Send + Sync {
    fn set_secret(&self, service: &str, secret: &str) -> Result<()>;
    fn get_secret(&self, service: &str) -> Result<Option<String>>;
    fn delete_secret(&self, service: &str) -> Result<()>;
}

/// Process-local secret store, used by tests and by callers that inject a
/// token without touching disk.
#[derive(Debug, Default)]
pub struct InMemorySecretStore {
    secrets: Mutex<HashMap<String, String>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor holding only an access token.
    pub fn with_access_token(token: &str) -> Self {
        let store = Self::new();
        if let Ok(mut secrets) = store.secrets.lock() {
            secrets.insert(format_service_id(ACCESS_TOKEN_KEY), token.to_string());
        }
        store
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.secrets
            .lock()
            .map_err(|_| Error::Secret("Secret store lock poisoned".into()))
    }
}

impl SecretStore for InMemorySecretStore {
    fn set_secret(&self, service: &str, secret: &str) -> Result<()> {
        self.lock()?
            .insert(format_service_id(service), secret.to_string());
        Ok(())
    }

    fn get_secret(&self, service: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(&format_service_id(service)).cloned())
    }

    fn delete_secret(&self, service: &str) -> Result<()> {
        self.lock()?.remove(&format_service_id(service));
        Ok(())
    }
}

//! Traits at the network seams of the lifecycle.
//!
//! The controller only talks to these; the reqwest-backed implementations live
//! in `client` and `workflow`.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::types::{CreateInstanceRequest, WebhookName, WebhookResponse, WhatsAppInstance};

/// Persistence of the instance record (the building API).
#[async_trait]
pub trait InstanceBackend: Send + Sync {
    /// Fetch the persisted instance of a building, `None` if there is none.
    async fn get_instance(&self, building_id: &str) -> Result<Option<WhatsAppInstance>>;

    /// Persist a new instance row. The server rejects a second instance for
    /// the same building.
    async fn create_instance(
        &self,
        building_id: &str,
        request: CreateInstanceRequest,
    ) -> Result<Option<WhatsAppInstance>>;

    /// Delete the persisted instance row.
    async fn delete_instance(&self, building_id: &str) -> Result<()>;
}

/// Lookup of workflow webhook URLs by logical name.
#[async_trait]
pub trait WebhookDirectory: Send + Sync {
    /// `Ok(None)` means the name is not registered.
    async fn resolve(&self, name: WebhookName) -> Result<Option<String>>;
}

/// POSTs JSON payloads to workflow webhook URLs.
///
/// Implementations return the raw status and body for any HTTP answer and
/// only fail on transport problems; callers interpret the body field by field.
#[async_trait]
pub trait WorkflowTransport: Send + Sync {
    async fn post(&self, url: &str, payload: Value) -> Result<WebhookResponse>;
}

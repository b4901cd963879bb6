//! Types for the building API and the WhatsApp workflow webhooks.

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

// ─────────────────────────────────────────────────────────────────────────────
// Status Types
// ─────────────────────────────────────────────────────────────────────────────

/// Locally displayed connection status of a building's WhatsApp instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WhatsappStatus {
    #[default]
    Disconnected,
    Pending,
    Connected,
    Failed,
    Connecting,
}

impl WhatsappStatus {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Pending => "PENDING",
            Self::Connected => "CONNECTED",
            Self::Failed => "FAILED",
            Self::Connecting => "CONNECTING",
        }
    }
}

impl fmt::Display for WhatsappStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WhatsappStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DISCONNECTED" => Ok(Self::Disconnected),
            "PENDING" => Ok(Self::Pending),
            "CONNECTED" => Ok(Self::Connected),
            "FAILED" => Ok(Self::Failed),
            "CONNECTING" => Ok(Self::Connecting),
            other => Err(format!("Unknown WhatsApp status: {}", other)),
        }
    }
}

/// Deserializes a persisted status, treating unknown or missing values as
/// `DISCONNECTED` so a record never carries an undefined status.
fn deserialize_status<'de, D>(deserializer: D) -> Result<WhatsappStatus, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(match raw {
        Some(s) => s.parse().unwrap_or_else(|e| {
            warn!("[WhatsAppInstance] {}, treating as DISCONNECTED", e);
            WhatsappStatus::Disconnected
        }),
        None => WhatsappStatus::Disconnected,
    })
}

/// Accepts ids serialized either as JSON strings or numbers.
fn deserialize_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Value> = Option::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn deserialize_required_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(deserialize_id(deserializer)?.unwrap_or_default())
}

/// Raw connection state reported by the messaging provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderState {
    Open,
    Connecting,
    Close,
    Error,
    /// Anything the provider sends that we do not recognise.
    Unknown(String),
}

impl ProviderState {
    /// Parses the provider's raw state string. Missing values count as `close`.
    pub fn from_raw(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()) {
            Some(s) if s == "open" => Self::Open,
            Some(s) if s == "connecting" => Self::Connecting,
            Some(s) if s == "close" || s == "closed" => Self::Close,
            Some(s) if s == "error" => Self::Error,
            Some(s) if s.is_empty() => Self::Close,
            Some(s) => Self::Unknown(s),
            None => Self::Close,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Open => "open",
            Self::Connecting => "connecting",
            Self::Close => "close",
            Self::Error => "error",
            Self::Unknown(raw) => raw.as_str(),
        }
    }
}

/// Live status obtained from the status-check webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStatus {
    pub provider_state: ProviderState,
    pub status: WhatsappStatus,
    pub checked_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Instance Types
// ─────────────────────────────────────────────────────────────────────────────

/// Persisted WhatsApp instance record of a building.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatsAppInstance {
    /// Server-assigned identity
    #[serde(default, deserialize_with = "deserialize_id")]
    pub id: Option<String>,
    /// Owning building
    #[serde(deserialize_with = "deserialize_required_id")]
    pub building_id: String,
    /// Name sent to the provider (`"<buildingName> - <buildingId>"`)
    #[serde(default)]
    pub instance_name: String,
    /// Persisted status
    #[serde(default, deserialize_with = "deserialize_status")]
    pub status: WhatsappStatus,
    /// Number of connection attempts recorded by the server
    #[serde(default)]
    pub connection_attempts: u32,
    /// Last error recorded by the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// When the server last saw a connection attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_connection_attempt: Option<DateTime<Utc>>,
}

impl WhatsAppInstance {
    /// The provider-side name, if the record carries a usable one.
    pub fn provider_name(&self) -> Option<&str> {
        let name = self.instance_name.trim();
        (!name.is_empty()).then_some(name)
    }
}

/// Request body for creating an instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInstanceRequest {
    pub instance_name: String,
}

/// Response envelope used by the building API for reads and writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Response of the webhook directory for one logical name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEntry {
    pub url: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Workflow Webhook Types
// ─────────────────────────────────────────────────────────────────────────────

/// Logical names under which the workflow webhooks are registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WebhookName {
    GetStatus,
    Connect,
    Disconnect,
    DeleteInstance,
}

impl WebhookName {
    pub const ALL: [WebhookName; 4] = [
        WebhookName::GetStatus,
        WebhookName::Connect,
        WebhookName::Disconnect,
        WebhookName::DeleteInstance,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::GetStatus => "whatsapp_get_status",
            Self::Connect => "whatsapp_connect",
            Self::Disconnect => "whatsapp_disconnect",
            Self::DeleteInstance => "whatsapp_delete_instance",
        }
    }
}

impl fmt::Display for WebhookName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload for webhooks that only need the provider-side name.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstancePayload<'a> {
    pub instance_name: &'a str,
}

/// Payload for the connect webhook.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectPayload<'a> {
    pub building_id: &'a str,
    pub instance_name: &'a str,
}

/// Raw answer of a workflow webhook call.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: Value,
}

impl WebhookResponse {
    pub fn is_http_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Workflow replies are ad hoc; every field is checked on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowReply {
    pub success: Option<bool>,
    pub message: Option<String>,
    pub qr_base64: Option<String>,
}

impl WorkflowReply {
    /// Reads the known fields out of a reply body of unknown shape.
    ///
    /// Workflow engines often wrap single items in an array; the first element
    /// is used in that case.
    pub fn from_value(body: &Value) -> Self {
        let body = match body {
            Value::Array(items) => items.first().unwrap_or(&Value::Null),
            other => other,
        };

        let success = match body.get("success") {
            Some(Value::Bool(b)) => Some(*b),
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        };

        let text = |key: &str| {
            body.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Self {
            success,
            message: text("message").or_else(|| text("error")),
            qr_base64: text("qr_base64"),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success == Some(true)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle Actions
// ─────────────────────────────────────────────────────────────────────────────

/// User-triggered or scheduled operations of the lifecycle controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    Create,
    RequestQr,
    Disconnect,
    Delete,
    Refresh,
}

impl LifecycleAction {
    /// Generic message used when no more specific one is available.
    pub fn failure_message(self) -> &'static str {
        match self {
            Self::Create => "Could not create the WhatsApp instance",
            Self::RequestQr => "Could not generate the QR code. Please try again.",
            Self::Disconnect => "Could not disconnect WhatsApp",
            Self::Delete => "Could not delete the WhatsApp instance",
            Self::Refresh => "Could not load the WhatsApp instance",
        }
    }

    pub fn success_message(self) -> &'static str {
        match self {
            Self::Create => "WhatsApp instance created",
            Self::RequestQr => "Scan the QR code with WhatsApp to link the device",
            Self::Disconnect => "WhatsApp disconnected",
            Self::Delete => "WhatsApp instance deleted",
            Self::Refresh => "WhatsApp instance refreshed",
        }
    }
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Create => "Instance creation",
            Self::RequestQr => "QR generation",
            Self::Disconnect => "Disconnect",
            Self::Delete => "Instance deletion",
            Self::Refresh => "Instance refresh",
        };
        f.write_str(label)
    }
}

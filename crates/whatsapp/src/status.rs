//! Mapping from the provider's raw connection state to [`WhatsappStatus`].
//!
//! The mapping is total: every input, including a missing state, yields a
//! status.

use serde_json::Value;

use crate::types::{ProviderState, WhatsappStatus};

/// `open → CONNECTED`, `connecting → PENDING`, everything else `DISCONNECTED`.
pub fn status_from_provider(state: &ProviderState) -> WhatsappStatus {
    match state {
        ProviderState::Open => WhatsappStatus::Connected,
        ProviderState::Connecting => WhatsappStatus::Pending,
        ProviderState::Close | ProviderState::Error | ProviderState::Unknown(_) => {
            WhatsappStatus::Disconnected
        }
    }
}

/// Same as [`status_from_provider`] for an unparsed raw string.
pub fn status_from_raw(raw: Option<&str>) -> WhatsappStatus {
    status_from_provider(&ProviderState::from_raw(raw))
}

/// Pulls the raw provider state out of a status webhook reply.
///
/// Known shapes:
/// - `{ "instance": { "state": "open" } }`
/// - `{ "state": "open" }`
/// - `{ "data": { "state": "open" } }`
/// - `{ "connectionStatus": "open" }`
/// - any of the above wrapped in a one-element array
pub fn extract_provider_state(body: &Value) -> Option<String> {
    let body = match body {
        Value::Array(items) => items.first()?,
        other => other,
    };

    let candidates = [
        body.pointer("/instance/state"),
        body.get("state"),
        body.pointer("/data/state"),
        body.pointer("/data/instance/state"),
        body.get("connectionStatus"),
    ];

    candidates
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

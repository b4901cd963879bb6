//! Status Poller
//!
//! Asks the messaging provider, through the `whatsapp_get_status` workflow
//! webhook, for the live connection state of an instance. A failing call never
//! propagates: it degrades to an `error` provider state so the polling loop
//! keeps its schedule.

use chrono::Utc;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::status::{extract_provider_state, status_from_provider};
use crate::traits::{WebhookDirectory, WorkflowTransport};
use crate::types::{InstancePayload, LiveStatus, ProviderState, WebhookName, WorkflowReply};

/// How a status check ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOutcome {
    /// Missing webhook URL or instance name; nothing was called.
    Skipped,
    /// The provider reported a state.
    Reported,
    /// The call failed and was degraded to `error`.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCheck {
    pub live: LiveStatus,
    pub outcome: CheckOutcome,
}

impl StatusCheck {
    fn new(provider_state: ProviderState, outcome: CheckOutcome) -> Self {
        Self {
            live: LiveStatus {
                status: status_from_provider(&provider_state),
                provider_state,
                checked_at: Utc::now(),
            },
            outcome,
        }
    }
}

pub struct StatusPoller {
    directory: Arc<dyn WebhookDirectory>,
    transport: Arc<dyn WorkflowTransport>,
}

impl StatusPoller {
    pub fn new(directory: Arc<dyn WebhookDirectory>, transport: Arc<dyn WorkflowTransport>) -> Self {
        Self {
            directory,
            transport,
        }
    }

    /// Run one status check for `instance_name`.
    pub async fn check(&self, instance_name: Option<&str>) -> StatusCheck {
        let Some(instance_name) = instance_name.map(str::trim).filter(|n| !n.is_empty()) else {
            debug!("[StatusPoller] No instance name, reporting disconnected");
            return StatusCheck::new(ProviderState::Close, CheckOutcome::Skipped);
        };

        let url = match self.directory.resolve(WebhookName::GetStatus).await {
            Ok(Some(url)) => url,
            Ok(None) => {
                debug!("[StatusPoller] Status webhook not configured, reporting disconnected");
                return StatusCheck::new(ProviderState::Close, CheckOutcome::Skipped);
            }
            Err(e) => {
                warn!("[StatusPoller] Could not resolve status webhook: {}", e);
                return StatusCheck::new(ProviderState::Error, CheckOutcome::Failed);
            }
        };

        let payload = match serde_json::to_value(InstancePayload { instance_name }) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("[StatusPoller] Could not encode status payload: {}", e);
                return StatusCheck::new(ProviderState::Error, CheckOutcome::Failed);
            }
        };

        let response = match self.transport.post(&url, payload).await {
            Ok(response) => response,
            Err(e) => {
                warn!("[StatusPoller] Status check for '{}' failed: {}", instance_name, e);
                return StatusCheck::new(ProviderState::Error, CheckOutcome::Failed);
            }
        };

        if !response.is_http_success() {
            warn!(
                "[StatusPoller] Status webhook answered HTTP {} for '{}'",
                response.status, instance_name
            );
            return StatusCheck::new(ProviderState::Error, CheckOutcome::Failed);
        }

        match extract_provider_state(&response.body) {
            Some(raw) => {
                let state = ProviderState::from_raw(Some(&raw));
                debug!("[StatusPoller] '{}' is {}", instance_name, state.as_str());
                StatusCheck::new(state, CheckOutcome::Reported)
            }
            None => {
                let reply = WorkflowReply::from_value(&response.body);
                if reply.success == Some(false) {
                    warn!(
                        "[StatusPoller] Status webhook rejected '{}': {}",
                        instance_name,
                        reply.message.as_deref().unwrap_or("no message")
                    );
                    StatusCheck::new(ProviderState::Error, CheckOutcome::Failed)
                } else {
                    StatusCheck::new(ProviderState::Close, CheckOutcome::Reported)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockTransport, STATUS_URL};
    use crate::types::WhatsappStatus;
    use crate::workflow::StaticWebhookDirectory;
    use serde_json::json;

    fn poller(transport: &MockTransport, with_url: bool) -> StatusPoller {
        let mut directory = StaticWebhookDirectory::new();
        if with_url {
            directory = directory.with(WebhookName::GetStatus, STATUS_URL);
        }
        StatusPoller::new(Arc::new(directory), Arc::new(transport.clone()))
    }

    #[tokio::test]
    async fn open_maps_to_connected() {
        let transport = MockTransport::new();
        transport.reply(STATUS_URL, 200, json!({ "instance": { "state": "open" } }));

        let check = poller(&transport, true).check(Some("Torre - 1")).await;
        assert_eq!(check.outcome, CheckOutcome::Reported);
        assert_eq!(check.live.status, WhatsappStatus::Connected);
        assert_eq!(
            transport.calls_to(STATUS_URL),
            vec![json!({ "instanceName": "Torre - 1" })]
        );
    }

    #[tokio::test]
    async fn connecting_maps_to_pending() {
        let transport = MockTransport::new();
        transport.reply(STATUS_URL, 200, json!({ "state": "connecting" }));

        let check = poller(&transport, true).check(Some("Torre - 1")).await;
        assert_eq!(check.live.status, WhatsappStatus::Pending);
    }

    #[tokio::test]
    async fn missing_url_or_name_skips_without_calling() {
        let transport = MockTransport::new();

        let check = poller(&transport, false).check(Some("Torre - 1")).await;
        assert_eq!(check.outcome, CheckOutcome::Skipped);
        assert_eq!(check.live.status, WhatsappStatus::Disconnected);

        let check = poller(&transport, true).check(None).await;
        assert_eq!(check.outcome, CheckOutcome::Skipped);
        assert!(transport.calls_to(STATUS_URL).is_empty());
    }

    #[tokio::test]
    async fn transport_failure_degrades_to_error_state() {
        let transport = MockTransport::new();
        transport.fail(STATUS_URL);

        let check = poller(&transport, true).check(Some("Torre - 1")).await;
        assert_eq!(check.outcome, CheckOutcome::Failed);
        assert_eq!(check.live.provider_state, ProviderState::Error);
        assert_eq!(check.live.status, WhatsappStatus::Disconnected);
    }

    #[tokio::test]
    async fn non_2xx_degrades_to_error_state() {
        let transport = MockTransport::new();
        transport.reply(STATUS_URL, 502, json!({ "message": "bad gateway" }));

        let check = poller(&transport, true).check(Some("Torre - 1")).await;
        assert_eq!(check.outcome, CheckOutcome::Failed);
    }
}

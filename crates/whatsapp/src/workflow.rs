//! Workflow webhook plumbing: URL lookup by logical name and the HTTP
//! transport used to call the resolved URLs.

use async_trait::async_trait;
use log::{debug, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::traits::{WebhookDirectory, WorkflowTransport};
use crate::types::{WebhookName, WebhookResponse};

// ─────────────────────────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────────────────────────

/// reqwest-backed [`WorkflowTransport`].
///
/// Webhook URLs are opaque and carry their own credentials, so no bearer
/// token is attached.
#[derive(Debug, Clone)]
pub struct HttpWorkflowTransport {
    client: reqwest::Client,
}

impl HttpWorkflowTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WorkflowTransport for HttpWorkflowTransport {
    async fn post(&self, url: &str, payload: Value) -> Result<WebhookResponse> {
        debug!("[Workflow] POST {} {}", url, payload);

        let response = self.client.post(url).json(&payload).send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        debug!("[Workflow] response ({}): {}", status, text);

        Ok(WebhookResponse {
            status,
            body: parse_body(&text),
        })
    }
}

/// Workflow engines sometimes answer with plain text; keep it as a string
/// value instead of failing.
fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Directories
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed name → URL table, usually built from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticWebhookDirectory {
    urls: HashMap<WebhookName, String>,
}

impl StaticWebhookDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a URL; blank URLs are ignored.
    pub fn with(mut self, name: WebhookName, url: impl Into<String>) -> Self {
        let url = url.into().trim().to_string();
        if !url.is_empty() {
            self.urls.insert(name, url);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

impl FromIterator<(WebhookName, String)> for StaticWebhookDirectory {
    fn from_iter<I: IntoIterator<Item = (WebhookName, String)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |dir, (name, url)| dir.with(name, url))
    }
}

#[async_trait]
impl WebhookDirectory for StaticWebhookDirectory {
    async fn resolve(&self, name: WebhookName) -> Result<Option<String>> {
        Ok(self.urls.get(&name).cloned())
    }
}

/// Tries each directory in order; the first URL found wins.
///
/// A failing layer is logged and skipped unless it is the last one, so a
/// static override keeps working while the API directory is unreachable.
pub struct ChainedWebhookDirectory {
    layers: Vec<Arc<dyn WebhookDirectory>>,
}

impl ChainedWebhookDirectory {
    pub fn new(layers: Vec<Arc<dyn WebhookDirectory>>) -> Self {
        Self { layers }
    }
}

#[async_trait]
impl WebhookDirectory for ChainedWebhookDirectory {
    async fn resolve(&self, name: WebhookName) -> Result<Option<String>> {
        let last = self.layers.len().saturating_sub(1);
        for (index, layer) in self.layers.iter().enumerate() {
            match layer.resolve(name).await {
                Ok(Some(url)) => return Ok(Some(url)),
                Ok(None) => continue,
                Err(e) if index < last => {
                    warn!("[Workflow] webhook lookup for {} failed, trying next: {}", name, e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }
}

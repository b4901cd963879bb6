//! Building API client for WhatsApp instance records.
//!
//! Every request reads the bearer token from the [`SecretStore`] so a token
//! refreshed by another process is picked up without restarting.

use async_trait::async_trait;
use log::{debug, error};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

use condo_core::secrets::{SecretStore, ACCESS_TOKEN_KEY};

use crate::error::{Result, WhatsAppError};
use crate::traits::{InstanceBackend, WebhookDirectory};
use crate::types::{
    ApiEnvelope, CreateInstanceRequest, WebhookEntry, WebhookName, WhatsAppInstance,
};

/// Default timeout for API requests.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, serde::Deserialize)]
struct ApiErrorResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Client for the building API endpoints under `/buildings/whatsapp` and the
/// workflow webhook directory.
#[derive(Clone)]
pub struct WhatsAppApiClient {
    client: reqwest::Client,
    base_url: String,
    secret_store: Arc<dyn SecretStore>,
}

impl std::fmt::Debug for WhatsAppApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhatsAppApiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl WhatsAppApiClient {
    /// Create a new API client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The API base URL (e.g., "https://api.example.com/api")
    /// * `secret_store` - Where the bearer token is read from
    /// * `timeout` - Per-request timeout
    pub fn new(
        base_url: &str,
        secret_store: Arc<dyn SecretStore>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_store,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn instance_url(&self, building_id: &str) -> String {
        format!("{}/buildings/whatsapp/{}", self.base_url, building_id)
    }

    /// Create headers for an authenticated request.
    fn headers(&self) -> Result<HeaderMap> {
        let token = self
            .secret_store
            .get_secret(ACCESS_TOKEN_KEY)?
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| WhatsAppError::auth("No access token. Please sign in first."))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let auth_value = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
            .map_err(|_| WhatsAppError::auth("Invalid access token format"))?;
        headers.insert(AUTHORIZATION, auth_value);
        Ok(headers)
    }

    /// Parse a response body into the standard envelope.
    async fn parse_envelope<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<ApiEnvelope<T>> {
        let status = response.status();
        let body = response.text().await?;
        debug!("[WhatsAppApi] response ({}): {}", status, body);
        Self::decode_envelope(status, &body)
    }

    fn decode_envelope<T: DeserializeOwned>(
        status: StatusCode,
        body: &str,
    ) -> Result<ApiEnvelope<T>> {
        if !status.is_success() {
            if let Ok(err) = serde_json::from_str::<ApiErrorResponse>(body) {
                let message = err
                    .message
                    .or(err.error)
                    .unwrap_or_else(|| format!("HTTP {}", status));
                return Err(WhatsAppError::api(status.as_u16(), message));
            }
            return Err(WhatsAppError::api(
                status.as_u16(),
                format!(
                    "Request failed: {}",
                    body.chars().take(200).collect::<String>()
                ),
            ));
        }

        let envelope: ApiEnvelope<T> = serde_json::from_str(body).map_err(|e| {
            error!("[WhatsAppApi] Failed to deserialize response. Body: {}, Error: {}", body, e);
            WhatsAppError::api(status.as_u16(), format!("Failed to parse response: {}", e))
        })?;

        if !envelope.success {
            return Err(WhatsAppError::api(
                status.as_u16(),
                envelope.message.clone().unwrap_or_default(),
            ));
        }
        Ok(envelope)
    }
}

#[async_trait]
impl InstanceBackend for WhatsAppApiClient {
    /// GET /buildings/whatsapp/{buildingId}
    async fn get_instance(&self, building_id: &str) -> Result<Option<WhatsAppInstance>> {
        let url = self.instance_url(building_id);
        debug!("[WhatsAppApi] GET {}", url);

        let response = self.client.get(&url).headers(self.headers()?).send().await?;
        let envelope: ApiEnvelope<WhatsAppInstance> = Self::parse_envelope(response).await?;
        Ok(envelope.data)
    }

    /// POST /buildings/whatsapp/{buildingId}
    async fn create_instance(
        &self,
        building_id: &str,
        request: CreateInstanceRequest,
    ) -> Result<Option<WhatsAppInstance>> {
        let url = self.instance_url(building_id);
        debug!("[WhatsAppApi] POST {} ({})", url, request.instance_name);

        let response = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await?;
        let envelope: ApiEnvelope<WhatsAppInstance> = Self::parse_envelope(response).await?;
        Ok(envelope.data)
    }

    /// DELETE /buildings/whatsapp/{buildingId}
    async fn delete_instance(&self, building_id: &str) -> Result<()> {
        let url = self.instance_url(building_id);
        debug!("[WhatsAppApi] DELETE {}", url);

        let response = self
            .client
            .delete(&url)
            .headers(self.headers()?)
            .send()
            .await?;
        let _: ApiEnvelope<serde_json::Value> = Self::parse_envelope(response).await?;
        Ok(())
    }
}

#[async_trait]
impl WebhookDirectory for WhatsAppApiClient {
    /// GET /workflows/webhooks/{name}
    async fn resolve(&self, name: WebhookName) -> Result<Option<String>> {
        let url = format!("{}/workflows/webhooks/{}", self.base_url, name.as_str());
        debug!("[WhatsAppApi] Resolving webhook {}", name);

        let response = self.client.get(&url).headers(self.headers()?).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let envelope: ApiEnvelope<WebhookEntry> = Self::parse_envelope(response).await?;
        Ok(envelope
            .data
            .map(|entry| entry.url.trim().to_string())
            .filter(|url| !url.is_empty()))
    }
}

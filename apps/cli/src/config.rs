use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Context};
use condo_core::Building;
use condo_whatsapp::{
    LifecycleConfig, PollIntervals, WebhookName, DEFAULT_TIMEOUT_SECS, INSTANCE_POLL_FAST_SECS,
    INSTANCE_POLL_IDLE_SECS, INSTANCE_POLL_NORMAL_SECS, QR_TTL_SECS, STATUS_POLL_FAST_SECS,
    STATUS_POLL_NORMAL_SECS,
};

pub struct Config {
    pub api_url: String,
    pub secret_file: PathBuf,
    pub building_id: Option<String>,
    pub building_name: Option<String>,
    pub request_timeout: Duration,
    pub lifecycle: LifecycleConfig,
    /// Static webhook URLs, consulted before the API directory.
    pub webhooks: Vec<(WebhookName, String)>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(get: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_url = text("CONDO_API_URL").unwrap_or_else(|| "http://localhost:3000/api".into());
        let secret_file = text("CONDO_SECRET_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./.condo/secrets.json"));

        let positive = |key: &str, default: u64| -> anyhow::Result<u64> {
            let value = match text(key) {
                Some(raw) => raw
                    .parse::<u64>()
                    .with_context(|| format!("Invalid {}: '{}'", key, raw))?,
                None => default,
            };
            if value == 0 {
                bail!("{} must be greater than zero", key);
            }
            Ok(value)
        };
        let secs = |key: &str, default: u64| positive(key, default).map(Duration::from_secs);
        let request_timeout = Duration::from_millis(positive(
            "CONDO_REQUEST_TIMEOUT_MS",
            DEFAULT_TIMEOUT_SECS * 1000,
        )?);

        let qr_ttl_secs = match text("CONDO_QR_TTL_SECS") {
            Some(raw) => raw
                .parse::<u32>()
                .with_context(|| format!("Invalid CONDO_QR_TTL_SECS: '{}'", raw))?,
            None => QR_TTL_SECS,
        };

        let lifecycle = LifecycleConfig {
            status_intervals: PollIntervals::new(
                secs("CONDO_STATUS_POLL_FAST_SECS", STATUS_POLL_FAST_SECS)?,
                secs("CONDO_STATUS_POLL_NORMAL_SECS", STATUS_POLL_NORMAL_SECS)?,
            ),
            instance_intervals: PollIntervals::new(
                secs("CONDO_INSTANCE_POLL_FAST_SECS", INSTANCE_POLL_FAST_SECS)?,
                secs("CONDO_INSTANCE_POLL_CONNECTED_SECS", INSTANCE_POLL_NORMAL_SECS)?,
            ),
            instance_idle_interval: secs("CONDO_INSTANCE_POLL_IDLE_SECS", INSTANCE_POLL_IDLE_SECS)?,
            qr_ttl_secs,
        };

        let webhooks = WebhookName::ALL
            .iter()
            .filter_map(|name| text(&webhook_env_key(*name)).map(|url| (*name, url)))
            .collect();

        Ok(Self {
            api_url,
            secret_file,
            building_id: text("CONDO_BUILDING_ID"),
            building_name: text("CONDO_BUILDING_NAME"),
            request_timeout,
            lifecycle,
            webhooks,
        })
    }

    /// The building to act on; command-line values win over the environment.
    ///
    /// Both id and name are required: the name is part of the provider
    /// instance name, so there is no fallback for it.
    pub fn building(&self, id: Option<&str>, name: Option<&str>) -> anyhow::Result<Building> {
        let Some(id) = id.or(self.building_id.as_deref()) else {
            bail!("No building selected: pass --building or set CONDO_BUILDING_ID");
        };
        let Some(name) = name.or(self.building_name.as_deref()) else {
            bail!("No building name: pass --building-name or set CONDO_BUILDING_NAME");
        };
        Ok(Building::new(id, name)?)
    }
}

/// `whatsapp_get_status` → `CONDO_WEBHOOK_WHATSAPP_GET_STATUS`
pub fn webhook_env_key(name: WebhookName) -> String {
    format!("CONDO_WEBHOOK_{}", name.as_str().to_ascii_uppercase())
}

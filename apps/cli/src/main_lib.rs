use std::sync::Arc;

use condo_core::{secrets::SecretStore, Building};
use condo_whatsapp::{
    ChainedWebhookDirectory, HttpWorkflowTransport, LifecycleController, Notifier,
    StaticWebhookDirectory, WebhookDirectory, WhatsAppApiClient,
};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;
use crate::secrets::FileSecretStore;

pub fn init_tracing() {
    let log_format = std::env::var("CONDO_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_line_number(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

pub fn build_secret_store(config: &Config) -> Arc<dyn SecretStore> {
    tracing::debug!("Secret file in use: {}", config.secret_file.display());
    Arc::new(FileSecretStore::new(config.secret_file.clone()))
}

/// Wires the API client, webhook directory and transport into a controller
/// for `building`.
pub fn build_controller(
    config: &Config,
    secret_store: Arc<dyn SecretStore>,
    building: Building,
    notifier: Arc<dyn Notifier>,
) -> anyhow::Result<Arc<LifecycleController>> {
    let api = Arc::new(WhatsAppApiClient::new(
        &config.api_url,
        secret_store,
        config.request_timeout,
    )?);
    tracing::info!("Building API in use: {}", api.base_url());

    let static_hooks: StaticWebhookDirectory = config.webhooks.iter().cloned().collect();
    let directory: Arc<dyn WebhookDirectory> = if static_hooks.is_empty() {
        api.clone()
    } else {
        Arc::new(ChainedWebhookDirectory::new(vec![
            Arc::new(static_hooks) as Arc<dyn WebhookDirectory>,
            api.clone() as Arc<dyn WebhookDirectory>,
        ]))
    };
    let transport = Arc::new(HttpWorkflowTransport::new(config.request_timeout)?);

    Ok(Arc::new(LifecycleController::new(
        building,
        api,
        directory,
        transport,
        notifier,
        config.lifecycle,
    )))
}

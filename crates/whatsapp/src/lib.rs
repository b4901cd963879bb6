//! Condo WhatsApp - lifecycle of a building's WhatsApp connection instance.
//!
//! This crate provides the building API client, the workflow webhook
//! transport, and the pieces that drive an instance from creation to deletion:
//! the instance resolver, the adaptive status poller, the 40-second QR
//! countdown and the lifecycle controller that reconciles them.
//!
//! # Usage
//!
//! ```rust,ignore
//! use condo_whatsapp::{LifecycleController, LifecycleConfig, LifecycleRunner, LogNotifier};
//!
//! let controller = Arc::new(LifecycleController::new(
//!     building,
//!     api.clone(),
//!     api.clone(),
//!     Arc::new(HttpWorkflowTransport::new(timeout)?),
//!     Arc::new(LogNotifier),
//!     LifecycleConfig::default(),
//! ));
//! let runner = LifecycleRunner::spawn(controller.clone());
//! controller.request_qr().await?;
//! ```

mod cache;
mod client;
mod controller;
mod countdown;
mod error;
mod notify;
mod poller;
mod resolver;
mod runner;
mod schedule;
mod status;
mod traits;
mod types;
mod workflow;

#[cfg(test)]
mod testing;

mod controller_tests;

pub use cache::QueryCache;
pub use client::{WhatsAppApiClient, DEFAULT_TIMEOUT_SECS};
pub use controller::{
    Affordances, LifecycleConfig, LifecycleController, LifecyclePhase, LifecycleSnapshot,
};
pub use countdown::{QrCountdown, QrSession};
pub use error::{Result, WhatsAppError};
pub use notify::{LogNotifier, NoOpNotifier, Notice, NoticeLevel, Notifier};
pub use poller::{CheckOutcome, StatusCheck, StatusPoller};
pub use resolver::InstanceResolver;
pub use runner::{LifecycleRunner, RunnerHandle};
pub use schedule::*;
pub use status::{extract_provider_state, status_from_provider, status_from_raw};
pub use traits::{InstanceBackend, WebhookDirectory, WorkflowTransport};
pub use types::*;
pub use workflow::{ChainedWebhookDirectory, HttpWorkflowTransport, StaticWebhookDirectory};

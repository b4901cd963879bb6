//! Error types for the WhatsApp lifecycle crate.

use thiserror::Error;

use crate::types::LifecycleAction;

/// Result type alias for WhatsApp lifecycle operations.
pub type Result<T> = std::result::Result<T, WhatsAppError>;

/// Errors that can occur while managing a building's WhatsApp instance.
#[derive(Debug, Error)]
pub enum WhatsAppError {
    /// HTTP client error (connection refused, timeout, TLS...)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error response from the building API
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The workflow webhook answered with a failure
    #[error("Workflow rejected the request: {}", message.as_deref().unwrap_or("no message"))]
    Remote { message: Option<String> },

    /// The workflow webhook answered success but the payload is unusable
    #[error("Malformed workflow reply: {0}")]
    MalformedReply(String),

    /// No URL could be resolved for a logical webhook name
    #[error("Webhook '{0}' is not configured")]
    MissingWebhook(String),

    /// The action needs an existing instance (and its name)
    #[error("No WhatsApp instance exists for building {0}")]
    MissingInstance(String),

    /// Create was called while an instance already exists
    #[error("Building {0} already has a WhatsApp instance")]
    AlreadyExists(String),

    /// The same action is still running
    #[error("{0} is already in progress")]
    InFlight(LifecycleAction),

    /// Invalid request (missing required data, etc.)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication error (missing or invalid token)
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Error bubbled up from the core crate (secret store...)
    #[error(transparent)]
    Core(#[from] condo_core::Error),
}

impl WhatsAppError {
    /// Create an API error from status and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a workflow rejection, keeping the provider message if any
    pub fn remote(message: Option<String>) -> Self {
        Self::Remote {
            message: message.filter(|m| !m.trim().is_empty()),
        }
    }

    /// Create an invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create an auth error
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// Message shown to the user for a failed `action`.
    ///
    /// Configuration problems get a specific message, remote rejections keep
    /// the provider/API text verbatim, everything else falls back to the
    /// action's generic message.
    pub fn user_message(&self, action: LifecycleAction) -> String {
        match self {
            Self::MissingWebhook(name) => {
                format!("The '{}' webhook URL is not configured", name)
            }
            Self::MissingInstance(_) => "No WhatsApp instance exists for this building".to_string(),
            Self::AlreadyExists(_) => "This building already has a WhatsApp instance".to_string(),
            Self::InFlight(action) => format!("{} is already in progress", action),
            Self::Remote {
                message: Some(message),
            } => message.clone(),
            Self::Api { message, .. } if !message.trim().is_empty() => message.clone(),
            Self::Auth(_) => "Your session has expired. Please sign in again.".to_string(),
            _ => action.failure_message().to_string(),
        }
    }
}

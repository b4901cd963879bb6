//! User-facing notifications.
//!
//! The controller reports every outcome a user should see through a
//! [`Notifier`]; hosts decide how to present it (toast, terminal line, SSE).

use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::types::LifecycleAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Success,
    Error,
}

/// One transient message for the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub level: NoticeLevel,
    pub action: LifecycleAction,
    pub message: String,
}

impl Notice {
    pub fn success(action: LifecycleAction, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            action,
            message: message.into(),
        }
    }

    pub fn error(action: LifecycleAction, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            action,
            message: message.into(),
        }
    }
}

/// Sink for user-facing notices.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// A no-op notifier for contexts where nobody is watching.
#[derive(Debug, Clone, Default)]
pub struct NoOpNotifier;

impl Notifier for NoOpNotifier {
    fn notify(&self, _notice: Notice) {
        // No-op
    }
}

/// Writes notices to the log.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Error => error!("[{}] {}", notice.action, notice.message),
            NoticeLevel::Success => info!("[{}] {}", notice.action, notice.message),
        }
    }
}

//! Adaptive polling cadence.
//!
//! Two named intervals per polled resource, `fast` while the connection is not
//! settled and `normal` once it is CONNECTED (or when there is nothing to
//! watch). The choice is re-evaluated after every poll result.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fast status-poll interval while a connection attempt is in progress.
pub const STATUS_POLL_FAST_SECS: u64 = 10;
/// Status-poll interval once connected.
pub const STATUS_POLL_NORMAL_SECS: u64 = 30;
/// Instance refetch interval while a connection attempt is in progress.
pub const INSTANCE_POLL_FAST_SECS: u64 = 10;
/// Instance refetch interval once connected.
pub const INSTANCE_POLL_NORMAL_SECS: u64 = 60;
/// Instance refetch interval while the building has no instance.
pub const INSTANCE_POLL_IDLE_SECS: u64 = 30;
/// Validity window of a QR code.
pub const QR_TTL_SECS: u32 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollingMode {
    Fast,
    Normal,
}

impl PollingMode {
    /// The single predicate that selects the cadence.
    pub fn for_connected(is_connected: bool) -> Self {
        if is_connected {
            Self::Normal
        } else {
            Self::Fast
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollIntervals {
    pub fast: Duration,
    pub normal: Duration,
}

impl PollIntervals {
    pub fn new(fast: Duration, normal: Duration) -> Self {
        Self { fast, normal }
    }

    /// Defaults for the live status webhook.
    pub fn status_defaults() -> Self {
        Self::new(
            Duration::from_secs(STATUS_POLL_FAST_SECS),
            Duration::from_secs(STATUS_POLL_NORMAL_SECS),
        )
    }

    /// Defaults for the persisted instance record.
    pub fn instance_defaults() -> Self {
        Self::new(
            Duration::from_secs(INSTANCE_POLL_FAST_SECS),
            Duration::from_secs(INSTANCE_POLL_NORMAL_SECS),
        )
    }

    pub fn for_mode(&self, mode: PollingMode) -> Duration {
        match mode {
            PollingMode::Fast => self.fast,
            PollingMode::Normal => self.normal,
        }
    }
}

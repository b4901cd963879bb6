//! Instance Resolver
//!
//! Fetches the persisted WhatsApp instance of a building from the building API
//! and keeps the query cache in step with what it read.

use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::QueryCache;
use crate::error::Result;
use crate::schedule::{PollIntervals, PollingMode, INSTANCE_POLL_IDLE_SECS};
use crate::traits::InstanceBackend;
use crate::types::WhatsAppInstance;

pub struct InstanceResolver {
    backend: Arc<dyn InstanceBackend>,
    cache: Arc<QueryCache>,
    intervals: PollIntervals,
    idle_interval: Duration,
}

impl InstanceResolver {
    pub fn new(
        backend: Arc<dyn InstanceBackend>,
        cache: Arc<QueryCache>,
        intervals: PollIntervals,
    ) -> Self {
        Self {
            backend,
            cache,
            intervals,
            idle_interval: Duration::from_secs(INSTANCE_POLL_IDLE_SECS),
        }
    }

    /// Refetch interval used while the building has no instance.
    pub fn with_idle_interval(mut self, idle_interval: Duration) -> Self {
        self.idle_interval = idle_interval;
        self
    }

    /// Fetch from the server, bypassing the cache.
    ///
    /// A blank building id is the disabled state: it answers "no instance"
    /// without touching the network. Transport and API errors are returned
    /// as-is; the periodic refetch is the retry.
    pub async fn fetch(&self, building_id: &str) -> Result<Option<WhatsAppInstance>> {
        let building_id = building_id.trim();
        if building_id.is_empty() {
            debug!("[InstanceResolver] No building selected, skipping fetch");
            return Ok(None);
        }

        let instance = self.backend.get_instance(building_id).await.map_err(|e| {
            warn!("[InstanceResolver] Fetch for building {} failed: {}", building_id, e);
            e
        })?;

        if let Some(found) = &instance {
            if found.building_id != building_id && !found.building_id.is_empty() {
                warn!(
                    "[InstanceResolver] Record for building {} claims building {}",
                    building_id, found.building_id
                );
            }
        }

        debug!(
            "[InstanceResolver] Building {}: {}",
            building_id,
            instance
                .as_ref()
                .map(|i| i.status.as_str())
                .unwrap_or("no instance")
        );
        self.cache.put_instance(building_id, instance.clone());
        Ok(instance)
    }

    /// Serve from the cache when the entry is younger than `max_age`,
    /// otherwise fetch.
    pub async fn resolve(
        &self,
        building_id: &str,
        max_age: Duration,
    ) -> Result<Option<WhatsAppInstance>> {
        if let Some(cached) = self.cache.instance(building_id.trim(), max_age) {
            return Ok(cached);
        }
        self.fetch(building_id).await
    }

    /// Refetch cadence: fast while a connection attempt is active, normal once
    /// connected or idle.
    pub fn refresh_interval(&self, connection_active: bool) -> Duration {
        self.intervals
            .for_mode(PollingMode::for_connected(!connection_active))
    }

    /// Refetch cadence for the current record: idle without an instance,
    /// otherwise [`refresh_interval`](Self::refresh_interval).
    pub fn refresh_interval_for(
        &self,
        instance: Option<&WhatsAppInstance>,
        connection_active: bool,
    ) -> Duration {
        match instance {
            None => self.idle_interval,
            Some(_) => self.refresh_interval(connection_active),
        }
    }
}

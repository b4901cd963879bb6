//! Per-building query cache for instance records and live status reads.
//!
//! The cache is advisory: reads honour a max age, and every mutating action
//! invalidates the whole building so the next read goes back to the server.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tokio::time::Instant;

use crate::types::{LiveStatus, WhatsAppInstance};

#[derive(Debug, Clone)]
struct Cached<T> {
    value: T,
    stored_at: Instant,
}

impl<T: Clone> Cached<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            stored_at: Instant::now(),
        }
    }

    fn fresh(&self, max_age: Duration) -> Option<T> {
        (self.stored_at.elapsed() <= max_age).then(|| self.value.clone())
    }
}

#[derive(Debug, Default)]
struct Entries {
    instances: HashMap<String, Cached<Option<WhatsAppInstance>>>,
    statuses: HashMap<String, Cached<LiveStatus>>,
}

/// Cache shared by the resolver, the poller and the controller.
#[derive(Debug, Default)]
pub struct QueryCache {
    entries: RwLock<Entries>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached instance lookup. The outer `Option` is the cache hit, the inner
    /// one is the server's answer ("no instance" is a valid cached answer).
    pub fn instance(&self, building_id: &str, max_age: Duration) -> Option<Option<WhatsAppInstance>> {
        let entries = self.entries.read().ok()?;
        entries.instances.get(building_id)?.fresh(max_age)
    }

    pub fn put_instance(&self, building_id: &str, instance: Option<WhatsAppInstance>) {
        if let Ok(mut entries) = self.entries.write() {
            entries
                .instances
                .insert(building_id.to_string(), Cached::new(instance));
        }
    }

    /// Cached live status together with the moment it was stored.
    pub fn status(&self, building_id: &str, max_age: Duration) -> Option<(LiveStatus, Instant)> {
        let entries = self.entries.read().ok()?;
        let cached = entries.statuses.get(building_id)?;
        cached
            .fresh(max_age)
            .map(|status| (status, cached.stored_at))
    }

    pub fn put_status(&self, building_id: &str, status: LiveStatus) {
        if let Ok(mut entries) = self.entries.write() {
            entries
                .statuses
                .insert(building_id.to_string(), Cached::new(status));
        }
    }

    /// Drop everything cached for a building.
    pub fn invalidate_building(&self, building_id: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.instances.remove(building_id);
            entries.statuses.remove(building_id);
        }
    }
}

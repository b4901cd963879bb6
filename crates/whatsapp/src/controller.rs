//! Lifecycle Controller
//!
//! Orchestrates a building's WhatsApp instance through
//! `NONE → CREATING → DISCONNECTED → CONNECTING → CONNECTED → DISCONNECTING →
//! DISCONNECTED → DELETING → NONE`.
//!
//! The controller owns the reconciled local view (persisted record, latest
//! live status, QR session, in-flight flags). User actions report exactly one
//! [`Notice`] each. Poll and refetch results are fenced by a generation counter
//! that every create, disconnect, delete or external replacement bumps, so a
//! result issued before such a change is dropped on arrival.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use condo_core::Building;

use crate::cache::QueryCache;
use crate::countdown::{QrCountdown, QrSession};
use crate::error::{Result, WhatsAppError};
use crate::notify::{Notice, Notifier};
use crate::poller::{CheckOutcome, StatusCheck, StatusPoller};
use crate::resolver::InstanceResolver;
use crate::schedule::{PollIntervals, PollingMode, INSTANCE_POLL_IDLE_SECS, QR_TTL_SECS};
use crate::traits::{InstanceBackend, WebhookDirectory, WorkflowTransport};
use crate::types::{
    ConnectPayload, CreateInstanceRequest, InstancePayload, LifecycleAction, LiveStatus,
    ProviderState, WebhookName, WhatsAppInstance, WhatsappStatus, WorkflowReply,
};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Cadence of the status webhook.
    pub status_intervals: PollIntervals,
    /// Cadence of the persisted record refetch.
    pub instance_intervals: PollIntervals,
    /// Refetch cadence while the building has no instance.
    pub instance_idle_interval: Duration,
    /// Validity window of an issued QR code, in seconds.
    pub qr_ttl_secs: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            status_intervals: PollIntervals::status_defaults(),
            instance_intervals: PollIntervals::instance_defaults(),
            instance_idle_interval: Duration::from_secs(INSTANCE_POLL_IDLE_SECS),
            qr_ttl_secs: QR_TTL_SECS,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Derived View
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecyclePhase {
    None,
    Creating,
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Deleting,
}

/// Which controls a host should enable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Affordances {
    pub can_create: bool,
    pub can_link_device: bool,
    pub can_disconnect: bool,
    pub can_delete: bool,
}

/// Point-in-time copy of the controller state, ready to render.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleSnapshot {
    pub building_id: String,
    pub instance: Option<WhatsAppInstance>,
    /// Effective status: a fresh live read, else the persisted one.
    pub status: Option<WhatsappStatus>,
    pub provider_state: Option<ProviderState>,
    pub phase: LifecyclePhase,
    pub affordances: Affordances,
    pub qr_code: Option<String>,
    pub time_left: Option<u32>,
    pub is_active_polling: bool,
    pub is_new_instance: bool,
    pub in_flight: Vec<LifecycleAction>,
    pub last_error: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct LifecycleState {
    instance: Option<WhatsAppInstance>,
    loaded: bool,
    live: Option<LiveStatus>,
    live_observed_at: Option<Instant>,
    qr: QrSession,
    is_active_polling: bool,
    is_new_instance: bool,
    in_flight: HashSet<LifecycleAction>,
    last_error: Option<String>,
    generation: u64,
}

impl LifecycleState {
    fn fresh_live(&self, max_age: Duration) -> Option<&LiveStatus> {
        let observed_at = self.live_observed_at?;
        if observed_at.elapsed() > max_age {
            return None;
        }
        self.live.as_ref()
    }

    fn effective_status(&self, max_age: Duration) -> Option<WhatsappStatus> {
        let instance = self.instance.as_ref()?;
        Some(
            self.fresh_live(max_age)
                .map(|live| live.status)
                .unwrap_or(instance.status),
        )
    }

    fn is_busy(&self, action: LifecycleAction) -> bool {
        self.in_flight.contains(&action)
    }

    fn phase(&self, max_age: Duration) -> LifecyclePhase {
        if self.is_busy(LifecycleAction::Delete) {
            return LifecyclePhase::Deleting;
        }
        if self.is_busy(LifecycleAction::Disconnect) {
            return LifecyclePhase::Disconnecting;
        }
        if self.is_busy(LifecycleAction::Create) {
            return LifecyclePhase::Creating;
        }
        match self.effective_status(max_age) {
            None => LifecyclePhase::None,
            Some(WhatsappStatus::Connected) => LifecyclePhase::Connected,
            Some(WhatsappStatus::Pending | WhatsappStatus::Connecting) => {
                LifecyclePhase::Connecting
            }
            Some(_) if self.qr.is_active() || self.is_busy(LifecycleAction::RequestQr) => {
                LifecyclePhase::Connecting
            }
            Some(_) => LifecyclePhase::Disconnected,
        }
    }

    fn affordances(&self, max_age: Duration) -> Affordances {
        let status = self.effective_status(max_age);
        let deleting = self.is_busy(LifecycleAction::Delete);
        let has_name = self
            .instance
            .as_ref()
            .and_then(WhatsAppInstance::provider_name)
            .is_some();

        Affordances {
            can_create: self.instance.is_none() && !self.is_busy(LifecycleAction::Create),
            can_link_device: has_name
                && !deleting
                && !self.is_busy(LifecycleAction::RequestQr)
                && status != Some(WhatsappStatus::Connected),
            can_disconnect: has_name
                && !deleting
                && !self.is_busy(LifecycleAction::Disconnect)
                && status == Some(WhatsappStatus::Connected),
            can_delete: self.instance.is_some() && !deleting,
        }
    }

    /// Connected: stop fast polling and drop the QR. Returns whether a
    /// countdown may need cancelling.
    fn settle_connected(&mut self) -> bool {
        self.is_active_polling = false;
        self.is_new_instance = false;
        let had_qr = self.qr.is_active();
        self.qr.clear();
        had_qr
    }

    /// The instance the local view refers to is gone or replaced.
    fn forget_instance_session(&mut self) {
        self.generation += 1;
        self.live = None;
        self.live_observed_at = None;
        self.qr.clear();
        self.is_active_polling = false;
        self.is_new_instance = false;
    }
}

/// Marks one action as running; cleared on drop whatever the outcome.
struct InFlightGuard<'a> {
    state: &'a Mutex<LifecycleState>,
    action: LifecycleAction,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(state: &'a Mutex<LifecycleState>, action: LifecycleAction) -> Option<Self> {
        let mut locked = state.lock().unwrap_or_else(PoisonError::into_inner);
        if !locked.in_flight.insert(action) {
            return None;
        }
        Some(Self { state, action })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut locked = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        locked.in_flight.remove(&self.action);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Controller
// ─────────────────────────────────────────────────────────────────────────────

pub struct LifecycleController {
    building: Building,
    backend: Arc<dyn InstanceBackend>,
    directory: Arc<dyn WebhookDirectory>,
    transport: Arc<dyn WorkflowTransport>,
    notifier: Arc<dyn Notifier>,
    resolver: InstanceResolver,
    poller: StatusPoller,
    cache: Arc<QueryCache>,
    countdown: QrCountdown,
    config: LifecycleConfig,
    state: Arc<Mutex<LifecycleState>>,
}

impl LifecycleController {
    pub fn new(
        building: Building,
        backend: Arc<dyn InstanceBackend>,
        directory: Arc<dyn WebhookDirectory>,
        transport: Arc<dyn WorkflowTransport>,
        notifier: Arc<dyn Notifier>,
        config: LifecycleConfig,
    ) -> Self {
        let cache = Arc::new(QueryCache::new());
        let resolver = InstanceResolver::new(
            Arc::clone(&backend),
            Arc::clone(&cache),
            config.instance_intervals,
        )
        .with_idle_interval(config.instance_idle_interval);
        let poller = StatusPoller::new(Arc::clone(&directory), Arc::clone(&transport));

        Self {
            building,
            backend,
            directory,
            transport,
            notifier,
            resolver,
            poller,
            cache,
            countdown: QrCountdown::new(),
            config,
            state: Arc::new(Mutex::new(LifecycleState::default())),
        }
    }

    pub fn building(&self) -> &Building {
        &self.building
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    /// Share a query cache with other controllers of the same building so the
    /// first load can be served without a round trip.
    pub fn with_cache(mut self, cache: Arc<QueryCache>) -> Self {
        self.resolver = InstanceResolver::new(
            Arc::clone(&self.backend),
            Arc::clone(&cache),
            self.config.instance_intervals,
        )
        .with_idle_interval(self.config.instance_idle_interval);
        self.cache = cache;
        self
    }

    fn lock(&self) -> MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn freshness(&self) -> Duration {
        self.config.status_intervals.normal
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Read side
    // ─────────────────────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> LifecycleSnapshot {
        let max_age = self.freshness();
        let state = self.lock();
        let mut in_flight: Vec<LifecycleAction> = state.in_flight.iter().copied().collect();
        in_flight.sort_by_key(|action| action.to_string());

        LifecycleSnapshot {
            building_id: self.building.id.clone(),
            instance: state.instance.clone(),
            status: state.effective_status(max_age),
            provider_state: state.fresh_live(max_age).map(|l| l.provider_state.clone()),
            phase: state.phase(max_age),
            affordances: state.affordances(max_age),
            qr_code: state.qr.qr_code().map(str::to_string),
            time_left: state.qr.time_left(),
            is_active_polling: state.is_active_polling,
            is_new_instance: state.is_new_instance,
            in_flight,
            last_error: state.last_error.clone(),
        }
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.lock().phase(self.freshness())
    }

    pub fn affordances(&self) -> Affordances {
        self.lock().affordances(self.freshness())
    }

    /// Live status while fresh, else the persisted one. `None` without an
    /// instance.
    pub fn effective_status(&self) -> Option<WhatsappStatus> {
        self.lock().effective_status(self.freshness())
    }

    pub fn has_instance(&self) -> bool {
        self.lock().instance.is_some()
    }

    /// Status webhook cadence: fast unless the effective status is CONNECTED.
    pub fn status_poll_interval(&self) -> Duration {
        let connected = self
            .effective_status()
            .is_some_and(WhatsappStatus::is_connected);
        self.config
            .status_intervals
            .for_mode(PollingMode::for_connected(connected))
    }

    /// Record refetch cadence: idle without an instance, fast while a
    /// connection attempt is active, normal otherwise.
    pub fn instance_refresh_interval(&self) -> Duration {
        let state = self.lock();
        let active = state.is_active_polling || state.is_new_instance;
        self.resolver
            .refresh_interval_for(state.instance.as_ref(), active)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // User actions
    // ─────────────────────────────────────────────────────────────────────────

    /// Persist a new instance for the building.
    pub async fn create(&self) -> Result<()> {
        self.run(LifecycleAction::Create, self.create_inner()).await
    }

    /// Ask the provider for a QR code and start its countdown.
    pub async fn request_qr(&self) -> Result<()> {
        self.run(LifecycleAction::RequestQr, self.request_qr_inner())
            .await
    }

    /// Log the linked device out at the provider.
    pub async fn disconnect(&self) -> Result<()> {
        self.run(LifecycleAction::Disconnect, self.disconnect_inner())
            .await
    }

    /// Tear the instance down at the provider, then delete the record.
    pub async fn delete(&self) -> Result<()> {
        self.run(LifecycleAction::Delete, self.delete_inner()).await
    }

    /// User-triggered refetch of the persisted record.
    pub async fn refresh(&self) -> Result<()> {
        self.run(LifecycleAction::Refresh, async {
            self.reconcile().await.map(|_| ())
        })
        .await
    }

    async fn run<F>(&self, action: LifecycleAction, task: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        let outcome = match InFlightGuard::acquire(&self.state, action) {
            Some(guard) => {
                let result = task.await;
                drop(guard);
                result
            }
            None => Err(WhatsAppError::InFlight(action)),
        };

        match &outcome {
            Ok(()) => {
                info!(
                    "[LifecycleController] {} succeeded for building {}",
                    action, self.building.id
                );
                self.lock().last_error = None;
                self.notifier
                    .notify(Notice::success(action, action.success_message()));
            }
            Err(e) => {
                warn!(
                    "[LifecycleController] {} failed for building {}: {}",
                    action, self.building.id, e
                );
                let message = e.user_message(action);
                if !matches!(e, WhatsAppError::InFlight(_)) {
                    self.lock().last_error = Some(message.clone());
                }
                self.notifier.notify(Notice::error(action, message));
            }
        }
        outcome
    }

    async fn create_inner(&self) -> Result<()> {
        self.ensure_loaded().await?;
        let exists = self.lock().instance.is_some();
        if exists {
            return Err(WhatsAppError::AlreadyExists(self.building.id.clone()));
        }

        let request = CreateInstanceRequest {
            instance_name: self.building.instance_name(),
        };
        let created = self
            .backend
            .create_instance(&self.building.id, request)
            .await?;

        self.cache.invalidate_building(&self.building.id);
        {
            let mut state = self.lock();
            state.forget_instance_session();
            state.is_new_instance = true;
            state.is_active_polling = true;
            if created.is_some() {
                state.instance = created;
            }
        }

        self.refetch_after(LifecycleAction::Create).await;
        Ok(())
    }

    async fn request_qr_inner(&self) -> Result<()> {
        self.ensure_loaded().await?;
        let instance_name = self.instance_name()?;
        let url = self.webhook_url(WebhookName::Connect).await?;

        let payload = serde_json::to_value(ConnectPayload {
            building_id: &self.building.id,
            instance_name: &instance_name,
        })?;
        let response = self.transport.post(&url, payload).await?;
        let reply = WorkflowReply::from_value(&response.body);
        if !response.is_http_success() || !reply.is_success() {
            return Err(WhatsAppError::remote(reply.message));
        }
        let qr_code = reply
            .qr_base64
            .ok_or_else(|| WhatsAppError::MalformedReply("reply carries no qr_base64".into()))?;

        if !self.has_instance() {
            return Err(WhatsAppError::MissingInstance(self.building.id.clone()));
        }
        self.show_qr(qr_code);

        self.refetch_after(LifecycleAction::RequestQr).await;
        Ok(())
    }

    async fn disconnect_inner(&self) -> Result<()> {
        self.ensure_loaded().await?;
        let instance_name = self.instance_name()?;
        let url = self.webhook_url(WebhookName::Disconnect).await?;

        self.post_teardown(&url, &instance_name).await?;

        self.cache.invalidate_building(&self.building.id);
        {
            let mut state = self.lock();
            state.forget_instance_session();
            state.last_error = None;
        }
        self.countdown.cancel();

        self.refetch_after(LifecycleAction::Disconnect).await;
        Ok(())
    }

    async fn delete_inner(&self) -> Result<()> {
        self.ensure_loaded().await?;
        let instance_name = self.instance_name()?;
        let url = self.webhook_url(WebhookName::DeleteInstance).await?;

        // Provider first; the record only goes once the provider side is gone.
        self.post_teardown(&url, &instance_name).await?;
        self.backend.delete_instance(&self.building.id).await?;

        {
            let mut state = self.lock();
            state.forget_instance_session();
            state.instance = None;
        }
        self.countdown.cancel();
        self.cache.invalidate_building(&self.building.id);
        Ok(())
    }

    /// Post `{ instanceName }` to a teardown webhook. A non-2xx answer or an
    /// explicit `success: false` is a rejection.
    async fn post_teardown(&self, url: &str, instance_name: &str) -> Result<()> {
        let payload = serde_json::to_value(InstancePayload { instance_name })?;
        let response = self.transport.post(url, payload).await?;
        let reply = WorkflowReply::from_value(&response.body);
        if !response.is_http_success() || reply.success == Some(false) {
            return Err(WhatsAppError::remote(reply.message));
        }
        Ok(())
    }

    fn show_qr(&self, qr_code: String) {
        let ttl = self.config.qr_ttl_secs;
        let session = {
            let mut state = self.lock();
            state.is_active_polling = true;
            state.qr.issue(qr_code, ttl)
        };

        let tick_state = Arc::clone(&self.state);
        let expire_state = Arc::clone(&self.state);
        self.countdown.start(
            ttl,
            move |left| {
                let mut state = tick_state.lock().unwrap_or_else(PoisonError::into_inner);
                state.qr.set_remaining(session, left);
            },
            move || {
                let mut state = expire_state.lock().unwrap_or_else(PoisonError::into_inner);
                if state.qr.expire(session) {
                    debug!("[LifecycleController] QR code expired");
                    state.is_active_polling = false;
                }
            },
        );
    }

    fn instance_name(&self) -> Result<String> {
        self.lock()
            .instance
            .as_ref()
            .and_then(WhatsAppInstance::provider_name)
            .map(str::to_string)
            .ok_or_else(|| WhatsAppError::MissingInstance(self.building.id.clone()))
    }

    async fn webhook_url(&self, name: WebhookName) -> Result<String> {
        self.directory
            .resolve(name)
            .await?
            .ok_or_else(|| WhatsAppError::MissingWebhook(name.as_str().to_string()))
    }

    async fn ensure_loaded(&self) -> Result<()> {
        let loaded = self.lock().loaded;
        if !loaded {
            self.load().await?;
        }
        Ok(())
    }

    async fn refetch_after(&self, action: LifecycleAction) {
        if let Err(e) = self.reconcile().await {
            warn!(
                "[LifecycleController] Refetch after {} failed: {}",
                action, e
            );
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Scheduled work
    // ─────────────────────────────────────────────────────────────────────────

    /// Refetch the persisted record and fold it into the local view.
    ///
    /// Errors are returned without notifying; the next scheduled refetch is
    /// the retry.
    pub async fn reconcile(&self) -> Result<Option<WhatsAppInstance>> {
        let generation = self.lock().generation;
        let fetched = self.resolver.fetch(&self.building.id).await?;
        Ok(self.fold_fetched(generation, fetched, None))
    }

    /// First read of the local view. Served from the query cache while its
    /// entries are fresh: the record for one fast refetch interval, the live
    /// status for the freshness window.
    pub async fn load(&self) -> Result<Option<WhatsAppInstance>> {
        let generation = self.lock().generation;
        let fetched = self
            .resolver
            .resolve(&self.building.id, self.config.instance_intervals.fast)
            .await?;
        let cached_live = self.cache.status(&self.building.id, self.freshness());
        Ok(self.fold_fetched(generation, fetched, cached_live))
    }

    fn fold_fetched(
        &self,
        generation: u64,
        fetched: Option<WhatsAppInstance>,
        cached_live: Option<(LiveStatus, Instant)>,
    ) -> Option<WhatsAppInstance> {
        let (current, cancel_countdown) = {
            let mut state = self.lock();
            if state.generation != generation {
                debug!(
                    "[LifecycleController] Dropping refetch for building {} issued before a lifecycle change",
                    self.building.id
                );
                self.cache.invalidate_building(&self.building.id);
                return state.instance.clone();
            }
            if let Some((live, stored_at)) = cached_live {
                if state.live.is_none() && fetched.is_some() {
                    state.live = Some(live);
                    state.live_observed_at = Some(stored_at);
                }
            }
            let cancel = self.apply_instance(&mut state, fetched);
            (state.instance.clone(), cancel)
        };

        if cancel_countdown {
            self.countdown.cancel();
        }
        current
    }

    /// Returns whether the QR countdown should be cancelled.
    fn apply_instance(&self, state: &mut LifecycleState, fetched: Option<WhatsAppInstance>) -> bool {
        let replaced = match (&state.instance, &fetched) {
            (Some(old), Some(new)) => old.id.is_some() && new.id.is_some() && old.id != new.id,
            (Some(_), None) => true,
            _ => false,
        };

        let mut cancel = false;
        if replaced {
            info!(
                "[LifecycleController] Instance of building {} changed on the server",
                self.building.id
            );
            cancel = state.qr.is_active();
            state.forget_instance_session();
        }

        state.instance = fetched;
        state.loaded = true;

        if state
            .effective_status(self.freshness())
            .is_some_and(WhatsappStatus::is_connected)
        {
            cancel |= state.settle_connected();
        }
        cancel
    }

    /// One status-poll cycle: ask the provider, apply the answer unless it
    /// was overtaken by a lifecycle change, then refetch the record.
    pub async fn poll_status(&self) -> StatusCheck {
        let (generation, instance_name) = {
            let state = self.lock();
            (
                state.generation,
                state
                    .instance
                    .as_ref()
                    .and_then(WhatsAppInstance::provider_name)
                    .map(str::to_string),
            )
        };

        let check = self.poller.check(instance_name.as_deref()).await;

        let cancel_countdown = {
            let mut state = self.lock();
            if state.instance.is_none() {
                return check;
            }
            if state.generation != generation {
                debug!(
                    "[LifecycleController] Dropping status read for building {} issued before a lifecycle change",
                    self.building.id
                );
                false
            } else {
                if check.outcome != CheckOutcome::Skipped {
                    state.live = Some(check.live.clone());
                    state.live_observed_at = Some(Instant::now());
                    self.cache.put_status(&self.building.id, check.live.clone());
                }

                if state
                    .effective_status(self.freshness())
                    .is_some_and(WhatsappStatus::is_connected)
                {
                    state.settle_connected()
                } else {
                    state.is_active_polling = true;
                    false
                }
            }
        };

        if cancel_countdown {
            self.countdown.cancel();
        }
        if let Err(e) = self.reconcile().await {
            warn!(
                "[LifecycleController] Refetch after status check failed: {}",
                e
            );
        }
        check
    }

    /// Stop the countdown and hide the QR. Safe to call more than once.
    pub fn shutdown(&self) {
        self.countdown.cancel();
        self.lock().qr.clear();
    }
}

//! In-memory doubles for the network seams, shared by the unit tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use crate::error::{Result, WhatsAppError};
use crate::notify::{Notice, NoticeLevel, Notifier};
use crate::traits::{InstanceBackend, WorkflowTransport};
use crate::types::{CreateInstanceRequest, WebhookResponse, WhatsAppInstance, WhatsappStatus};

pub const STATUS_URL: &str = "https://hooks.example.com/status";
pub const CONNECT_URL: &str = "https://hooks.example.com/connect";
pub const DISCONNECT_URL: &str = "https://hooks.example.com/disconnect";
pub const DELETE_URL: &str = "https://hooks.example.com/delete";

pub fn sample_instance(building_id: &str, status: WhatsappStatus) -> WhatsAppInstance {
    WhatsAppInstance {
        id: Some(format!("wa-{}", building_id)),
        building_id: building_id.to_string(),
        instance_name: format!("Torre Norte - {}", building_id),
        status,
        connection_attempts: 0,
        last_error: None,
        last_connection_attempt: None,
    }
}

// =========================================================================
// Mock InstanceBackend
// =========================================================================

#[derive(Default)]
struct BackendState {
    instance: Option<WhatsAppInstance>,
    get_calls: usize,
    create_calls: usize,
    delete_calls: usize,
    fail_get: bool,
    fail_delete: bool,
}

#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<BackendState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instance(instance: WhatsAppInstance) -> Self {
        let backend = Self::new();
        backend.state.lock().unwrap().instance = Some(instance);
        backend
    }

    pub fn instance(&self) -> Option<WhatsAppInstance> {
        self.state.lock().unwrap().instance.clone()
    }

    pub fn set_status(&self, status: WhatsappStatus) {
        if let Some(instance) = self.state.lock().unwrap().instance.as_mut() {
            instance.status = status;
        }
    }

    /// Simulates a record created outside this controller.
    pub fn put_instance(&self, instance: WhatsAppInstance) {
        self.state.lock().unwrap().instance = Some(instance);
    }

    /// Simulates a delete that happened outside this controller.
    pub fn remove_instance(&self) {
        self.state.lock().unwrap().instance = None;
    }

    pub fn fail_get(&self, fail: bool) {
        self.state.lock().unwrap().fail_get = fail;
    }

    pub fn fail_delete(&self, fail: bool) {
        self.state.lock().unwrap().fail_delete = fail;
    }

    pub fn get_calls(&self) -> usize {
        self.state.lock().unwrap().get_calls
    }

    pub fn create_calls(&self) -> usize {
        self.state.lock().unwrap().create_calls
    }

    pub fn delete_calls(&self) -> usize {
        self.state.lock().unwrap().delete_calls
    }
}

#[async_trait]
impl InstanceBackend for MockBackend {
    async fn get_instance(&self, _building_id: &str) -> Result<Option<WhatsAppInstance>> {
        let mut state = self.state.lock().unwrap();
        state.get_calls += 1;
        if state.fail_get {
            return Err(WhatsAppError::api(500, "Intentional fetch failure"));
        }
        Ok(state.instance.clone())
    }

    async fn create_instance(
        &self,
        building_id: &str,
        request: CreateInstanceRequest,
    ) -> Result<Option<WhatsAppInstance>> {
        let mut state = self.state.lock().unwrap();
        state.create_calls += 1;
        if state.instance.is_some() {
            return Err(WhatsAppError::api(409, "Instance already exists"));
        }
        let mut instance = sample_instance(building_id, WhatsappStatus::Disconnected);
        instance.instance_name = request.instance_name;
        state.instance = Some(instance.clone());
        Ok(Some(instance))
    }

    async fn delete_instance(&self, _building_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.delete_calls += 1;
        if state.fail_delete {
            return Err(WhatsAppError::api(500, "Intentional delete failure"));
        }
        state.instance = None;
        Ok(())
    }
}

// =========================================================================
// Mock WorkflowTransport
// =========================================================================

#[derive(Clone)]
enum Reply {
    Http(u16, Value),
    TransportError,
}

#[derive(Clone, Default)]
pub struct MockTransport {
    replies: Arc<Mutex<HashMap<String, Reply>>>,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
    gates: Arc<Mutex<HashMap<String, Arc<Semaphore>>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&self, url: &str, status: u16, body: Value) {
        self.replies
            .lock()
            .unwrap()
            .insert(url.to_string(), Reply::Http(status, body));
    }

    pub fn fail(&self, url: &str) {
        self.replies
            .lock()
            .unwrap()
            .insert(url.to_string(), Reply::TransportError);
    }

    /// Holds every call to `url` until the returned semaphore gets a permit.
    pub fn gate(&self, url: &str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.gates
            .lock()
            .unwrap()
            .insert(url.to_string(), gate.clone());
        gate
    }

    pub fn calls_to(&self, url: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u == url)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

#[async_trait]
impl WorkflowTransport for MockTransport {
    async fn post(&self, url: &str, payload: Value) -> Result<WebhookResponse> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), payload));

        let gate = self.gates.lock().unwrap().get(url).cloned();
        if let Some(gate) = gate {
            let permit = gate.acquire().await.unwrap();
            permit.forget();
        }

        let reply = self.replies.lock().unwrap().get(url).cloned();
        match reply {
            Some(Reply::Http(status, body)) => Ok(WebhookResponse { status, body }),
            Some(Reply::TransportError) => {
                Err(WhatsAppError::invalid_request("connection refused"))
            }
            None => Ok(WebhookResponse {
                status: 404,
                body: Value::Null,
            }),
        }
    }
}

// =========================================================================
// Recording Notifier
// =========================================================================

#[derive(Clone, Default)]
pub struct RecordingNotifier {
    notices: Arc<Mutex<Vec<Notice>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<Notice> {
        self.all()
            .into_iter()
            .filter(|n| n.level == NoticeLevel::Error)
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}

//! Tests for LifecycleController flows and edge cases.
//!
//! # Critical Contract Points
//!
//! 1. Create: rejected when an instance exists, no backend call made
//! 2. QR: exactly one error notice per failed request, the flag is reset
//! 3. Countdown: a new QR restarts at the full TTL, expiry clears QR and timer together
//! 4. Polling: CONNECTED clears the QR and slows polling, anything else keeps it fast
//! 5. Delete: provider teardown first, backend delete only after it succeeded
//! 6. Fencing: a status read issued before a delete never resurrects the instance
//! 7. Shared cache: a second controller's first load is served from fresh entries

#[cfg(test)]
mod tests {
    use crate::cache::QueryCache;
    use crate::controller::{LifecycleConfig, LifecycleController, LifecyclePhase};
    use crate::error::WhatsAppError;
    use crate::notify::NoticeLevel;
    use crate::testing::{
        sample_instance, MockBackend, MockTransport, RecordingNotifier, CONNECT_URL, DELETE_URL,
        DISCONNECT_URL, STATUS_URL,
    };
    use crate::types::{LifecycleAction, WebhookName, WhatsappStatus};
    use crate::workflow::StaticWebhookDirectory;
    use condo_core::Building;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    // =========================================================================
    // Harness
    // =========================================================================

    struct Harness {
        controller: Arc<LifecycleController>,
        backend: MockBackend,
        transport: MockTransport,
        notifier: RecordingNotifier,
    }

    fn full_directory() -> StaticWebhookDirectory {
        StaticWebhookDirectory::new()
            .with(WebhookName::GetStatus, STATUS_URL)
            .with(WebhookName::Connect, CONNECT_URL)
            .with(WebhookName::Disconnect, DISCONNECT_URL)
            .with(WebhookName::DeleteInstance, DELETE_URL)
    }

    fn harness_with(backend: MockBackend, directory: StaticWebhookDirectory) -> Harness {
        let transport = MockTransport::new();
        let notifier = RecordingNotifier::new();
        let controller = LifecycleController::new(
            Building::new("42", "Torre Norte").unwrap(),
            Arc::new(backend.clone()),
            Arc::new(directory),
            Arc::new(transport.clone()),
            Arc::new(notifier.clone()),
            LifecycleConfig::default(),
        );
        Harness {
            controller: Arc::new(controller),
            backend,
            transport,
            notifier,
        }
    }

    /// A second view of the same building, reading through `cache`.
    fn sharing_controller(backend: &MockBackend, cache: Arc<QueryCache>) -> LifecycleController {
        LifecycleController::new(
            Building::new("42", "Torre Norte").unwrap(),
            Arc::new(backend.clone()),
            Arc::new(full_directory()),
            Arc::new(MockTransport::new()),
            Arc::new(RecordingNotifier::new()),
            LifecycleConfig::default(),
        )
        .with_cache(cache)
    }

    fn harness(backend: MockBackend) -> Harness {
        harness_with(backend, full_directory())
    }

    fn with_instance(status: WhatsappStatus) -> MockBackend {
        MockBackend::with_instance(sample_instance("42", status))
    }

    async fn wait_for_call(transport: &MockTransport, url: &str) {
        while transport.calls_to(url).is_empty() {
            tokio::task::yield_now().await;
        }
    }

    fn qr_reply() -> serde_json::Value {
        json!({ "success": true, "qr_base64": "iVBORw0KGgoAAAANSUhEUg" })
    }

    // =========================================================================
    // Scenarios
    // =========================================================================

    #[tokio::test]
    async fn no_instance_offers_create_only() {
        let h = harness(MockBackend::new());
        h.controller.refresh().await.unwrap();

        let snapshot = h.controller.snapshot();
        assert!(snapshot.instance.is_none());
        assert_eq!(snapshot.phase, LifecyclePhase::None);
        assert!(snapshot.affordances.can_create);
        assert!(!snapshot.affordances.can_link_device);
        assert!(!snapshot.affordances.can_disconnect);
        assert!(!snapshot.affordances.can_delete);
        assert_eq!(
            h.controller.instance_refresh_interval(),
            Duration::from_secs(30)
        );
    }

    #[tokio::test]
    async fn create_enables_link_device_and_fast_polling() {
        let h = harness(MockBackend::new());
        h.controller.create().await.unwrap();

        assert_eq!(h.backend.create_calls(), 1);
        assert_eq!(
            h.backend.instance().unwrap().instance_name,
            "Torre Norte - 42"
        );

        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.status, Some(WhatsappStatus::Disconnected));
        assert_eq!(snapshot.phase, LifecyclePhase::Disconnected);
        assert!(snapshot.is_new_instance);
        assert!(snapshot.affordances.can_link_device);
        assert!(!snapshot.affordances.can_create);
        assert_eq!(h.controller.status_poll_interval(), Duration::from_secs(10));
        assert_eq!(
            h.controller.instance_refresh_interval(),
            Duration::from_secs(10)
        );

        let notices = h.notifier.all();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn qr_request_starts_countdown() {
        let h = harness(with_instance(WhatsappStatus::Disconnected));
        h.transport.reply(CONNECT_URL, 200, qr_reply());

        h.controller.request_qr().await.unwrap();

        assert_eq!(
            h.transport.calls_to(CONNECT_URL),
            vec![json!({ "buildingId": "42", "instanceName": "Torre Norte - 42" })]
        );
        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.qr_code.as_deref(), Some("iVBORw0KGgoAAAANSUhEUg"));
        assert_eq!(snapshot.time_left, Some(40));
        assert_eq!(snapshot.phase, LifecyclePhase::Connecting);
        assert!(snapshot.is_active_polling);
        assert_eq!(h.controller.status_poll_interval(), Duration::from_secs(10));

        tokio::time::sleep(Duration::from_millis(5500)).await;
        assert_eq!(h.controller.snapshot().time_left, Some(35));

        tokio::time::sleep(Duration::from_secs(40)).await;
        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.qr_code, None);
        assert_eq!(snapshot.time_left, None);
    }

    #[tokio::test(start_paused = true)]
    async fn open_mid_countdown_clears_qr_and_slows_polling() {
        let h = harness(with_instance(WhatsappStatus::Pending));
        h.transport.reply(CONNECT_URL, 200, qr_reply());
        h.controller.request_qr().await.unwrap();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(h.controller.snapshot().time_left, Some(37));

        h.transport
            .reply(STATUS_URL, 200, json!({ "instance": { "state": "open" } }));
        let check = h.controller.poll_status().await;
        assert_eq!(check.live.status, WhatsappStatus::Connected);

        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.status, Some(WhatsappStatus::Connected));
        assert_eq!(snapshot.phase, LifecyclePhase::Connected);
        assert_eq!(snapshot.qr_code, None);
        assert_eq!(snapshot.time_left, None);
        assert!(!snapshot.is_active_polling);
        assert_eq!(h.controller.status_poll_interval(), Duration::from_secs(30));

        // The cancelled countdown must not bring the QR back.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.controller.snapshot().time_left, None);
    }

    #[tokio::test]
    async fn delete_connected_instance() {
        let h = harness(with_instance(WhatsappStatus::Connected));
        h.transport
            .reply(DELETE_URL, 200, json!({ "success": true }));
        h.controller.refresh().await.unwrap();
        assert!(h
            .controller
            .cache()
            .instance("42", Duration::from_secs(60))
            .is_some());

        h.controller.delete().await.unwrap();

        assert_eq!(
            h.transport.calls_to(DELETE_URL),
            vec![json!({ "instanceName": "Torre Norte - 42" })]
        );
        assert_eq!(h.backend.delete_calls(), 1);
        assert!(h.backend.instance().is_none());

        let snapshot = h.controller.snapshot();
        assert!(snapshot.instance.is_none());
        assert_eq!(snapshot.phase, LifecyclePhase::None);
        assert!(h
            .controller
            .cache()
            .instance("42", Duration::from_secs(60))
            .is_none());
        assert!(h
            .controller
            .cache()
            .status("42", Duration::from_secs(60))
            .is_none());
    }

    #[tokio::test]
    async fn teardown_failure_skips_backend_delete() {
        let h = harness(with_instance(WhatsappStatus::Connected));
        h.transport
            .reply(DELETE_URL, 500, json!({ "message": "provider unavailable" }));
        h.controller.refresh().await.unwrap();

        let result = h.controller.delete().await;
        assert!(matches!(result, Err(WhatsAppError::Remote { .. })));
        assert_eq!(h.backend.delete_calls(), 0);

        let errors = h.notifier.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "provider unavailable");

        h.controller.reconcile().await.unwrap();
        let snapshot = h.controller.snapshot();
        assert_eq!(
            snapshot.instance.map(|i| i.status),
            Some(WhatsappStatus::Connected)
        );
        assert!(snapshot.in_flight.is_empty());
    }

    #[tokio::test]
    async fn backend_delete_failure_keeps_local_instance() {
        let h = harness(with_instance(WhatsappStatus::Connected));
        h.transport
            .reply(DELETE_URL, 200, json!({ "success": true }));
        h.backend.fail_delete(true);

        assert!(h.controller.delete().await.is_err());
        assert!(h.controller.snapshot().instance.is_some());
        assert_eq!(h.notifier.errors().len(), 1);
    }

    // =========================================================================
    // Create
    // =========================================================================

    #[tokio::test]
    async fn create_with_existing_instance_is_rejected() {
        let h = harness(with_instance(WhatsappStatus::Disconnected));

        let result = h.controller.create().await;
        assert!(matches!(result, Err(WhatsAppError::AlreadyExists(_))));
        assert_eq!(h.backend.create_calls(), 0);
        assert_eq!(h.notifier.errors().len(), 1);
    }

    #[tokio::test]
    async fn create_conflict_from_server_reports_once() {
        let h = harness(MockBackend::new());
        h.controller.reconcile().await.unwrap();
        // Another admin creates the instance after our view was loaded.
        h.backend
            .put_instance(sample_instance("42", WhatsappStatus::Disconnected));

        let result = h.controller.create().await;
        assert!(matches!(
            result,
            Err(WhatsAppError::Api { status: 409, .. })
        ));
        assert_eq!(h.backend.create_calls(), 1);

        let errors = h.notifier.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].action, LifecycleAction::Create);
        assert_eq!(errors[0].message, "Instance already exists");
        assert_eq!(h.notifier.all().len(), 1);
        assert!(!h.controller.snapshot().in_flight.contains(&LifecycleAction::Create));
    }

    // =========================================================================
    // QR
    // =========================================================================

    #[tokio::test]
    async fn qr_rejection_notifies_once_and_allows_retry() {
        let h = harness(with_instance(WhatsappStatus::Disconnected));
        h.transport.reply(CONNECT_URL, 502, json!(null));

        assert!(h.controller.request_qr().await.is_err());
        let errors = h.notifier.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].message,
            LifecycleAction::RequestQr.failure_message()
        );
        let snapshot = h.controller.snapshot();
        assert!(snapshot.in_flight.is_empty());
        assert!(snapshot.affordances.can_link_device);
        assert_eq!(snapshot.qr_code, None);

        h.transport.reply(CONNECT_URL, 200, qr_reply());
        h.controller.request_qr().await.unwrap();
        assert_eq!(h.controller.snapshot().time_left, Some(40));
        assert_eq!(h.notifier.errors().len(), 1);
    }

    #[tokio::test]
    async fn qr_reply_without_payload_is_malformed() {
        let h = harness(with_instance(WhatsappStatus::Disconnected));
        h.transport
            .reply(CONNECT_URL, 200, json!([{ "success": "true" }]));

        let result = h.controller.request_qr().await;
        assert!(matches!(result, Err(WhatsAppError::MalformedReply(_))));
        assert_eq!(h.notifier.errors().len(), 1);
        assert_eq!(h.controller.snapshot().qr_code, None);
    }

    #[tokio::test]
    async fn qr_without_connect_webhook_makes_no_call() {
        let directory = StaticWebhookDirectory::new().with(WebhookName::GetStatus, STATUS_URL);
        let h = harness_with(with_instance(WhatsappStatus::Disconnected), directory);

        let result = h.controller.request_qr().await;
        assert!(matches!(result, Err(WhatsAppError::MissingWebhook(_))));
        assert!(h.transport.calls_to(CONNECT_URL).is_empty());

        let errors = h.notifier.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("whatsapp_connect"));
    }

    #[tokio::test]
    async fn qr_without_instance_makes_no_call() {
        let h = harness(MockBackend::new());

        let result = h.controller.request_qr().await;
        assert!(matches!(result, Err(WhatsAppError::MissingInstance(_))));
        assert!(h.transport.calls_to(CONNECT_URL).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn second_qr_restarts_countdown() {
        let h = harness(with_instance(WhatsappStatus::Disconnected));
        h.transport.reply(CONNECT_URL, 200, qr_reply());
        h.controller.request_qr().await.unwrap();
        tokio::time::sleep(Duration::from_millis(25500)).await;
        assert_eq!(h.controller.snapshot().time_left, Some(15));

        h.transport.reply(
            CONNECT_URL,
            200,
            json!({ "success": true, "qr_base64": "second" }),
        );
        h.controller.request_qr().await.unwrap();
        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.qr_code.as_deref(), Some("second"));
        assert_eq!(snapshot.time_left, Some(40));

        // Past the first countdown's deadline: only the new one is running.
        tokio::time::sleep(Duration::from_millis(20250)).await;
        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.qr_code.as_deref(), Some("second"));
        assert_eq!(snapshot.time_left, Some(20));
    }

    #[tokio::test]
    async fn concurrent_qr_request_is_rejected() {
        let h = harness(with_instance(WhatsappStatus::Disconnected));
        h.transport.reply(CONNECT_URL, 200, qr_reply());
        let gate = h.transport.gate(CONNECT_URL);

        let controller = h.controller.clone();
        let first = tokio::spawn(async move { controller.request_qr().await });
        wait_for_call(&h.transport, CONNECT_URL).await;

        let second = h.controller.request_qr().await;
        assert!(matches!(
            second,
            Err(WhatsAppError::InFlight(LifecycleAction::RequestQr))
        ));
        assert!(!h.controller.affordances().can_link_device);

        gate.add_permits(1);
        first.await.unwrap().unwrap();
        assert_eq!(h.transport.calls_to(CONNECT_URL).len(), 1);
        assert!(h.controller.snapshot().in_flight.is_empty());
    }

    // =========================================================================
    // Disconnect
    // =========================================================================

    #[tokio::test]
    async fn disconnect_surfaces_provider_message() {
        let h = harness(with_instance(WhatsappStatus::Connected));
        h.transport.reply(
            DISCONNECT_URL,
            200,
            json!({ "success": false, "message": "Instance not found" }),
        );

        assert!(h.controller.disconnect().await.is_err());
        let errors = h.notifier.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "Instance not found");
        assert_eq!(
            h.controller.snapshot().last_error.as_deref(),
            Some("Instance not found")
        );
    }

    #[tokio::test]
    async fn disconnect_success_clears_error_and_refetches() {
        let h = harness(with_instance(WhatsappStatus::Connected));
        h.transport.reply(DISCONNECT_URL, 500, json!({}));
        assert!(h.controller.disconnect().await.is_err());
        assert!(h.controller.snapshot().last_error.is_some());

        h.transport
            .reply(DISCONNECT_URL, 200, json!({ "success": true }));
        h.backend.set_status(WhatsappStatus::Disconnected);
        let fetches_before = h.backend.get_calls();
        h.controller.disconnect().await.unwrap();

        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.last_error, None);
        assert_eq!(snapshot.status, Some(WhatsappStatus::Disconnected));
        assert_eq!(snapshot.phase, LifecyclePhase::Disconnected);
        assert!(h.backend.get_calls() > fetches_before);
        assert_eq!(
            h.transport.calls_to(DISCONNECT_URL).last(),
            Some(&json!({ "instanceName": "Torre Norte - 42" }))
        );
    }

    // =========================================================================
    // Polling
    // =========================================================================

    #[tokio::test]
    async fn poll_interval_is_fast_unless_connected() {
        for (state, expected) in [
            ("open", 30),
            ("connecting", 10),
            ("close", 10),
            ("error", 10),
        ] {
            let h = harness(with_instance(WhatsappStatus::Disconnected));
            h.controller.reconcile().await.unwrap();
            h.transport
                .reply(STATUS_URL, 200, json!({ "instance": { "state": state } }));

            h.controller.poll_status().await;
            assert_eq!(
                h.controller.status_poll_interval(),
                Duration::from_secs(expected),
                "provider state {}",
                state
            );
        }
    }

    #[tokio::test]
    async fn failed_status_poll_degrades_without_notice() {
        let h = harness(with_instance(WhatsappStatus::Connected));
        h.controller.reconcile().await.unwrap();
        h.transport.fail(STATUS_URL);

        h.controller.poll_status().await;
        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.status, Some(WhatsappStatus::Disconnected));
        assert!(snapshot.is_active_polling);
        assert!(h.notifier.all().is_empty());
    }

    #[tokio::test]
    async fn every_poll_refetches_the_record() {
        let h = harness(with_instance(WhatsappStatus::Pending));
        h.controller.reconcile().await.unwrap();
        h.transport
            .reply(STATUS_URL, 200, json!({ "state": "connecting" }));

        let before = h.backend.get_calls();
        h.controller.poll_status().await;
        h.controller.poll_status().await;
        assert_eq!(h.backend.get_calls(), before + 2);
    }

    #[tokio::test]
    async fn status_read_overtaken_by_delete_is_dropped() {
        let h = harness(with_instance(WhatsappStatus::Pending));
        h.controller.reconcile().await.unwrap();
        h.transport
            .reply(STATUS_URL, 200, json!({ "instance": { "state": "open" } }));
        h.transport
            .reply(DELETE_URL, 200, json!({ "success": true }));
        let gate = h.transport.gate(STATUS_URL);

        let controller = h.controller.clone();
        let poll = tokio::spawn(async move { controller.poll_status().await });
        wait_for_call(&h.transport, STATUS_URL).await;

        h.controller.delete().await.unwrap();
        let fetches_after_delete = h.backend.get_calls();

        gate.add_permits(1);
        poll.await.unwrap();

        let snapshot = h.controller.snapshot();
        assert!(snapshot.instance.is_none());
        assert_eq!(snapshot.status, None);
        assert_eq!(h.backend.get_calls(), fetches_after_delete);
        assert!(h
            .controller
            .cache()
            .status("42", Duration::from_secs(60))
            .is_none());
    }

    #[tokio::test]
    async fn external_removal_clears_local_view() {
        let h = harness(with_instance(WhatsappStatus::Connected));
        h.controller.reconcile().await.unwrap();
        h.backend.remove_instance();

        h.controller.reconcile().await.unwrap();
        let snapshot = h.controller.snapshot();
        assert!(snapshot.instance.is_none());
        assert!(snapshot.affordances.can_create);
    }

    // =========================================================================
    // Shared cache
    // =========================================================================

    #[tokio::test]
    async fn first_load_reads_fresh_shared_cache() {
        let h = harness(with_instance(WhatsappStatus::Pending));
        h.transport
            .reply(STATUS_URL, 200, json!({ "instance": { "state": "open" } }));
        h.controller.reconcile().await.unwrap();
        h.controller.poll_status().await;

        let fetches = h.backend.get_calls();
        let second = sharing_controller(&h.backend, h.controller.cache().clone());
        let loaded = second.load().await.unwrap();

        assert!(loaded.is_some());
        assert_eq!(h.backend.get_calls(), fetches);
        assert_eq!(second.effective_status(), Some(WhatsappStatus::Connected));
        assert_eq!(second.phase(), LifecyclePhase::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_shared_cache_goes_back_to_the_server() {
        let h = harness(with_instance(WhatsappStatus::Disconnected));
        h.controller.reconcile().await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        let fetches = h.backend.get_calls();
        let second = sharing_controller(&h.backend, h.controller.cache().clone());
        second.load().await.unwrap();

        assert_eq!(h.backend.get_calls(), fetches + 1);
        assert!(second.has_instance());
    }
}

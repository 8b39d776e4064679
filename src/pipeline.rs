use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::delivery::{Delivery, DeliveryRouter};
use crate::event::{LifecycleState, NotificationEvent};
use crate::extract::extract;
use crate::guard::{Admission, FingerprintGuard};
use crate::platform::{NotificationAction, NotificationInteraction, PlatformFallback, PlatformNotifier};
use crate::popup::{PopupCallback, PopupRegistry};
use crate::scanner::{ScanClient, ScanDispatcher, ScanError};
use crate::statistics::{PipelineStats, StatEvent, StatisticsCollector};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const TEST_PACKAGE: &str = "com.test.app";

/// What happened to one notification event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Rejected(Admission),
    /// No credential; nothing was sent.
    Skipped,
    /// Network or service failure, already logged.
    Failed,
    /// The service found nothing worth a warning.
    Clean,
    Delivered(Delivery),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionOutcome {
    Ignored,
    Invalid,
    Reported { scan_id: String },
    ReportSkipped,
    ReportFailed,
    Replayed(Delivery),
}

/// The notification detection pipeline: guard, extract, dispatch, route.
///
/// Built once at startup. Cloning is cheap and shares all state, so clones
/// can be handed to the bridge, the poller and spawned scan tasks.
#[derive(Clone)]
pub struct Pipeline {
    guard: Arc<FingerprintGuard>,
    dispatcher: Arc<ScanDispatcher>,
    router: Arc<DeliveryRouter>,
    popups: Arc<PopupRegistry>,
    fallback: Arc<PlatformFallback>,
    lifecycle: Arc<watch::Sender<LifecycleState>>,
    stats: Arc<StatisticsCollector>,
    test_mode: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        credentials: Arc<dyn CredentialStore>,
        notifier: Arc<dyn PlatformNotifier>,
    ) -> Result<Self, ScanError> {
        let client = ScanClient::new(&config.scanner)?;
        let dispatcher = ScanDispatcher::new(client, credentials);
        dispatcher.set_identity(config.identity.clone());

        let popups = Arc::new(PopupRegistry::new());
        let fallback = Arc::new(PlatformFallback::new(notifier, config.notifications.clone()));
        let (lifecycle, lifecycle_rx) = watch::channel(LifecycleState::Background);
        let router = DeliveryRouter::new(popups.clone(), fallback.clone(), lifecycle_rx);

        Ok(Self {
            guard: Arc::new(FingerprintGuard::new(&config.guard)),
            dispatcher: Arc::new(dispatcher),
            router: Arc::new(router),
            popups,
            fallback,
            lifecycle: Arc::new(lifecycle),
            stats: Arc::new(StatisticsCollector::new()),
            test_mode: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Prepares the platform surface (permission, alert channel).
    pub async fn start(&self) {
        self.fallback.prepare().await;
    }

    /// Admits the event in arrival order and runs the rest of the chain on a
    /// separate task. Returns `None` when the guard drops the event.
    pub fn ingest(&self, event: NotificationEvent) -> Option<JoinHandle<EventOutcome>> {
        if let Err(outcome) = self.admit(&event) {
            log::trace!("Event from {} dropped: {outcome:?}", event.package);
            return None;
        }
        let pipeline = self.clone();
        Some(tokio::spawn(async move { pipeline.process(event).await }))
    }

    /// Runs the whole chain for one event on the current task.
    pub async fn handle_event(&self, event: NotificationEvent) -> EventOutcome {
        if let Err(outcome) = self.admit(&event) {
            return outcome;
        }
        self.process(event).await
    }

    fn admit(&self, event: &NotificationEvent) -> Result<(), EventOutcome> {
        self.stats.record_event(StatEvent::Received);
        let admission = self.guard.check(event);
        self.stats.record_event(StatEvent::Admission(admission));
        if admission.is_admitted() {
            log::info!("Processing notification: {}", event.fingerprint());
            Ok(())
        } else {
            Err(EventOutcome::Rejected(admission))
        }
    }

    async fn process(&self, event: NotificationEvent) -> EventOutcome {
        let content = extract(event.text.as_deref());

        let verdict = match self.dispatcher.dispatch(&content).await {
            Ok(Some(verdict)) => verdict,
            Ok(None) => {
                self.stats.record_event(StatEvent::ScanSkipped);
                return EventOutcome::Skipped;
            }
            Err(e) => {
                log::error!("Scan error for {}: {e}", event.package);
                self.stats.record_event(StatEvent::ScanFailed);
                return EventOutcome::Failed;
            }
        };

        if !verdict.show_warning {
            log::debug!("No warning for notification from {}", event.package);
            self.stats.record_event(StatEvent::ScanClean);
            return EventOutcome::Clean;
        }

        log::warn!(
            "Threat detected in notification from {}: {}",
            event.package,
            verdict.description()
        );
        self.stats.record_event(StatEvent::ThreatDetected);
        let delivery = self.router.route(verdict).await;
        self.stats.record_event(StatEvent::Delivered(delivery));
        EventOutcome::Delivered(delivery)
    }

    /// Installs or removes the in-app popup subscriber.
    pub fn register_popup(&self, callback: Option<PopupCallback>) -> bool {
        let flushed = self.popups.register(callback);
        if flushed {
            self.stats.record_event(StatEvent::Delivered(Delivery::Popup));
        }
        flushed
    }

    pub fn set_lifecycle(&self, state: LifecycleState) {
        let previous = self.lifecycle.send_replace(state);
        if previous != state {
            log::info!("App state changed to: {state}");
        }
        if state.is_foreground() && self.router.app_became_foreground() {
            self.stats.record_event(StatEvent::Delivered(Delivery::Popup));
        }
    }

    pub fn lifecycle(&self) -> LifecycleState {
        *self.lifecycle.borrow()
    }

    pub fn set_user_identity(&self, identity: Option<String>) {
        self.dispatcher.set_identity(identity);
    }

    /// Identity attached to outgoing scans.
    pub fn identity(&self) -> String {
        self.dispatcher.identity()
    }

    pub fn popups(&self) -> &PopupRegistry {
        &self.popups
    }

    /// Handles a tap or button press on a platform notification. Everything
    /// is recovered from the notification payload.
    pub async fn handle_interaction(&self, interaction: NotificationInteraction) -> InteractionOutcome {
        if !interaction.user_interaction {
            log::debug!("Ignoring notification event without user interaction");
            return InteractionOutcome::Ignored;
        }

        let payload = match interaction.payload() {
            Ok(payload) => payload,
            Err(e) => {
                log::warn!("Unreadable notification payload: {e}");
                return InteractionOutcome::Invalid;
            }
        };

        match (interaction.action(), payload.scam_data) {
            (Some(NotificationAction::Block), Some(verdict)) => {
                log::info!("Block action pressed in notification");
                let outcome = match verdict.scan_id {
                    Some(scan_id) => self.report(scan_id).await,
                    None => {
                        log::warn!("Block pressed on a notification without a scan id");
                        InteractionOutcome::Invalid
                    }
                };
                if let Some(id) = interaction.notification_id {
                    if let Err(e) = self.fallback.dismiss(id).await {
                        log::warn!("Failed to close notification {id}: {e}");
                    }
                }
                outcome
            }
            (Some(NotificationAction::View), Some(verdict)) => {
                if let Err(e) = self.fallback.open_alert_view().await {
                    log::warn!("Failed to open alert view: {e}");
                }
                let delivery = self.router.replay(verdict).await;
                self.stats.record_event(StatEvent::Delivered(delivery));
                InteractionOutcome::Replayed(delivery)
            }
            (None, Some(verdict)) if payload.show_popup => {
                let delivery = self.router.replay(verdict).await;
                self.stats.record_event(StatEvent::Delivered(delivery));
                InteractionOutcome::Replayed(delivery)
            }
            _ => InteractionOutcome::Ignored,
        }
    }

    async fn report(&self, scan_id: String) -> InteractionOutcome {
        match self.dispatcher.report_scan(&scan_id).await {
            Ok(true) => {
                self.stats.record_event(StatEvent::Reported);
                InteractionOutcome::Reported { scan_id }
            }
            Ok(false) => InteractionOutcome::ReportSkipped,
            Err(e) => {
                log::error!("Failed to report scan from notification: {e}");
                InteractionOutcome::ReportFailed
            }
        }
    }

    pub fn enable_test_mode(&self) {
        self.test_mode.store(true, Ordering::Relaxed);
        log::info!("Notification test mode enabled");
    }

    /// Runs a synthetic notification through the chain. Refused unless test
    /// mode is enabled.
    pub async fn simulate(&self, text: &str, title: Option<&str>) -> Option<EventOutcome> {
        if !self.test_mode.load(Ordering::Relaxed) {
            log::warn!("Test mode not enabled. Call enable_test_mode() first");
            return None;
        }
        let event = NotificationEvent::new(TEST_PACKAGE, Some(title.unwrap_or("Test App")), text);
        log::info!("Simulating notification: {}", event.fingerprint());
        Some(self.handle_event(event).await)
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.snapshot()
    }

    pub(crate) fn record(&self, event: StatEvent) {
        self.stats.record_event(event);
    }

    pub fn log_summary(&self) {
        self.stats.log_summary();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentials;
    use crate::platform::testing::RecordingNotifier;
    use crate::verdict::ScanVerdict;
    use parking_lot::Mutex;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Harness {
        pipeline: Pipeline,
        notifier: Arc<RecordingNotifier>,
        server: MockServer,
    }

    async fn harness(token: Option<&str>) -> Harness {
        let server = MockServer::start().await;
        let mut config = Config::default();
        config.scanner.base_url = format!("{}/api/scan", server.uri());
        let notifier = Arc::new(RecordingNotifier::default());
        let pipeline = Pipeline::new(
            &config,
            Arc::new(StaticCredentials::new(token)),
            notifier.clone(),
        )
        .unwrap();
        Harness {
            pipeline,
            notifier,
            server,
        }
    }

    fn threat_body() -> serde_json::Value {
        json!({
            "show_warning": true,
            "combined_threat": {"description": "Bank phishing", "score": 0.95},
            "text_analysis": {"description": "Requests verification"},
            "scan_id": "scan-1",
            "threatCategory": "Critical"
        })
    }

    async fn mount_scan(server: &MockServer, body: serde_json::Value, expected: u64) {
        Mock::given(method("POST"))
            .and(path("/api/scan/notification/scan"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(expected)
            .mount(server)
            .await;
    }

    fn recorder() -> (PopupCallback, Arc<Mutex<Vec<ScanVerdict>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: PopupCallback = Arc::new(move |verdict: ScanVerdict| -> Result<(), ScanVerdict> {
            sink.lock().push(verdict);
            Ok(())
        });
        (callback, seen)
    }

    fn bank_event() -> NotificationEvent {
        NotificationEvent::new("a", Some("Bank"), "Verify now http://bit.ly/x")
    }

    #[tokio::test]
    async fn test_foreground_threat_waits_for_subscriber() {
        let h = harness(Some("tok")).await;
        Mock::given(method("POST"))
            .and(path("/api/scan/notification/scan"))
            .and(body_json(json!({
                "text": "Verify now",
                "urls": ["http://bit.ly/x"],
                "user": "anonymous@device"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(threat_body()))
            .expect(1)
            .mount(&h.server)
            .await;

        h.pipeline.set_lifecycle(LifecycleState::Foreground);
        let outcome = h.pipeline.handle_event(bank_event()).await;
        assert_eq!(outcome, EventOutcome::Delivered(Delivery::Pending));
        assert!(h.pipeline.popups().pending().is_some());

        let (callback, seen) = recorder();
        assert!(h.pipeline.register_popup(Some(callback)));
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(seen.lock()[0].scan_id.as_deref(), Some("scan-1"));
        assert!(h.pipeline.popups().pending().is_none());
        assert!(h.notifier.shown.lock().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_event_dispatches_once() {
        let h = harness(Some("tok")).await;
        mount_scan(&h.server, json!({"show_warning": false}), 1).await;

        assert_eq!(h.pipeline.handle_event(bank_event()).await, EventOutcome::Clean);
        assert_eq!(
            h.pipeline.handle_event(bank_event()).await,
            EventOutcome::Rejected(Admission::Duplicate)
        );
    }

    #[tokio::test]
    async fn test_empty_event_never_dispatched() {
        let h = harness(Some("tok")).await;
        mount_scan(&h.server, threat_body(), 0).await;

        let event = NotificationEvent::new("a", Some("Bank"), "");
        assert_eq!(
            h.pipeline.handle_event(event).await,
            EventOutcome::Rejected(Admission::Empty)
        );
    }

    #[tokio::test]
    async fn test_missing_credential_is_silent_noop() {
        let h = harness(None).await;
        mount_scan(&h.server, threat_body(), 0).await;

        assert_eq!(h.pipeline.handle_event(bank_event()).await, EventOutcome::Skipped);
        assert!(h.notifier.shown.lock().is_empty());
        assert_eq!(h.pipeline.stats().scans_skipped, 1);
    }

    #[tokio::test]
    async fn test_clean_verdict_never_routed() {
        let h = harness(Some("tok")).await;
        mount_scan(&h.server, json!({"show_warning": false, "scan_id": "s"}), 1).await;

        h.pipeline.set_lifecycle(LifecycleState::Foreground);
        assert_eq!(h.pipeline.handle_event(bank_event()).await, EventOutcome::Clean);
        assert!(h.pipeline.popups().pending().is_none());
        assert!(h.notifier.shown.lock().is_empty());
    }

    #[tokio::test]
    async fn test_service_failure_is_swallowed() {
        let h = harness(Some("tok")).await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&h.server)
            .await;

        assert_eq!(h.pipeline.handle_event(bank_event()).await, EventOutcome::Failed);
        assert_eq!(h.pipeline.stats().scans_failed, 1);
        // The fingerprint stays blocked even though the scan failed.
        assert_eq!(
            h.pipeline.handle_event(bank_event()).await,
            EventOutcome::Rejected(Admission::Duplicate)
        );
    }

    #[tokio::test]
    async fn test_background_threat_goes_to_platform() {
        let h = harness(Some("tok")).await;
        mount_scan(&h.server, threat_body(), 1).await;

        let (callback, seen) = recorder();
        h.pipeline.register_popup(Some(callback));
        let outcome = h.pipeline.handle_event(bank_event()).await;

        assert!(matches!(
            outcome,
            EventOutcome::Delivered(Delivery::Platform(_))
        ));
        assert!(seen.lock().is_empty());
        assert!(h.pipeline.popups().pending().is_none());
        let shown = h.notifier.shown.lock();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].message, "Bank phishing");
    }

    #[tokio::test]
    async fn test_ingest_spawns_and_rejects_in_arrival_order() {
        let h = harness(Some("tok")).await;
        mount_scan(&h.server, json!({"show_warning": false}), 1).await;

        let first = h.pipeline.ingest(bank_event()).expect("first admitted");
        let other = NotificationEvent::new("b", Some("Shop"), "Sale today");
        assert!(h.pipeline.ingest(other).is_none());
        assert_eq!(first.await.unwrap(), EventOutcome::Clean);

        let stats = h.pipeline.stats();
        assert_eq!(stats.received, 2);
        assert_eq!(stats.admitted, 1);
        assert_eq!(stats.rejected_rate_limited, 1);
    }

    #[tokio::test]
    async fn test_block_action_reports_and_closes() {
        let h = harness(Some("tok")).await;
        mount_scan(&h.server, threat_body(), 1).await;
        Mock::given(method("POST"))
            .and(path("/api/scan/manual/report/scan-1/report"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&h.server)
            .await;

        h.pipeline.handle_event(bank_event()).await;
        let notification = h.notifier.shown.lock()[0].clone();

        let outcome = h
            .pipeline
            .handle_interaction(NotificationInteraction {
                notification_id: Some(notification.id),
                action: Some("Block".to_string()),
                user_interaction: true,
                user_info: notification.user_info,
            })
            .await;

        assert_eq!(
            outcome,
            InteractionOutcome::Reported {
                scan_id: "scan-1".to_string()
            }
        );
        assert_eq!(*h.notifier.cancelled.lock(), vec![notification.id]);
    }

    #[tokio::test]
    async fn test_view_action_replays_from_payload_alone() {
        let h = harness(Some("tok")).await;
        mount_scan(&h.server, threat_body(), 1).await;
        h.pipeline.handle_event(bank_event()).await;
        let notification = h.notifier.shown.lock()[0].clone();

        // A fresh pipeline stands in for a restarted process.
        let restarted = harness(Some("tok")).await;
        let (callback, seen) = recorder();
        restarted.pipeline.register_popup(Some(callback));

        let outcome = restarted
            .pipeline
            .handle_interaction(NotificationInteraction {
                notification_id: Some(notification.id),
                action: Some("View".to_string()),
                user_interaction: true,
                user_info: notification.user_info,
            })
            .await;

        assert_eq!(outcome, InteractionOutcome::Replayed(Delivery::Popup));
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(seen.lock()[0].description(), "Bank phishing");
        assert_eq!(
            *restarted.notifier.opened.lock(),
            vec!["guardspire://scam-alert".to_string()]
        );
    }

    #[tokio::test]
    async fn test_non_user_interaction_ignored() {
        let h = harness(Some("tok")).await;
        let outcome = h
            .pipeline
            .handle_interaction(NotificationInteraction {
                notification_id: None,
                action: Some("Block".to_string()),
                user_interaction: false,
                user_info: json!({"showPopup": true, "scamData": {"show_warning": true, "scan_id": "x"}}),
            })
            .await;
        assert_eq!(outcome, InteractionOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_plain_tap_replays_popup() {
        let h = harness(Some("tok")).await;
        let outcome = h
            .pipeline
            .handle_interaction(NotificationInteraction {
                notification_id: Some(9),
                action: None,
                user_interaction: true,
                user_info: json!({"showPopup": true, "scamData": {"show_warning": true}}),
            })
            .await;
        assert_eq!(outcome, InteractionOutcome::Replayed(Delivery::Pending));
    }

    #[tokio::test]
    async fn test_foreground_transition_without_pending_shows_nothing() {
        let h = harness(Some("tok")).await;
        let (callback, seen) = recorder();
        h.pipeline.register_popup(Some(callback));
        h.pipeline.set_lifecycle(LifecycleState::Foreground);
        assert!(seen.lock().is_empty());
        assert_eq!(h.pipeline.lifecycle(), LifecycleState::Foreground);
    }

    #[tokio::test]
    async fn test_block_without_scan_id_still_closes_notification() {
        let h = harness(Some("tok")).await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&h.server)
            .await;

        let outcome = h
            .pipeline
            .handle_interaction(NotificationInteraction {
                notification_id: Some(4),
                action: Some("Block".to_string()),
                user_interaction: true,
                user_info: json!({"showPopup": true, "scamData": {"show_warning": true}}),
            })
            .await;

        assert_eq!(outcome, InteractionOutcome::Invalid);
        assert_eq!(*h.notifier.cancelled.lock(), vec![4]);
    }

    #[tokio::test]
    async fn test_simulate_requires_test_mode() {
        let h = harness(Some("tok")).await;
        mount_scan(&h.server, json!({"show_warning": false}), 1).await;

        assert_eq!(h.pipeline.simulate("Win a prize http://x.y", None).await, None);
        h.pipeline.enable_test_mode();
        assert_eq!(
            h.pipeline.simulate("Win a prize http://x.y", None).await,
            Some(EventOutcome::Clean)
        );
    }

    #[tokio::test]
    async fn test_identity_is_sent() {
        let h = harness(Some("tok")).await;
        Mock::given(method("POST"))
            .and(body_json(json!({
                "text": "Verify now",
                "urls": ["http://bit.ly/x"],
                "user": "me@example.com"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"show_warning": false})))
            .expect(1)
            .mount(&h.server)
            .await;

        h.pipeline.set_user_identity(Some("me@example.com".to_string()));
        assert_eq!(h.pipeline.handle_event(bank_event()).await, EventOutcome::Clean);
    }
}

use crate::config::NotificationsConfig;
use crate::verdict::ScanVerdict;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("Platform notifications unavailable: {0}")]
    Unavailable(String),
    #[error("Platform notification failed: {0}")]
    Failed(String),
}

/// Buttons attached to a scam-alert notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationAction {
    Block,
    View,
}

impl NotificationAction {
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim() {
            "Block" | "block" => Some(NotificationAction::Block),
            "View" | "view" => Some(NotificationAction::View),
            _ => None,
        }
    }
}

impl fmt::Display for NotificationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationAction::Block => f.write_str("Block"),
            NotificationAction::View => f.write_str("View"),
        }
    }
}

/// Data attached to a platform notification. Everything an action handler
/// needs is carried here, so handlers work after the process was killed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NotificationPayload {
    #[serde(rename = "showPopup", alias = "show_popup", default)]
    pub show_popup: bool,
    #[serde(rename = "scamData", alias = "scam_data", default)]
    pub scam_data: Option<ScanVerdict>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformNotification {
    pub id: u64,
    pub channel_id: String,
    pub title: String,
    pub message: String,
    pub big_text: String,
    pub sub_text: String,
    pub actions: Vec<NotificationAction>,
    pub auto_cancel: bool,
    pub invoke_app: bool,
    pub user_info: Value,
}

/// A user's response to a platform notification, as reported back by the surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationInteraction {
    #[serde(default)]
    pub notification_id: Option<u64>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub user_interaction: bool,
    #[serde(default)]
    pub user_info: Value,
}

impl NotificationInteraction {
    pub fn action(&self) -> Option<NotificationAction> {
        self.action.as_deref().and_then(NotificationAction::parse)
    }

    pub fn payload(&self) -> Result<NotificationPayload, serde_json::Error> {
        if self.user_info.is_null() {
            return Ok(NotificationPayload::default());
        }
        serde_json::from_value(self.user_info.clone())
    }
}

/// The OS notification surface.
#[async_trait]
pub trait PlatformNotifier: Send + Sync {
    async fn ensure_permission(&self) -> Result<bool, PlatformError>;
    /// Returns true when the channel was newly created.
    async fn create_channel(&self, channel: &NotificationsConfig) -> Result<bool, PlatformError>;
    async fn show(&self, notification: PlatformNotification) -> Result<(), PlatformError>;
    async fn cancel(&self, notification_id: u64) -> Result<(), PlatformError>;
    async fn open_alert_view(&self, link: &str) -> Result<(), PlatformError>;
}

/// Surface used when no native renderer is attached: alerts go to the log.
pub struct LogNotifier;

#[async_trait]
impl PlatformNotifier for LogNotifier {
    async fn ensure_permission(&self) -> Result<bool, PlatformError> {
        Ok(true)
    }

    async fn create_channel(&self, channel: &NotificationsConfig) -> Result<bool, PlatformError> {
        log::debug!("Notification channel {} ready", channel.channel_id);
        Ok(false)
    }

    async fn show(&self, notification: PlatformNotification) -> Result<(), PlatformError> {
        log::warn!(
            "{} {} ({})",
            notification.title,
            notification.message,
            notification.big_text.replace('\n', " | ")
        );
        Ok(())
    }

    async fn cancel(&self, notification_id: u64) -> Result<(), PlatformError> {
        log::debug!("Notification {notification_id} closed");
        Ok(())
    }

    async fn open_alert_view(&self, link: &str) -> Result<(), PlatformError> {
        log::info!("Open alert view: {link}");
        Ok(())
    }
}

/// Background delivery path: turns a verdict into an actionable platform
/// notification. Degrades to a no-op when the surface is unavailable.
pub struct PlatformFallback {
    notifier: Arc<dyn PlatformNotifier>,
    channel: NotificationsConfig,
    next_id: AtomicU64,
    available: AtomicBool,
}

impl PlatformFallback {
    pub fn new(notifier: Arc<dyn PlatformNotifier>, channel: NotificationsConfig) -> Self {
        Self {
            notifier,
            channel,
            next_id: AtomicU64::new(1),
            available: AtomicBool::new(true),
        }
    }

    /// Requests permission and creates the alert channel.
    pub async fn prepare(&self) {
        match self.notifier.ensure_permission().await {
            Ok(true) => {}
            Ok(false) => {
                log::warn!("Notification permission not granted; enable notifications in app settings");
            }
            Err(PlatformError::Unavailable(reason)) => {
                log::warn!("Platform notifications unavailable ({reason}), background alerts disabled");
                self.available.store(false, Ordering::Relaxed);
                return;
            }
            Err(e) => log::warn!("Permission error: {e}"),
        }

        match self.notifier.create_channel(&self.channel).await {
            Ok(created) => log::info!(
                "Notification channel {} {}",
                self.channel.channel_id,
                if created { "created" } else { "already exists" }
            ),
            Err(e) => log::warn!("Failed to create notification channel: {e}"),
        }
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    pub fn alert_link(&self) -> &str {
        &self.channel.alert_link
    }

    pub fn build(&self, verdict: &ScanVerdict) -> PlatformNotification {
        let category = verdict.category();
        let mut big_text = format!(
            "Threat Level: {} ({} severity)",
            verdict.score_label(),
            category.severity()
        );
        if let Some(analysis) = verdict.text_analysis.description.as_deref() {
            big_text.push('\n');
            big_text.push_str(analysis);
        }

        let payload = NotificationPayload {
            show_popup: true,
            scam_data: Some(verdict.clone()),
        };

        PlatformNotification {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            channel_id: self.channel.channel_id.clone(),
            title: format!("🚨 {} detected!", category.headline()),
            message: verdict.description().to_string(),
            big_text,
            sub_text: "Tap to view details".to_string(),
            actions: vec![NotificationAction::Block, NotificationAction::View],
            auto_cancel: true,
            invoke_app: true,
            user_info: serde_json::to_value(payload).unwrap_or(Value::Null),
        }
    }

    /// Shows the alert; returns the notification id, or `None` when the
    /// surface is unavailable.
    pub async fn notify_platform(&self, verdict: &ScanVerdict) -> Result<Option<u64>, PlatformError> {
        if !self.is_available() {
            log::debug!("Platform notifications unavailable, alert dropped");
            return Ok(None);
        }
        let notification = self.build(verdict);
        let id = notification.id;
        match self.notifier.show(notification).await {
            Ok(()) => Ok(Some(id)),
            Err(PlatformError::Unavailable(reason)) => {
                log::warn!("Platform notifications unavailable ({reason}), background alerts disabled");
                self.available.store(false, Ordering::Relaxed);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn dismiss(&self, notification_id: u64) -> Result<(), PlatformError> {
        self.notifier.cancel(notification_id).await
    }

    pub async fn open_alert_view(&self) -> Result<(), PlatformError> {
        self.notifier.open_alert_view(&self.channel.alert_link).await
    }
}

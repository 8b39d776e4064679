use crate::config::NotificationsConfig;
use crate::event::{LifecycleState, NotificationEvent};
use crate::pipeline::Pipeline;
use crate::platform::{NotificationInteraction, PlatformError, PlatformNotification, PlatformNotifier};
use crate::popup::PopupCallback;
use crate::verdict::ScanVerdict;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};

/// Messages sent by the native side, one JSON object per line.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeMessage {
    Notification(NotificationEvent),
    Lifecycle { state: LifecycleState },
    Subscribe,
    Unsubscribe,
    Interaction(NotificationInteraction),
    Identity {
        #[serde(default)]
        user: Option<String>,
    },
}

/// Messages sent to the native side.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Popup { verdict: ScanVerdict },
    CreateChannel { channel: NotificationsConfig },
    ShowNotification { notification: PlatformNotification },
    CancelNotification { id: u64 },
    OpenUrl { url: String },
    Error { message: String },
}

/// Platform surface backed by the bridge: every call is broadcast to the
/// connected native clients, which render it.
pub struct BridgeNotifier {
    outbound: broadcast::Sender<Outbound>,
}

impl BridgeNotifier {
    pub fn new(outbound: broadcast::Sender<Outbound>) -> Self {
        Self { outbound }
    }

    fn publish(&self, message: Outbound) -> Result<(), PlatformError> {
        self.outbound
            .send(message)
            .map(|_| ())
            .map_err(|_| PlatformError::Failed("no bridge client connected".to_string()))
    }
}

#[async_trait]
impl PlatformNotifier for BridgeNotifier {
    async fn ensure_permission(&self) -> Result<bool, PlatformError> {
        // Permission prompts are owned by the native side.
        Ok(true)
    }

    async fn create_channel(&self, channel: &NotificationsConfig) -> Result<bool, PlatformError> {
        Ok(self
            .publish(Outbound::CreateChannel {
                channel: channel.clone(),
            })
            .is_ok())
    }

    async fn show(&self, notification: PlatformNotification) -> Result<(), PlatformError> {
        self.publish(Outbound::ShowNotification { notification })
    }

    async fn cancel(&self, notification_id: u64) -> Result<(), PlatformError> {
        self.publish(Outbound::CancelNotification { id: notification_id })
    }

    async fn open_alert_view(&self, link: &str) -> Result<(), PlatformError> {
        self.publish(Outbound::OpenUrl {
            url: link.to_string(),
        })
    }
}

/// JSON-lines server on a Unix socket connecting native clients to the pipeline.
#[derive(Clone)]
pub struct BridgeServer {
    pipeline: Pipeline,
    outbound: broadcast::Sender<Outbound>,
    subscriber: Arc<Mutex<Option<u64>>>,
    next_connection: Arc<AtomicU64>,
}

impl BridgeServer {
    pub fn new(pipeline: Pipeline, outbound: broadcast::Sender<Outbound>) -> Self {
        Self {
            pipeline,
            outbound,
            subscriber: Arc::new(Mutex::new(None)),
            next_connection: Arc::new(AtomicU64::new(1)),
        }
    }

    pub async fn run<F>(&self, socket_path: &str, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        log::info!("Starting bridge on: {socket_path}");
        if Path::new(socket_path).exists() {
            std::fs::remove_file(socket_path)?;
        }
        let listener = UnixListener::bind(socket_path)?;

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let connection = self.next_connection.fetch_add(1, Ordering::Relaxed);
                        log::debug!("Bridge client {connection} connected");
                        let server = self.clone();
                        tokio::spawn(async move { server.serve(stream, connection).await });
                    }
                    Err(e) => log::error!("Bridge accept failed: {e}"),
                },
                _ = &mut shutdown => break,
            }
        }

        drop(listener);
        if let Err(e) = std::fs::remove_file(socket_path) {
            log::debug!("Could not remove bridge socket {socket_path}: {e}");
        }
        log::info!("Bridge stopped");
        Ok(())
    }

    /// Serves one client until it disconnects.
    pub async fn serve<S>(&self, stream: S, connection: u64)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let (direct, mut direct_rx) = mpsc::unbounded_channel::<Outbound>();
        let mut broadcast_rx = self.outbound.subscribe();

        let writer_task = tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    Some(message) = direct_rx.recv() => message,
                    received = broadcast_rx.recv() => match received {
                        Ok(message) => message,
                        Err(RecvError::Lagged(skipped)) => {
                            log::warn!("Bridge client {connection} lagged, {skipped} message(s) dropped");
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    },
                };

                let mut line = match serde_json::to_string(&message) {
                    Ok(line) => line,
                    Err(e) => {
                        log::error!("Failed to encode bridge message: {e}");
                        continue;
                    }
                };
                line.push('\n');
                if writer.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if !line.trim().is_empty() {
                        self.handle_line(&line, connection, &direct);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    log::warn!("Bridge client {connection} read error: {e}");
                    break;
                }
            }
        }

        self.release(connection);
        writer_task.abort();
        log::debug!("Bridge client {connection} disconnected");
    }

    fn handle_line(&self, line: &str, connection: u64, direct: &mpsc::UnboundedSender<Outbound>) {
        let message = match serde_json::from_str::<BridgeMessage>(line) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Invalid bridge message from client {connection}: {e}");
                let _ = direct.send(Outbound::Error {
                    message: e.to_string(),
                });
                return;
            }
        };

        match message {
            BridgeMessage::Notification(event) => {
                self.pipeline.ingest(event);
            }
            BridgeMessage::Lifecycle { state } => self.pipeline.set_lifecycle(state),
            BridgeMessage::Subscribe => {
                let sender = direct.clone();
                let callback: PopupCallback = Arc::new(move |verdict: ScanVerdict| {
                    sender
                        .send(Outbound::Popup {
                            verdict: verdict.clone(),
                        })
                        .map_err(|_| verdict)
                });
                // Held across registration so the owner and the installed
                // callback always change together.
                let mut subscriber = self.subscriber.lock();
                *subscriber = Some(connection);
                self.pipeline.register_popup(Some(callback));
                log::info!("Bridge client {connection} subscribed to popups");
            }
            BridgeMessage::Unsubscribe => self.release(connection),
            BridgeMessage::Interaction(interaction) => {
                let pipeline = self.pipeline.clone();
                tokio::spawn(async move {
                    pipeline.handle_interaction(interaction).await;
                });
            }
            BridgeMessage::Identity { user } => self.pipeline.set_user_identity(user),
        }
    }

    /// Detaches the popup subscriber if this connection owns it.
    fn release(&self, connection: u64) {
        let mut subscriber = self.subscriber.lock();
        if *subscriber == Some(connection) {
            *subscriber = None;
            self.pipeline.register_popup(None);
            log::info!("Bridge client {connection} unsubscribed from popups");
        }
    }
}

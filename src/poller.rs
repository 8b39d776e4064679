use crate::event::NotificationEvent;
use crate::pipeline::Pipeline;
use crate::statistics::StatEvent;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Missed-notification retrieval not supported")]
    Unsupported,
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Platform-side feed of notifications that arrived while the listener was
/// not running.
#[async_trait]
pub trait NotificationSource: Send + Sync {
    fn supports_missed(&self) -> bool {
        false
    }

    async fn missed_notifications(&self) -> Result<Vec<NotificationEvent>, SourceError>;
}

/// Reads spooled events from `*.jsonl` files, one JSON event per line.
/// Files are removed once read; an entry that cannot be read is renamed to
/// `*.jsonl.failed` so later polls skip it.
pub struct SpoolSource {
    dir: PathBuf,
}

impl SpoolSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn io_error(path: &Path, source: std::io::Error) -> SourceError {
        SourceError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    async fn spool_files(&self) -> Result<Vec<PathBuf>, SourceError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::io_error(&self.dir, e)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Self::io_error(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("jsonl") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    async fn quarantine(path: &Path) {
        let mut failed = path.as_os_str().to_owned();
        failed.push(".failed");
        match tokio::fs::rename(path, &failed).await {
            Ok(()) => log::warn!(
                "Moved unreadable spool entry to {}",
                Path::new(&failed).display()
            ),
            Err(e) => log::error!("Could not move aside spool entry {}: {e}", path.display()),
        }
    }
}

#[async_trait]
impl NotificationSource for SpoolSource {
    fn supports_missed(&self) -> bool {
        true
    }

    async fn missed_notifications(&self) -> Result<Vec<NotificationEvent>, SourceError> {
        let mut events = Vec::new();
        for path in self.spool_files().await? {
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) => {
                    log::error!("{}", Self::io_error(&path, e));
                    Self::quarantine(&path).await;
                    continue;
                }
            };
            if let Err(e) = tokio::fs::remove_file(&path).await {
                log::warn!("Spooled file {} read but not removed: {e}", path.display());
                Self::quarantine(&path).await;
            }

            for (number, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<NotificationEvent>(line) {
                    Ok(event) => events.push(event),
                    Err(e) => log::warn!(
                        "Skipping malformed spooled event {}:{}: {e}",
                        path.display(),
                        number + 1
                    ),
                }
            }
        }
        Ok(events)
    }
}

/// Periodically pulls missed notifications while the app is not in the
/// foreground and feeds them through the pipeline.
pub struct MissedEventPoller {
    pipeline: Pipeline,
    source: Arc<dyn NotificationSource>,
    interval: Duration,
}

impl MissedEventPoller {
    pub fn new(pipeline: Pipeline, source: Arc<dyn NotificationSource>, interval: Duration) -> Self {
        Self {
            pipeline,
            source,
            interval,
        }
    }

    /// Returns `None` when the source cannot report missed notifications.
    pub fn spawn(self) -> Option<JoinHandle<()>> {
        if !self.source.supports_missed() {
            log::info!("Notification source has no missed-event support, poller not started");
            return None;
        }
        log::info!("Missed-notification poller every {:?}", self.interval);
        Some(tokio::spawn(async move { self.run().await }))
    }

    async fn run(self) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.poll_once().await;
        }
    }

    /// One poll cycle. Returns how many events were handed to the pipeline.
    pub async fn poll_once(&self) -> usize {
        if self.pipeline.lifecycle().is_foreground() {
            log::trace!("App in foreground, skipping missed-notification poll");
            return 0;
        }

        let events = match self.source.missed_notifications().await {
            Ok(events) => events,
            Err(e) => {
                log::error!("Error polling for missed notifications: {e}");
                return 0;
            }
        };

        let count = events.len();
        if count > 0 {
            log::info!("Found {count} missed notification(s)");
        }
        for event in events {
            self.pipeline.ingest(event);
        }
        self.pipeline.record(StatEvent::PollCompleted { events: count });
        count
    }
}

use crate::event::LifecycleState;
use crate::platform::PlatformFallback;
use crate::popup::{Offer, PopupRegistry};
use crate::verdict::ScanVerdict;
use std::sync::Arc;
use tokio::sync::watch;

/// Where a warning verdict ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the in-app popup subscriber.
    Popup,
    /// Parked until a popup subscriber registers.
    Pending,
    /// Posted as a platform notification with the given id.
    Platform(u64),
    /// The platform surface was unavailable or failed.
    Dropped,
}

/// Chooses between the in-app popup and the platform notification based on
/// the current lifecycle state.
pub struct DeliveryRouter {
    popups: Arc<PopupRegistry>,
    fallback: Arc<PlatformFallback>,
    lifecycle: watch::Receiver<LifecycleState>,
}

impl DeliveryRouter {
    pub fn new(
        popups: Arc<PopupRegistry>,
        fallback: Arc<PlatformFallback>,
        lifecycle: watch::Receiver<LifecycleState>,
    ) -> Self {
        Self {
            popups,
            fallback,
            lifecycle,
        }
    }

    pub fn lifecycle(&self) -> LifecycleState {
        *self.lifecycle.borrow()
    }

    pub async fn route(&self, verdict: ScanVerdict) -> Delivery {
        let state = self.lifecycle();
        self.route_as(state, verdict).await
    }

    /// Routes a verdict as if the app had just come to the foreground. Used
    /// when the user opens an alert from a platform notification.
    pub async fn replay(&self, verdict: ScanVerdict) -> Delivery {
        self.route_as(LifecycleState::Foreground, verdict).await
    }

    /// Called on the transition to foreground; flushes a parked popup.
    pub fn app_became_foreground(&self) -> bool {
        let flushed = self.popups.flush_pending();
        if flushed {
            log::info!("Delivered pending popup on return to foreground");
        }
        flushed
    }

    async fn route_as(&self, state: LifecycleState, verdict: ScanVerdict) -> Delivery {
        match state {
            LifecycleState::Foreground => match self.popups.offer(verdict) {
                Offer::Delivered => {
                    log::info!("Threat delivered to in-app popup");
                    Delivery::Popup
                }
                Offer::Pending => {
                    log::info!("No popup subscriber, threat kept as pending popup");
                    Delivery::Pending
                }
            },
            LifecycleState::Background => match self.fallback.notify_platform(&verdict).await {
                Ok(Some(id)) => {
                    log::info!("Threat delivered as platform notification {id}");
                    Delivery::Platform(id)
                }
                Ok(None) => Delivery::Dropped,
                Err(e) => {
                    log::error!("Failed to show background notification: {e}");
                    Delivery::Dropped
                }
            },
        }
    }
}

use crate::verdict::ScanVerdict;
use parking_lot::Mutex;
use std::sync::Arc;

/// UI callback that renders the in-app warning popup. A subscriber that can
/// no longer render hands the verdict back as `Err`.
pub type PopupCallback = Arc<dyn Fn(ScanVerdict) -> Result<(), ScanVerdict> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopupState {
    NoSubscriber,
    SubscriberIdle,
    Delivering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Delivered,
    Pending,
}

#[derive(Default)]
struct Mailbox {
    subscriber: Option<PopupCallback>,
    pending: Option<ScanVerdict>,
    delivering: usize,
}

/// Single-slot mailbox between the pipeline and the UI.
///
/// Holds one subscriber and at most one undelivered verdict. A newer verdict
/// overwrites an undelivered one. Callbacks run outside the lock.
#[derive(Default)]
pub struct PopupRegistry {
    mailbox: Mutex<Mailbox>,
}

impl PopupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs or detaches the UI subscriber. Installing one flushes any
    /// pending popup to it. Returns true if a pending popup was delivered.
    pub fn register(&self, callback: Option<PopupCallback>) -> bool {
        let flush = {
            let mut mailbox = self.mailbox.lock();
            match callback {
                Some(callback) => {
                    mailbox.subscriber = Some(callback.clone());
                    let pending = mailbox.pending.take();
                    if pending.is_some() {
                        mailbox.delivering += 1;
                    }
                    pending.map(|verdict| (callback, verdict))
                }
                None => {
                    mailbox.subscriber = None;
                    None
                }
            }
        };

        match flush {
            Some((callback, verdict)) => {
                log::info!("Delivering pending popup to new subscriber");
                self.deliver(callback, verdict) == Offer::Delivered
            }
            None => false,
        }
    }

    /// Delivers to the current subscriber, or parks the verdict until one registers.
    pub fn offer(&self, verdict: ScanVerdict) -> Offer {
        let callback = {
            let mut mailbox = self.mailbox.lock();
            match mailbox.subscriber.clone() {
                Some(callback) => {
                    mailbox.delivering += 1;
                    callback
                }
                None => {
                    if mailbox.pending.replace(verdict).is_some() {
                        log::debug!("Undelivered popup replaced by newer verdict");
                    }
                    return Offer::Pending;
                }
            }
        };
        self.deliver(callback, verdict)
    }

    /// Delivers the pending popup if both it and a subscriber are present.
    pub fn flush_pending(&self) -> bool {
        let flush = {
            let mut mailbox = self.mailbox.lock();
            if mailbox.subscriber.is_none() || mailbox.pending.is_none() {
                None
            } else {
                mailbox.delivering += 1;
                let callback = mailbox.subscriber.clone();
                callback.zip(mailbox.pending.take())
            }
        };

        match flush {
            Some((callback, verdict)) => self.deliver(callback, verdict) == Offer::Delivered,
            None => false,
        }
    }

    pub fn pending(&self) -> Option<ScanVerdict> {
        self.mailbox.lock().pending.clone()
    }

    pub fn has_subscriber(&self) -> bool {
        self.mailbox.lock().subscriber.is_some()
    }

    pub fn state(&self) -> PopupState {
        let mailbox = self.mailbox.lock();
        if mailbox.delivering > 0 {
            PopupState::Delivering
        } else if mailbox.subscriber.is_some() {
            PopupState::SubscriberIdle
        } else {
            PopupState::NoSubscriber
        }
    }

    /// Runs the callback; the caller has already counted it as delivering.
    /// A refused verdict drops that subscriber and goes to whichever
    /// subscriber replaced it, or back into the pending slot.
    fn deliver(&self, mut callback: PopupCallback, mut verdict: ScanVerdict) -> Offer {
        loop {
            let refused = match self.run(&callback, verdict) {
                Ok(()) => return Offer::Delivered,
                Err(refused) => refused,
            };

            let mut mailbox = self.mailbox.lock();
            let current = mailbox
                .subscriber
                .as_ref()
                .is_some_and(|subscriber| Arc::ptr_eq(subscriber, &callback));
            if current {
                log::warn!("Popup subscriber gone, unregistering it");
                mailbox.subscriber = None;
            }
            match mailbox.subscriber.clone() {
                Some(next) => {
                    mailbox.delivering += 1;
                    callback = next;
                    verdict = refused;
                }
                None => {
                    // A verdict parked meanwhile is newer; keep it.
                    if mailbox.pending.is_none() {
                        mailbox.pending = Some(refused);
                    }
                    return Offer::Pending;
                }
            }
        }
    }

    fn run(&self, callback: &PopupCallback, verdict: ScanVerdict) -> Result<(), ScanVerdict> {
        struct Done<'a>(&'a Mutex<Mailbox>);
        impl Drop for Done<'_> {
            fn drop(&mut self) {
                let mut mailbox = self.0.lock();
                mailbox.delivering = mailbox.delivering.saturating_sub(1);
            }
        }

        let _done = Done(&self.mailbox);
        callback(verdict)
    }
}

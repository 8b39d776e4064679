pub mod bridge;
pub mod config;
pub mod credentials;
pub mod delivery;
pub mod event;
pub mod extract;
pub mod guard;
pub mod pipeline;
pub mod platform;
pub mod poller;
pub mod popup;
pub mod scanner;
pub mod statistics;
pub mod verdict;

pub use bridge::{BridgeMessage, BridgeNotifier, BridgeServer, Outbound};
pub use config::Config;
pub use delivery::{Delivery, DeliveryRouter};
pub use event::{LifecycleState, NotificationEvent};
pub use guard::{Admission, FingerprintGuard};
pub use pipeline::{EventOutcome, InteractionOutcome, Pipeline};
pub use platform::{LogNotifier, PlatformFallback, PlatformNotifier};
pub use poller::{MissedEventPoller, NotificationSource, SpoolSource};
pub use popup::{PopupCallback, PopupRegistry};
pub use scanner::{ScanClient, ScanDispatcher, ScanError};
pub use statistics::{StatEvent, StatisticsCollector};
pub use verdict::{ScanVerdict, ThreatCategory};

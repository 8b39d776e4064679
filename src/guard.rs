use crate::config::{CooldownScope, GuardConfig};
use crate::event::{Fingerprint, NotificationEvent};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Outcome of running an event through the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Empty,
    Duplicate,
    RateLimited,
}

impl Admission {
    pub fn is_admitted(self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

#[derive(Default)]
struct GuardState {
    /// Fingerprint -> expiry.
    active: HashMap<Fingerprint, Instant>,
    last_admitted: Option<Instant>,
    last_by_package: HashMap<String, Instant>,
}

/// Drops duplicate events and events arriving inside the cooldown window.
///
/// The active fingerprint set and the last-admission time are updated under
/// one lock so a check-then-insert can never interleave with another event.
pub struct FingerprintGuard {
    cooldown: Duration,
    retention: Duration,
    scope: CooldownScope,
    state: Mutex<GuardState>,
}

impl FingerprintGuard {
    pub fn new(config: &GuardConfig) -> Self {
        Self {
            cooldown: Duration::from_secs(config.cooldown_seconds),
            retention: Duration::from_secs(config.retention_seconds),
            scope: config.cooldown_scope,
            state: Mutex::new(GuardState::default()),
        }
    }

    pub fn admit(&self, event: &NotificationEvent) -> bool {
        self.check(event).is_admitted()
    }

    pub fn check(&self, event: &NotificationEvent) -> Admission {
        self.check_at(event, Instant::now())
    }

    pub fn check_at(&self, event: &NotificationEvent, now: Instant) -> Admission {
        if !event.has_body() {
            log::debug!("Skipped empty notification from {}", event.package);
            return Admission::Empty;
        }

        let fingerprint = event.fingerprint();
        let mut state = self.state.lock();
        state.active.retain(|_, expiry| *expiry > now);

        if state.active.contains_key(&fingerprint) {
            log::debug!("Duplicate notification skipped: {fingerprint}");
            return Admission::Duplicate;
        }

        let last = match self.scope {
            CooldownScope::Global => state.last_admitted,
            CooldownScope::PerPackage => state.last_by_package.get(&event.package).copied(),
        };
        if let Some(last) = last {
            if now.saturating_duration_since(last) < self.cooldown {
                log::debug!("Rate-limited notification skipped: {fingerprint}");
                return Admission::RateLimited;
            }
        }

        state.active.insert(fingerprint, now + self.retention);
        state.last_admitted = Some(now);
        if self.scope == CooldownScope::PerPackage {
            let cooldown = self.cooldown;
            state
                .last_by_package
                .retain(|_, seen| now.saturating_duration_since(*seen) < cooldown);
            state.last_by_package.insert(event.package.clone(), now);
        }

        Admission::Admitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> FingerprintGuard {
        FingerprintGuard::new(&GuardConfig::default())
    }

    fn event(package: &str, title: &str, text: &str) -> NotificationEvent {
        NotificationEvent::new(package, Some(title), text)
    }

    #[test]
    fn test_empty_body_rejected_without_side_effect() {
        let guard = guard();
        let now = Instant::now();

        assert_eq!(guard.check_at(&event("a", "t", ""), now), Admission::Empty);
        assert_eq!(guard.check_at(&event("a", "t", "   "), now), Admission::Empty);

        let mut missing = event("a", "t", "x");
        missing.text = None;
        assert_eq!(guard.check_at(&missing, now), Admission::Empty);

        // No cooldown was started by the rejected events.
        assert_eq!(guard.check_at(&event("a", "t", "real"), now), Admission::Admitted);
    }

    #[test]
    fn test_identical_events_three_seconds_apart() {
        let guard = guard();
        let t = Instant::now();
        let e = event("a", "Bank", "Verify now http://bit.ly/x");

        assert!(guard.check_at(&e, t).is_admitted());
        assert_eq!(
            guard.check_at(&e, t + Duration::from_secs(3)),
            Admission::Duplicate
        );
    }

    #[test]
    fn test_trimmed_body_counts_as_duplicate() {
        let guard = guard();
        let t = Instant::now();

        assert!(guard.check_at(&event("a", "Bank", "hello"), t).is_admitted());
        assert_eq!(
            guard.check_at(&event("a", "Bank", "  hello \n"), t + Duration::from_secs(11)),
            Admission::Duplicate
        );
    }

    #[test]
    fn test_global_cooldown_ignores_fingerprint() {
        let guard = guard();
        let t = Instant::now();

        assert!(guard.check_at(&event("a", "x", "first"), t).is_admitted());
        assert_eq!(
            guard.check_at(&event("b", "y", "second"), t + Duration::from_secs(9)),
            Admission::RateLimited
        );
        assert!(guard
            .check_at(&event("b", "y", "second"), t + Duration::from_secs(10))
            .is_admitted());
    }

    #[test]
    fn test_rejection_does_not_extend_cooldown() {
        let guard = guard();
        let t = Instant::now();

        assert!(guard.check_at(&event("a", "x", "one"), t).is_admitted());
        assert!(!guard
            .check_at(&event("a", "x", "two"), t + Duration::from_secs(5))
            .is_admitted());
        assert!(guard
            .check_at(&event("a", "x", "three"), t + Duration::from_secs(10))
            .is_admitted());
    }

    #[test]
    fn test_fingerprint_expires_after_retention() {
        let guard = guard();
        let t = Instant::now();
        let e = event("a", "Bank", "same text");

        assert!(guard.check_at(&e, t).is_admitted());
        assert_eq!(
            guard.check_at(&e, t + Duration::from_secs(14)),
            Admission::Duplicate
        );
        assert!(guard.check_at(&e, t + Duration::from_secs(15)).is_admitted());
    }

    #[test]
    fn test_per_package_scope() {
        let config = GuardConfig {
            cooldown_scope: CooldownScope::PerPackage,
            ..GuardConfig::default()
        };
        let guard = FingerprintGuard::new(&config);
        let t = Instant::now();

        assert!(guard.check_at(&event("a", "x", "one"), t).is_admitted());
        assert!(guard
            .check_at(&event("b", "x", "two"), t + Duration::from_secs(1))
            .is_admitted());
        assert_eq!(
            guard.check_at(&event("a", "x", "three"), t + Duration::from_secs(2)),
            Admission::RateLimited
        );
    }
}

use crate::delivery::Delivery;
use crate::guard::Admission;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub received: u64,
    pub admitted: u64,
    pub rejected_empty: u64,
    pub rejected_duplicate: u64,
    pub rejected_rate_limited: u64,
    pub scans_skipped: u64,
    pub scans_failed: u64,
    pub scans_clean: u64,
    pub threats: u64,
    pub delivered_popup: u64,
    pub delivered_pending: u64,
    pub delivered_platform: u64,
    pub delivery_dropped: u64,
    pub reports: u64,
    pub polls: u64,
    pub polled_events: u64,
    pub start_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Default for PipelineStats {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            received: 0,
            admitted: 0,
            rejected_empty: 0,
            rejected_duplicate: 0,
            rejected_rate_limited: 0,
            scans_skipped: 0,
            scans_failed: 0,
            scans_clean: 0,
            threats: 0,
            delivered_popup: 0,
            delivered_pending: 0,
            delivered_platform: 0,
            delivery_dropped: 0,
            reports: 0,
            polls: 0,
            polled_events: 0,
            start_time: now,
            last_updated: now,
        }
    }
}

#[derive(Debug, Clone)]
pub enum StatEvent {
    Received,
    Admission(Admission),
    ScanSkipped,
    ScanFailed,
    ScanClean,
    ThreatDetected,
    Delivered(Delivery),
    Reported,
    PollCompleted { events: usize },
}

#[derive(Default)]
pub struct StatisticsCollector {
    stats: Mutex<PipelineStats>,
}

impl StatisticsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_event(&self, event: StatEvent) {
        let mut stats = self.stats.lock();
        stats.last_updated = Utc::now();

        match event {
            StatEvent::Received => stats.received += 1,
            StatEvent::Admission(admission) => match admission {
                Admission::Admitted => stats.admitted += 1,
                Admission::Empty => stats.rejected_empty += 1,
                Admission::Duplicate => stats.rejected_duplicate += 1,
                Admission::RateLimited => stats.rejected_rate_limited += 1,
            },
            StatEvent::ScanSkipped => stats.scans_skipped += 1,
            StatEvent::ScanFailed => stats.scans_failed += 1,
            StatEvent::ScanClean => stats.scans_clean += 1,
            StatEvent::ThreatDetected => stats.threats += 1,
            StatEvent::Delivered(delivery) => match delivery {
                Delivery::Popup => stats.delivered_popup += 1,
                Delivery::Pending => stats.delivered_pending += 1,
                Delivery::Platform(_) => stats.delivered_platform += 1,
                Delivery::Dropped => stats.delivery_dropped += 1,
            },
            StatEvent::Reported => stats.reports += 1,
            StatEvent::PollCompleted { events } => {
                stats.polls += 1;
                stats.polled_events += events as u64;
            }
        }
    }

    pub fn snapshot(&self) -> PipelineStats {
        self.stats.lock().clone()
    }

    pub fn log_summary(&self) {
        let stats = self.snapshot();
        log::info!(
            "Notifications: {} received, {} admitted ({} empty, {} duplicate, {} rate-limited)",
            stats.received,
            stats.admitted,
            stats.rejected_empty,
            stats.rejected_duplicate,
            stats.rejected_rate_limited
        );
        log::info!(
            "Scans: {} threats, {} clean, {} failed, {} skipped; alerts: {} popup, {} pending, {} platform",
            stats.threats,
            stats.scans_clean,
            stats.scans_failed,
            stats.scans_skipped,
            stats.delivered_popup,
            stats.delivered_pending,
            stats.delivered_platform
        );
    }
}

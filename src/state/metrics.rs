use chrono::Utc;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Width of the live-event rate window (milliseconds)
const RATE_WINDOW_MS: i64 = 5000;

/// Counters for the reconciliation engine
#[derive(Clone, Default)]
pub struct EngineMetrics {
    live_events: Arc<AtomicU64>,
    live_applied: Arc<AtomicU64>,
    malformed_payloads: Arc<AtomicU64>,
    filtered_events: Arc<AtomicU64>,
    unknown_entity_events: Arc<AtomicU64>,
    refresh_requests: Arc<AtomicU64>,
    snapshots_applied: Arc<AtomicU64>,
    fetch_failures: Arc<AtomicU64>,
    stale_fetches: Arc<AtomicU64>,

    /// Arrival times of live events (sliding 5-second window)
    event_timestamps: Arc<RwLock<VecDeque<i64>>>,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a received live payload, well-formed or not
    pub fn record_live_event(&self) {
        self.live_events.fetch_add(1, Ordering::Relaxed);

        let now = Utc::now().timestamp_millis();
        let mut timestamps = self
            .event_timestamps
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        timestamps.push_back(now);

        while let Some(&oldest) = timestamps.front() {
            if now - oldest > RATE_WINDOW_MS {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn record_live_applied(&self) {
        self.live_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed_payloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_filtered(&self) {
        self.filtered_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unknown_entity(&self) {
        self.unknown_entity_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh_request(&self) {
        self.refresh_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot_applied(&self) {
        self.snapshots_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_failure(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_fetch(&self) {
        self.stale_fetches.fetch_add(1, Ordering::Relaxed);
    }

    /// Live events per second over the last 5 seconds
    pub fn live_event_rate(&self) -> f64 {
        let timestamps = self
            .event_timestamps
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        timestamps.len() as f64 / (RATE_WINDOW_MS as f64 / 1000.0)
    }

    pub fn get_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            live_events: self.live_events.load(Ordering::Relaxed),
            live_applied: self.live_applied.load(Ordering::Relaxed),
            malformed_payloads: self.malformed_payloads.load(Ordering::Relaxed),
            filtered_events: self.filtered_events.load(Ordering::Relaxed),
            unknown_entity_events: self.unknown_entity_events.load(Ordering::Relaxed),
            refresh_requests: self.refresh_requests.load(Ordering::Relaxed),
            snapshots_applied: self.snapshots_applied.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            stale_fetches: self.stale_fetches.load(Ordering::Relaxed),
            live_event_rate: self.live_event_rate(),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub live_events: u64,
    pub live_applied: u64,
    pub malformed_payloads: u64,
    pub filtered_events: u64,
    pub unknown_entity_events: u64,
    pub refresh_requests: u64,
    pub snapshots_applied: u64,
    pub fetch_failures: u64,
    pub stale_fetches: u64,
    pub live_event_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_counters() {
        let metrics = EngineMetrics::new();

        metrics.record_live_event();
        metrics.record_live_event();
        metrics.record_malformed();
        metrics.record_live_applied();
        metrics.record_stale_fetch();

        let snapshot = metrics.get_snapshot();
        assert_eq!(snapshot.live_events, 2);
        assert_eq!(snapshot.malformed_payloads, 1);
        assert_eq!(snapshot.live_applied, 1);
        assert_eq!(snapshot.stale_fetches, 1);
        assert_eq!(snapshot.fetch_failures, 0);
    }

    #[test]
    fn test_event_rate_calculation() {
        let metrics = EngineMetrics::new();
        for _ in 0..10 {
            metrics.record_live_event();
        }
        // 10 events / 5s
        assert_eq!(metrics.live_event_rate(), 2.0);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = EngineMetrics::new();
        let clone = metrics.clone();
        clone.record_refresh_request();
        assert_eq!(metrics.get_snapshot().refresh_requests, 1);
    }

    #[test]
    fn test_concurrent_access() {
        let metrics = Arc::new(EngineMetrics::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let metrics_clone = Arc::clone(&metrics);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    metrics_clone.record_live_event();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.get_snapshot().live_events, 1000);
    }
}

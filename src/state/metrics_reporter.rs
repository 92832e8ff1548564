use crate::state::ReconciliationEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

/// Periodically log an engine metrics snapshot.
///
/// Runs until the task is cancelled.
pub async fn run_metrics_reporter(engine: Arc<ReconciliationEngine>, interval_seconds: u64) {
    let mut ticker = interval(Duration::from_secs(interval_seconds.max(1)));

    // Skip missed ticks to prevent backlog under load
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // First tick completes immediately; nothing to report yet
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let snapshot = engine.metrics().get_snapshot();
        info!(
            entities = engine.entity_count(),
            phase = ?engine.phase(),
            live_events = snapshot.live_events,
            live_applied = snapshot.live_applied,
            malformed = snapshot.malformed_payloads,
            filtered = snapshot.filtered_events,
            unknown_entity = snapshot.unknown_entity_events,
            refresh_requests = snapshot.refresh_requests,
            snapshots_applied = snapshot.snapshots_applied,
            fetch_failures = snapshot.fetch_failures,
            stale_fetches = snapshot.stale_fetches,
            live_rate = snapshot.live_event_rate,
            "Engine metrics"
        );
    }
}

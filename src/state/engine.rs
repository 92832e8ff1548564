use crate::api::{is_retryable, HistoryClient};
use crate::config::HerdConfig;
use crate::error::EngineError;
use crate::event::{parse_live_event, Sample, TRACKED_METRICS};
use crate::nats::MessageHandler;
use crate::state::diff::{diff, ChangeSet};
use crate::state::entity::{EntityId, EntityRecord, EntitySnapshot, EntityView};
use crate::state::metrics::EngineMetrics;
use crate::state::store::EntityStateStore;
use crate::state::window::DEFAULT_WINDOW_CAPACITY;
use futures::{Stream, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, warn};

/// Which live events a view accepts
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ViewScope {
    /// Every entity (list screen)
    List,
    /// Only the focused entity (detail screen); refresh also loads its history
    Detail(EntityId),
}

/// Load state of the entity-list view
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnginePhase {
    Idle,
    Loading,
    Ready,
}

/// Sequence number handed out per fetch request; newer requests win
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct FetchTicket(u64);

impl FetchTicket {
    pub fn sequence(&self) -> u64 {
        self.0
    }
}

/// What happened to one live payload that parsed successfully
#[derive(Clone, Debug, PartialEq)]
pub enum LiveOutcome {
    /// Sample applied; the change set may be empty if nothing visible changed
    Applied(ChangeSet),
    /// Addressed to an entity outside this view's focus
    Filtered,
    /// Entity not in the store yet; `refresh_requested` is false when a
    /// refresh was already pending or already requested for this id
    UnknownEntity { refresh_requested: bool },
}

/// Engine tuning derived from [`HerdConfig`]
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub window_capacity: usize,
    pub prune_missing: bool,
    pub refresh_interval_seconds: u64,
    pub retry_delays_seconds: Vec<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            prune_missing: false,
            refresh_interval_seconds: 30,
            retry_delays_seconds: vec![2, 5, 10],
        }
    }
}

impl From<&HerdConfig> for EngineConfig {
    fn from(config: &HerdConfig) -> Self {
        Self {
            window_capacity: config.window.capacity,
            prune_missing: config.refresh.prune_missing,
            refresh_interval_seconds: config.refresh.interval_seconds,
            retry_delays_seconds: config.refresh.retry_delays_seconds.clone(),
        }
    }
}

/// Everything mutated by reconciliation, guarded by one mutex so a record's
/// attributes, its windows and the displayed list change together.
struct EngineState {
    phase: EnginePhase,
    store: EntityStateStore,
    /// Last list handed to the display layer, in display order
    displayed: Vec<EntityView>,
    displayed_index: HashMap<EntityId, usize>,
    /// Ticket of the most recently applied fetch result
    applied_sequence: u64,
    /// Unknown ids that already triggered a refresh; cleared once a
    /// snapshot lists them
    requested_unknown: HashSet<EntityId>,
}

impl EngineState {
    /// Re-diff the whole list against what was last displayed
    fn reconcile_all(&mut self) -> ChangeSet {
        let next = self.store.views();
        let changes = diff(&self.displayed, &next);
        self.displayed_index = next
            .iter()
            .enumerate()
            .map(|(position, view)| (view.id.clone(), position))
            .collect();
        self.displayed = next;
        changes
    }

    /// Diff a single entity in place; falls back to a full pass when the
    /// entity is not on display yet
    fn reconcile_one(&mut self, id: &str) -> ChangeSet {
        let view = match self.store.get(id) {
            Some(record) => record.view(),
            None => return self.reconcile_all(),
        };
        match self.displayed_index.get(id).copied() {
            Some(position) => {
                let changes = diff(
                    std::slice::from_ref(&self.displayed[position]),
                    std::slice::from_ref(&view),
                );
                self.displayed[position] = view;
                changes
            }
            None => self.reconcile_all(),
        }
    }
}

/// Merges list snapshots, history and live samples into one bounded state
/// per entity and emits minimal change sets to the display layer.
pub struct ReconciliationEngine {
    client: Arc<dyn HistoryClient>,
    scope: ViewScope,
    config: EngineConfig,
    state: Mutex<EngineState>,
    next_sequence: AtomicU64,
    refresh_pending: AtomicBool,
    refresh_notify: Notify,
    changes_tx: broadcast::Sender<ChangeSet>,
    errors_tx: broadcast::Sender<EngineError>,
    metrics: EngineMetrics,
}

impl ReconciliationEngine {
    pub fn new(client: Arc<dyn HistoryClient>, scope: ViewScope, config: EngineConfig) -> Self {
        let (changes_tx, _) = broadcast::channel(1000);
        let (errors_tx, _) = broadcast::channel(100);

        Self {
            client,
            scope,
            state: Mutex::new(EngineState {
                phase: EnginePhase::Idle,
                store: EntityStateStore::new(config.window_capacity),
                displayed: Vec::new(),
                displayed_index: HashMap::new(),
                applied_sequence: 0,
                requested_unknown: HashSet::new(),
            }),
            config,
            next_sequence: AtomicU64::new(0),
            refresh_pending: AtomicBool::new(false),
            refresh_notify: Notify::new(),
            changes_tx,
            errors_tx,
            metrics: EngineMetrics::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start a fetch: enter `Loading` and hand out a fresh ticket
    pub fn begin_fetch(&self) -> FetchTicket {
        let ticket = FetchTicket(self.next_sequence.fetch_add(1, Ordering::SeqCst) + 1);
        self.lock().phase = EnginePhase::Loading;
        debug!(sequence = ticket.0, "Fetch started");
        ticket
    }

    /// Apply a fetched list snapshot and emit the resulting change set.
    ///
    /// Returns `None` when a newer fetch has already been applied; the stale
    /// result is discarded.
    pub fn on_snapshot_loaded(
        &self,
        ticket: FetchTicket,
        entities: Vec<EntitySnapshot>,
    ) -> Option<ChangeSet> {
        let mut state = self.lock();
        if ticket.0 < state.applied_sequence {
            self.metrics.record_stale_fetch();
            debug!(
                sequence = ticket.0,
                applied = state.applied_sequence,
                "Discarding stale snapshot"
            );
            return None;
        }
        state.applied_sequence = ticket.0;

        let stats = state
            .store
            .apply_snapshot(entities, self.config.prune_missing);
        state.phase = EnginePhase::Ready;
        let EngineState {
            store,
            requested_unknown,
            ..
        } = &mut *state;
        requested_unknown.retain(|id| !store.contains(id));
        let changes = state.reconcile_all();

        self.metrics.record_snapshot_applied();
        info!(
            sequence = ticket.0,
            created = stats.created,
            refreshed = stats.refreshed,
            pruned = stats.pruned,
            inserted = changes.inserted.len(),
            updated = changes.updated.len(),
            removed = changes.removed.len(),
            "Snapshot applied"
        );

        // Sent under the lock so subscribers see change sets in cycle order
        let _ = self.changes_tx.send(changes.clone());
        Some(changes)
    }

    /// Seed one chart window from fetched history.
    ///
    /// Only the window changes; the displayed attribute list does not.
    /// Returns false when the entity is unknown.
    pub fn on_history_loaded(&self, entity_id: &str, metric: &str, samples: Vec<Sample>) -> bool {
        let count = samples.len();
        let seeded = self.lock().store.seed_history(entity_id, metric, samples);
        if seeded {
            debug!(entity_id = %entity_id, metric = %metric, samples = count, "History seeded");
        } else {
            warn!(entity_id = %entity_id, metric = %metric, "History for unknown entity ignored");
        }
        seeded
    }

    /// Handle one raw payload from the push channel.
    ///
    /// Malformed payloads are dropped and counted without touching state.
    /// Events for unknown entities never create records. The first event for
    /// such an id requests a snapshot refresh (coalesced while one is
    /// pending) and reports `UnknownEntityLiveUpdate`; repeats stay quiet
    /// until a snapshot lists the id. Periodic refreshes still pick it up.
    pub fn on_live_event(&self, raw: &str) -> Result<LiveOutcome, EngineError> {
        self.metrics.record_live_event();

        let event = match parse_live_event(raw) {
            Ok(event) => event,
            Err(e) => {
                self.metrics.record_malformed();
                warn!(error = %e, "Dropping malformed live payload");
                return Err(EngineError::MalformedPayload(e));
            }
        };

        if let ViewScope::Detail(focus) = &self.scope {
            if *focus != event.entity_id {
                self.metrics.record_filtered();
                return Ok(LiveOutcome::Filtered);
            }
        }

        let first_sighting = {
            let mut state = self.lock();
            if state.store.apply_live_sample(&event.entity_id, &event.sample) {
                let changes = state.reconcile_one(&event.entity_id);
                self.metrics.record_live_applied();
                if !changes.is_empty() {
                    let _ = self.changes_tx.send(changes.clone());
                }
                return Ok(LiveOutcome::Applied(changes));
            }
            state.requested_unknown.insert(event.entity_id.clone())
        };

        self.metrics.record_unknown_entity();
        // One refresh per unknown id until a snapshot lists it
        let refresh_requested = first_sighting && self.request_refresh();
        if first_sighting {
            self.report_error(EngineError::UnknownEntityLiveUpdate {
                entity_id: event.entity_id.clone(),
            });
        }
        info!(
            entity_id = %event.entity_id,
            refresh_requested = refresh_requested,
            "Live update for unknown entity"
        );
        Ok(LiveOutcome::UnknownEntity { refresh_requested })
    }

    /// Record a failed fetch: back to `Idle`, state kept, error surfaced.
    ///
    /// Failures of superseded requests are ignored.
    pub fn on_fetch_failed(&self, ticket: FetchTicket, error: anyhow::Error) -> EngineError {
        let failure = EngineError::FetchFailed {
            message: format!("{:#}", error),
            retryable: is_retryable(&error),
        };

        let mut state = self.lock();
        if ticket.0 < state.applied_sequence {
            self.metrics.record_stale_fetch();
            debug!(sequence = ticket.0, error = %failure, "Ignoring failure of stale fetch");
            return failure;
        }
        state.phase = EnginePhase::Idle;
        drop(state);

        self.metrics.record_fetch_failure();
        error!(sequence = ticket.0, error = %failure, "Fetch failed, keeping last known state");
        self.report_error(failure.clone());
        failure
    }

    /// Ask the refresh loop for a snapshot.
    ///
    /// Returns false when a request is already pending.
    pub fn request_refresh(&self) -> bool {
        if self.refresh_pending.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.metrics.record_refresh_request();
        self.refresh_notify.notify_one();
        true
    }

    pub fn refresh_pending(&self) -> bool {
        self.refresh_pending.load(Ordering::SeqCst)
    }

    /// Run one fetch cycle: list snapshot, then history for a detail view
    pub async fn refresh(&self) -> Result<ChangeSet, EngineError> {
        self.refresh_pending.store(false, Ordering::SeqCst);
        let ticket = self.begin_fetch();

        let entities = match self.client.fetch_snapshot().await {
            Ok(entities) => entities,
            Err(e) => return Err(self.on_fetch_failed(ticket, e)),
        };
        let changes = match self.on_snapshot_loaded(ticket, entities) {
            Some(changes) => changes,
            None => return Ok(ChangeSet::default()),
        };

        if let ViewScope::Detail(focus) = &self.scope {
            let history = match self.client.fetch_history(focus).await {
                Ok(history) => history,
                Err(e) => return Err(self.on_fetch_failed(ticket, e)),
            };
            if self.is_stale(ticket) {
                self.metrics.record_stale_fetch();
                return Ok(changes);
            }
            for metric in TRACKED_METRICS {
                self.on_history_loaded(focus, metric, history.clone());
            }
        }

        Ok(changes)
    }

    /// Refresh, retrying retryable failures with the configured delays
    pub async fn refresh_with_retry(&self) -> Result<ChangeSet, EngineError> {
        let delays = &self.config.retry_delays_seconds;
        let mut attempt = 0;

        loop {
            match self.refresh().await {
                Ok(changes) => return Ok(changes),
                Err(e) if !e.is_retryable() || attempt >= delays.len() => return Err(e),
                Err(e) => {
                    let delay_secs = delays[attempt];
                    attempt += 1;
                    warn!(
                        attempt = attempt,
                        max_retries = delays.len(),
                        delay_secs = delay_secs,
                        error = %e,
                        "Refresh failed, will retry"
                    );
                    tokio::time::sleep(Duration::from_secs(delay_secs)).await;
                }
            }
        }
    }

    /// Drive refreshes: an initial load, then periodic snapshots and
    /// on-demand requests (unknown entities, manual pulls).
    ///
    /// Runs until the task is cancelled.
    pub async fn run_refresh_loop(self: Arc<Self>) {
        let mut ticker = if self.config.refresh_interval_seconds > 0 {
            let mut ticker = interval(Duration::from_secs(self.config.refresh_interval_seconds));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick completes immediately; the initial load covers it
            ticker.tick().await;
            Some(ticker)
        } else {
            None
        };

        info!(
            interval_secs = self.config.refresh_interval_seconds,
            scope = ?self.scope,
            "Starting refresh loop"
        );

        loop {
            if let Err(e) = self.refresh_with_retry().await {
                error!(error = %e, "Refresh gave up");
            }

            tokio::select! {
                _ = self.refresh_notify.notified() => {
                    debug!("Refresh requested");
                }
                _ = next_tick(&mut ticker) => {
                    debug!("Periodic refresh");
                }
            }
        }
    }

    /// Handler for [`crate::nats::PushChannelManager::subscribe`]
    pub fn live_handler(self: &Arc<Self>) -> MessageHandler {
        let engine = Arc::clone(self);
        Arc::new(move |payload: String| {
            // Outcome already logged and counted
            let _ = engine.on_live_event(&payload);
        })
    }

    /// Forward an error to the display layer
    pub fn report_error(&self, error: EngineError) {
        let _ = self.errors_tx.send(error);
    }

    fn is_stale(&self, ticket: FetchTicket) -> bool {
        ticket.0 < self.lock().applied_sequence
    }

    /// Ordered read-only copy of every record
    pub fn current_entities(&self) -> Vec<EntityRecord> {
        self.lock().store.snapshot_for_display()
    }

    /// Chart window for one entity metric, oldest first (empty if unknown)
    pub fn window_for(&self, entity_id: &str, metric: &str) -> Vec<Sample> {
        self.lock()
            .store
            .window_for(entity_id, metric)
            .unwrap_or_default()
    }

    /// Subscribe to change sets, one per reconciliation cycle
    pub fn subscribe_changes(&self) -> broadcast::Receiver<ChangeSet> {
        self.changes_tx.subscribe()
    }

    /// Change sets as a stream starting from the moment of the call.
    ///
    /// A consumer that falls behind skips the lost change sets and should
    /// re-read [`Self::current_entities`].
    pub fn change_stream(&self) -> impl Stream<Item = ChangeSet> + Send + 'static {
        BroadcastStream::new(self.changes_tx.subscribe()).filter_map(|result| async move {
            match result {
                Ok(changes) => Some(changes),
                Err(e) => {
                    warn!(error = %e, "Change stream lagged");
                    None
                }
            }
        })
    }

    /// Subscribe to fetch and connection errors
    pub fn subscribe_errors(&self) -> broadcast::Receiver<EngineError> {
        self.errors_tx.subscribe()
    }

    pub fn phase(&self) -> EnginePhase {
        self.lock().phase
    }

    pub fn entity_count(&self) -> usize {
        self.lock().store.len()
    }

    pub fn scope(&self) -> &ViewScope {
        &self.scope
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

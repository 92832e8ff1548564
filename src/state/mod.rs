// Reconciled entity state: windows, store, differ and engine

pub mod diff;
mod engine;
mod entity;
mod metrics;
mod metrics_reporter;
mod store;
mod window;

pub use diff::{diff, ChangeSet, Keyed};
pub use engine::{
    EngineConfig, EnginePhase, FetchTicket, LiveOutcome, ReconciliationEngine, ViewScope,
};
pub use entity::{EntityId, EntityRecord, EntitySnapshot, EntityView};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use metrics_reporter::run_metrics_reporter;
pub use store::{EntityStateStore, SnapshotStats};
pub use window::{SampleWindow, DEFAULT_WINDOW_CAPACITY};

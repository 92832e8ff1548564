use crate::event::Sample;
use crate::state::window::SampleWindow;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opaque identifier joining snapshot and live data for one animal
pub type EntityId = String;

/// Authoritative attributes of one entity from a list snapshot (no history)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub attributes: BTreeMap<String, f64>,
    pub last_updated: Option<String>,
}

/// Reconciled state of one tracked entity.
///
/// `latest_attributes` mirrors the newest sample of each window once live
/// samples have been applied. Only the engine mutates records.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityRecord {
    pub id: EntityId,
    pub latest_attributes: BTreeMap<String, f64>,
    pub last_updated: Option<String>,
    pub windows: BTreeMap<String, SampleWindow>,
}

impl EntityRecord {
    /// New record seeded from snapshot attributes, with empty windows
    pub fn from_snapshot(snapshot: EntitySnapshot, window_capacity: usize) -> Self {
        let windows = snapshot
            .attributes
            .keys()
            .map(|metric| (metric.clone(), SampleWindow::new(window_capacity)))
            .collect();

        Self {
            id: snapshot.id,
            latest_attributes: snapshot.attributes,
            last_updated: snapshot.last_updated,
            windows,
        }
    }

    /// Push a live sample into every metric window it carries and refresh
    /// the matching attributes, as one unit.
    pub fn apply_sample(&mut self, sample: &Sample, window_capacity: usize) {
        for (metric, value) in &sample.values {
            self.windows
                .entry(metric.clone())
                .or_insert_with(|| SampleWindow::new(window_capacity))
                .push(sample.clone());
            self.latest_attributes.insert(metric.clone(), *value);
        }
        self.last_updated = Some(sample.timestamp.clone());
    }

    /// Samples for `metric`, oldest first (empty when never observed)
    pub fn window(&self, metric: &str) -> Vec<Sample> {
        self.windows
            .get(metric)
            .map(SampleWindow::as_sequence)
            .unwrap_or_default()
    }

    /// Fields shown by the list display
    pub fn view(&self) -> EntityView {
        EntityView {
            id: self.id.clone(),
            attributes: self.latest_attributes.clone(),
            last_updated: self.last_updated.clone(),
        }
    }
}

/// Display record: what the list view renders for one entity.
///
/// Equality is content equality across every displayed field.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EntityView {
    pub id: EntityId,
    pub attributes: BTreeMap<String, f64>,
    pub last_updated: Option<String>,
}

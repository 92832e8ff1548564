use crate::event::Sample;
use crate::state::entity::{EntityId, EntityRecord, EntitySnapshot, EntityView};
use crate::state::window::{SampleWindow, DEFAULT_WINDOW_CAPACITY};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Counts from one snapshot application
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SnapshotStats {
    pub created: usize,
    pub refreshed: usize,
    pub pruned: usize,
    pub duplicates: usize,
}

/// In-memory entity state: id -> record, plus the display order.
///
/// Display order is the order of the last applied snapshot, followed by
/// retained entities that snapshot did not mention (in their previous order).
/// The store is not synchronized itself; the engine owns it behind a mutex.
#[derive(Debug)]
pub struct EntityStateStore {
    records: HashMap<EntityId, EntityRecord>,
    order: Vec<EntityId>,
    window_capacity: usize,
}

impl EntityStateStore {
    pub fn new(window_capacity: usize) -> Self {
        Self {
            records: HashMap::new(),
            order: Vec::new(),
            window_capacity: window_capacity.max(1),
        }
    }

    /// Apply a full attribute snapshot.
    ///
    /// Unknown entities get a fresh record with empty windows; known entities
    /// have attributes and `last_updated` refreshed while their windows are
    /// left untouched. Entities missing from the snapshot are dropped only
    /// when `prune_missing` is set.
    pub fn apply_snapshot(
        &mut self,
        entities: Vec<EntitySnapshot>,
        prune_missing: bool,
    ) -> SnapshotStats {
        let mut stats = SnapshotStats::default();
        let mut seen: HashSet<EntityId> = HashSet::with_capacity(entities.len());
        let mut new_order: Vec<EntityId> = Vec::with_capacity(entities.len());

        for snapshot in entities {
            if !seen.insert(snapshot.id.clone()) {
                // Last occurrence wins; position stays at the first occurrence
                warn!(entity_id = %snapshot.id, "Duplicate entity id in snapshot");
                stats.duplicates += 1;
            } else {
                new_order.push(snapshot.id.clone());
            }

            match self.records.get_mut(&snapshot.id) {
                Some(record) => {
                    record.latest_attributes.extend(snapshot.attributes);
                    if snapshot.last_updated.is_some() {
                        record.last_updated = snapshot.last_updated;
                    }
                    stats.refreshed += 1;
                }
                None => {
                    debug!(entity_id = %snapshot.id, "New entity from snapshot");
                    let record = EntityRecord::from_snapshot(snapshot, self.window_capacity);
                    self.records.insert(record.id.clone(), record);
                    stats.created += 1;
                }
            }
        }

        for id in std::mem::take(&mut self.order) {
            if seen.contains(&id) {
                continue;
            }
            if prune_missing {
                self.records.remove(&id);
                stats.pruned += 1;
            } else {
                new_order.push(id);
            }
        }
        self.order = new_order;

        stats
    }

    /// Apply one live sample to a known entity.
    ///
    /// Returns false without touching state when the entity is unknown; a
    /// live update alone has no baseline to build a record from.
    pub fn apply_live_sample(&mut self, id: &str, sample: &Sample) -> bool {
        match self.records.get_mut(id) {
            Some(record) => {
                record.apply_sample(sample, self.window_capacity);
                true
            }
            None => false,
        }
    }

    /// Initialise one metric window from fetched history (last N kept).
    ///
    /// Returns false when the entity is unknown.
    pub fn seed_history(&mut self, id: &str, metric: &str, samples: Vec<Sample>) -> bool {
        let capacity = self.window_capacity;
        match self.records.get_mut(id) {
            Some(record) => {
                record
                    .windows
                    .entry(metric.to_string())
                    .or_insert_with(|| SampleWindow::new(capacity))
                    .replace_all(samples);
                true
            }
            None => false,
        }
    }

    /// Ordered, owned copy of every record
    pub fn snapshot_for_display(&self) -> Vec<EntityRecord> {
        self.ordered().cloned().collect()
    }

    /// Ordered display records for diffing
    pub fn views(&self) -> Vec<EntityView> {
        self.ordered().map(EntityRecord::view).collect()
    }

    pub fn get(&self, id: &str) -> Option<&EntityRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Window contents for one entity metric; `None` for unknown entities
    pub fn window_for(&self, id: &str, metric: &str) -> Option<Vec<Sample>> {
        self.records.get(id).map(|record| record.window(metric))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn window_capacity(&self) -> usize {
        self.window_capacity
    }

    fn ordered(&self) -> impl Iterator<Item = &EntityRecord> {
        self.order.iter().filter_map(|id| self.records.get(id))
    }
}

impl Default for EntityStateStore {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}

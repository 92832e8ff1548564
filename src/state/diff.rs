use crate::state::entity::{EntityId, EntityView};
use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

/// Anything with a stable identity that the differ can match on
pub trait Keyed {
    fn key(&self) -> &str;
}

impl Keyed for EntityView {
    fn key(&self) -> &str {
        &self.id
    }
}

/// Minimal delta between two displayed lists.
///
/// `inserted` and `updated` follow the new list's order, `removed` follows
/// the previous list's order. Unchanged entities are omitted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    pub inserted: Vec<EntityId>,
    pub updated: Vec<EntityId>,
    pub removed: Vec<EntityId>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// Total number of operations
    pub fn len(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.removed.len()
    }
}

/// Compute the change set between `previous` and `next` in O(|previous| + |next|).
///
/// Identity is by key only; content is compared with `PartialEq` across all
/// fields. Duplicate keys within one list are a data-integrity violation:
/// they are logged and the last occurrence wins.
pub fn diff<T: Keyed + PartialEq>(previous: &[T], next: &[T]) -> ChangeSet {
    let old_index = index_by_key(previous, "previous");
    let new_index = index_by_key(next, "next");

    let mut changes = ChangeSet::default();

    for (position, item) in next.iter().enumerate() {
        let key = item.key();
        if new_index.get(key).map(|(last, _)| *last) != Some(position) {
            continue;
        }
        match old_index.get(key) {
            None => changes.inserted.push(key.to_string()),
            Some((_, old)) if *old != item => changes.updated.push(key.to_string()),
            Some(_) => {}
        }
    }

    for (position, item) in previous.iter().enumerate() {
        let key = item.key();
        if old_index.get(key).map(|(last, _)| *last) != Some(position) {
            continue;
        }
        if !new_index.contains_key(key) {
            changes.removed.push(key.to_string());
        }
    }

    changes
}

/// key -> (position of last occurrence, item)
fn index_by_key<'a, T: Keyed>(items: &'a [T], label: &str) -> HashMap<&'a str, (usize, &'a T)> {
    let mut index = HashMap::with_capacity(items.len());
    for (position, item) in items.iter().enumerate() {
        if index.insert(item.key(), (position, item)).is_some() {
            warn!(key = %item.key(), list = label, "Duplicate id in diff input, last occurrence wins");
        }
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn view(id: &str, temp: f64) -> EntityView {
        let mut attributes = BTreeMap::new();
        attributes.insert("temperature".to_string(), temp);
        EntityView {
            id: id.to_string(),
            attributes,
            last_updated: None,
        }
    }

    #[test]
    fn test_first_load_is_all_insert() {
        let next = vec![view("a", 1.0), view("b", 2.0)];
        let changes = diff(&[], &next);

        assert_eq!(changes.inserted, vec!["a", "b"]);
        assert!(changes.updated.is_empty());
        assert!(changes.removed.is_empty());
    }

    #[test]
    fn test_diff_against_itself_is_empty() {
        let list = vec![view("a", 1.0), view("b", 2.0), view("c", 3.0)];
        assert!(diff(&list, &list).is_empty());
    }

    #[test]
    fn test_insert_update_remove() {
        let previous = vec![view("a", 1.0), view("b", 2.0), view("c", 3.0)];
        let next = vec![view("d", 4.0), view("b", 2.5), view("a", 1.0)];

        let changes = diff(&previous, &next);
        assert_eq!(changes.inserted, vec!["d"]);
        assert_eq!(changes.updated, vec!["b"]);
        assert_eq!(changes.removed, vec!["c"]);
        assert_eq!(changes.len(), 3);
    }

    #[test]
    fn test_reorder_alone_is_not_an_update() {
        let previous = vec![view("a", 1.0), view("b", 2.0)];
        let next = vec![view("b", 2.0), view("a", 1.0)];
        assert!(diff(&previous, &next).is_empty());
    }

    #[test]
    fn test_timestamp_change_is_an_update() {
        let previous = vec![view("a", 1.0)];
        let mut changed = view("a", 1.0);
        changed.last_updated = Some("Live".to_string());

        assert_eq!(diff(&previous, &[changed]).updated, vec!["a"]);
    }

    #[test]
    fn test_duplicate_ids_last_occurrence_wins() {
        let previous = vec![view("a", 1.0)];
        let next = vec![view("a", 1.0), view("b", 2.0), view("a", 9.0)];

        let changes = diff(&previous, &next);
        assert_eq!(changes.updated, vec!["a"]);
        assert_eq!(changes.inserted, vec!["b"]);
    }

    #[test]
    fn test_everything_removed() {
        let previous = vec![view("a", 1.0), view("b", 2.0)];
        let changes = diff(&previous, &[]);
        assert_eq!(changes.removed, vec!["a", "b"]);
    }
}

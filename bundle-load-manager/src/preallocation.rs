use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;

/// Global bundle -> broker table of tentative assignments.
///
/// At most one entry exists per bundle, so a bundle never has two pending destinations.
#[derive(Debug, Clone, Default)]
pub struct PreallocationTable {
    entries: Arc<DashMap<String, String>>,
}

impl PreallocationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, bundle: &str) -> Option<String> {
        self.entries.get(bundle).map(|broker| broker.value().clone())
    }

    /// Records `broker` for `bundle` unless an entry already exists; returns the entry in force.
    pub fn insert_if_absent(&self, bundle: &str, broker: &str) -> String {
        self.entries
            .entry(bundle.to_string())
            .or_insert_with(|| broker.to_string())
            .value()
            .clone()
    }

    pub fn remove(&self, bundle: &str) -> Option<String> {
        self.entries.remove(bundle).map(|(_, broker)| broker)
    }

    /// Drops every entry pointing at a broker outside `live`; returns the purged bundles.
    pub fn purge_brokers_not_in(&self, live: &HashSet<String>) -> Vec<String> {
        let mut purged = Vec::new();
        self.entries.retain(|bundle, broker| {
            let keep = live.contains(broker.as_str());
            if !keep {
                purged.push(bundle.clone());
            }
            keep
        });
        purged
    }

    /// Drops every entry pointing at `broker`.
    pub fn purge_broker(&self, broker: &str) -> Vec<String> {
        let mut purged = Vec::new();
        self.entries.retain(|bundle, owner| {
            let keep = owner.as_str() != broker;
            if !keep {
                purged.push(bundle.clone());
            }
            keep
        });
        purged
    }

    /// Keeps the entries for which `keep(bundle, broker)` holds; returns the dropped bundles.
    pub fn retain(&self, mut keep: impl FnMut(&str, &str) -> bool) -> Vec<String> {
        let mut dropped = Vec::new();
        self.entries.retain(|bundle, broker| {
            let kept = keep(bundle, broker);
            if !kept {
                dropped.push(bundle.clone());
            }
            kept
        });
        dropped
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retain_reports_dropped_bundles() {
        let table = PreallocationTable::new();
        table.insert_if_absent("ns/a", "x");
        table.insert_if_absent("ns/b", "y");
        let dropped = table.retain(|_, broker| broker != "x");
        assert_eq!(dropped, vec!["ns/a".to_string()]);
        assert_eq!(table.get("ns/b").as_deref(), Some("y"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_first_insert_wins() {
        let table = PreallocationTable::new();
        assert_eq!(table.insert_if_absent("ns/b1", "x"), "x");
        assert_eq!(table.insert_if_absent("ns/b1", "y"), "x");
        assert_eq!(table.get("ns/b1").as_deref(), Some("x"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_purge_dead_brokers() {
        let table = PreallocationTable::new();
        table.insert_if_absent("ns/b1", "x");
        table.insert_if_absent("ns/b2", "y");
        let live: HashSet<String> = ["y".to_string()].into_iter().collect();

        assert_eq!(table.purge_brokers_not_in(&live), vec!["ns/b1".to_string()]);
        assert!(table.get("ns/b1").is_none());
        assert_eq!(table.purge_broker("y"), vec!["ns/b2".to_string()]);
        assert!(table.is_empty());
    }
}

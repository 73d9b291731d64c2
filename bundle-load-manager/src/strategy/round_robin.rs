use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::PlacementStrategy;
use crate::bundle_data::BundleData;
use crate::config::LoadManagerConfig;
use crate::load_data::LoadData;

/// Cycles through the sorted candidate set.
#[derive(Debug, Default)]
pub struct RoundRobinBrokerSelector {
    next: AtomicUsize,
}

impl RoundRobinBrokerSelector {
    pub const NAME: &'static str = "round_robin";

    pub fn new() -> Self {
        Self::default()
    }
}

impl PlacementStrategy for RoundRobinBrokerSelector {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn select_broker(
        &self,
        candidates: &HashSet<String>,
        _bundle: &str,
        _bundle_data: &BundleData,
        _load_data: &LoadData,
        _conf: &LoadManagerConfig,
    ) -> Option<String> {
        if candidates.is_empty() {
            return None;
        }
        let mut sorted: Vec<&String> = candidates.iter().collect();
        sorted.sort();
        let index = self.next.fetch_add(1, Ordering::Relaxed) % sorted.len();
        Some(sorted[index].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle_data::default_bundle_stats;

    #[test]
    fn test_cycles_through_candidates() {
        let selector = RoundRobinBrokerSelector::new();
        let candidates: HashSet<String> = ["b2", "b1", "b3"].iter().map(|b| b.to_string()).collect();
        let data = BundleData::with_default_windows(&default_bundle_stats());
        let conf = LoadManagerConfig::default();
        let load_data = LoadData::new();

        let picks: Vec<String> = (0..4)
            .filter_map(|_| selector.select_broker(&candidates, "ns/x", &data, &load_data, &conf))
            .collect();
        assert_eq!(picks, vec!["b1", "b2", "b3", "b1"]);
        assert!(selector
            .select_broker(&HashSet::new(), "ns/x", &data, &load_data, &conf)
            .is_none());
    }
}

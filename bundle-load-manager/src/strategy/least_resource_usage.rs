use dashmap::DashMap;
use std::collections::HashSet;

use tracing::debug;

use super::{choose_random, smoothed_usage, PlacementStrategy};
use crate::bundle_data::BundleData;
use crate::config::LoadManagerConfig;
use crate::load_data::LoadData;

/// Places bundles on brokers whose smoothed weighted usage sits clearly below the
/// candidate average, falling back to the least used broker.
#[derive(Debug, Default)]
pub struct LeastResourceUsageWithWeight {
    broker_avg_usage: DashMap<String, f64>,
}

impl LeastResourceUsageWithWeight {
    pub const NAME: &'static str = "least_resource_usage_with_weight";

    pub fn new() -> Self {
        Self::default()
    }

    fn update_and_get_usage(&self, broker: &str, load_data: &LoadData, conf: &LoadManagerConfig) -> f64 {
        let current = load_data
            .broker(broker)
            .map(|data| {
                data.local_data
                    .max_resource_usage_with_weight(&conf.resource_weights)
            })
            .unwrap_or(0.0);
        let previous = self.broker_avg_usage.get(broker).map(|usage| *usage);
        let usage = smoothed_usage(previous, current, conf.history_resource_percentage);
        self.broker_avg_usage.insert(broker.to_string(), usage);
        usage
    }
}

impl PlacementStrategy for LeastResourceUsageWithWeight {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn select_broker(
        &self,
        candidates: &HashSet<String>,
        bundle: &str,
        _bundle_data: &BundleData,
        load_data: &LoadData,
        conf: &LoadManagerConfig,
    ) -> Option<String> {
        if candidates.is_empty() {
            return None;
        }

        let usages: Vec<(String, f64)> = candidates
            .iter()
            .map(|broker| (broker.clone(), self.update_and_get_usage(broker, load_data, conf)))
            .collect();
        let avg_usage = usages.iter().map(|(_, usage)| usage).sum::<f64>() / usages.len() as f64;
        let diff_threshold = conf.least_resource_usage_diff_percentage / 100.0;

        let best_brokers: Vec<String> = usages
            .iter()
            .filter(|(_, usage)| usage + diff_threshold <= avg_usage)
            .map(|(broker, _)| broker.clone())
            .collect();

        if best_brokers.is_empty() {
            debug!(bundle = %bundle, avg_usage, "brokers have similar usage, picking the least used");
            return usages
                .into_iter()
                .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)))
                .map(|(broker, _)| broker);
        }
        choose_random(&best_brokers)
    }

    fn on_active_brokers_change(&self, active_brokers: &HashSet<String>) {
        self.broker_avg_usage
            .retain(|broker, _| active_brokers.contains(broker));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle_data::default_bundle_stats;
    use crate::strategy::test_support::add_broker;

    #[test]
    fn test_picks_clearly_underused_broker() {
        let mut load_data = LoadData::new();
        add_broker(&mut load_data, "b1", 80.0, &[]);
        add_broker(&mut load_data, "b2", 70.0, &[]);
        add_broker(&mut load_data, "b3", 10.0, &[]);

        let strategy = LeastResourceUsageWithWeight::new();
        let candidates: HashSet<String> =
            ["b1", "b2", "b3"].iter().map(|b| b.to_string()).collect();
        let data = BundleData::with_default_windows(&default_bundle_stats());
        let selected =
            strategy.select_broker(&candidates, "ns/x", &data, &load_data, &LoadManagerConfig::default());
        assert_eq!(selected, Some("b3".to_string()));
    }

    #[test]
    fn test_similar_usage_picks_least_used() {
        let mut load_data = LoadData::new();
        add_broker(&mut load_data, "b1", 50.0, &[]);
        add_broker(&mut load_data, "b2", 49.0, &[]);

        let strategy = LeastResourceUsageWithWeight::new();
        let candidates: HashSet<String> = ["b1", "b2"].iter().map(|b| b.to_string()).collect();
        let data = BundleData::with_default_windows(&default_bundle_stats());
        let selected =
            strategy.select_broker(&candidates, "ns/x", &data, &load_data, &LoadManagerConfig::default());
        assert_eq!(selected, Some("b2".to_string()));
    }

    #[test]
    fn test_departed_brokers_forgotten() {
        let mut load_data = LoadData::new();
        add_broker(&mut load_data, "b1", 50.0, &[]);
        let strategy = LeastResourceUsageWithWeight::new();
        strategy.update_and_get_usage("b1", &load_data, &LoadManagerConfig::default());
        assert!(strategy.broker_avg_usage.contains_key("b1"));

        strategy.on_active_brokers_change(&HashSet::new());
        assert!(strategy.broker_avg_usage.is_empty());
    }
}

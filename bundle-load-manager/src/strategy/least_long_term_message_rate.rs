use std::collections::HashSet;

use tracing::warn;

use super::{choose_random, PlacementStrategy};
use crate::bundle_data::BundleData;
use crate::config::LoadManagerConfig;
use crate::load_data::{BrokerData, LoadData};

/// Places bundles on the broker with the lowest long-term message rate,
/// counting the bundles already preallocated to it.
#[derive(Debug, Default)]
pub struct LeastLongTermMessageRate;

impl LeastLongTermMessageRate {
    pub const NAME: &'static str = "least_long_term_message_rate";

    pub fn new() -> Self {
        LeastLongTermMessageRate
    }

    fn score(broker: &str, data: &BrokerData, conf: &LoadManagerConfig) -> f64 {
        let max_usage = data.local_data.max_resource_usage();
        if max_usage > conf.overload_threshold() {
            warn!(
                broker = %broker,
                max_usage = max_usage * 100.0,
                "broker is overloaded"
            );
            return f64::INFINITY;
        }

        let preallocated_rate: f64 = data
            .preallocated_bundle_data
            .values()
            .map(|bundle| bundle.long_term_data.total_msg_rate())
            .sum();
        preallocated_rate + data.time_average_data.long_term_msg_rate()
    }
}

impl PlacementStrategy for LeastLongTermMessageRate {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn select_broker(
        &self,
        candidates: &HashSet<String>,
        _bundle: &str,
        _bundle_data: &BundleData,
        load_data: &LoadData,
        conf: &LoadManagerConfig,
    ) -> Option<String> {
        let mut best_brokers = Vec::new();
        let mut min_score = f64::INFINITY;

        for broker in candidates {
            let Some(data) = load_data.broker(broker) else {
                continue;
            };
            let score = Self::score(broker, data, conf);
            if score < min_score {
                best_brokers.clear();
                best_brokers.push(broker.clone());
                min_score = score;
            } else if score == min_score && score.is_finite() {
                best_brokers.push(broker.clone());
            }
        }

        if best_brokers.is_empty() {
            // every candidate is overloaded or unknown
            best_brokers = candidates.iter().cloned().collect();
        }
        choose_random(&best_brokers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle_data::default_bundle_stats;
    use crate::strategy::test_support::add_broker;

    fn candidates(names: &[&str]) -> HashSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_prefers_lowest_long_term_rate() {
        let mut load_data = LoadData::new();
        add_broker(&mut load_data, "b1", 10.0, &[]);
        add_broker(&mut load_data, "b2", 10.0, &[]);
        load_data
            .broker_mut("b1")
            .unwrap()
            .time_average_data
            .long_term_msg_rate_in = 500.0;
        load_data
            .broker_mut("b2")
            .unwrap()
            .time_average_data
            .long_term_msg_rate_in = 100.0;

        let strategy = LeastLongTermMessageRate::new();
        let data = BundleData::with_default_windows(&default_bundle_stats());
        let conf = LoadManagerConfig::default();
        for _ in 0..10 {
            assert_eq!(
                strategy.select_broker(&candidates(&["b1", "b2"]), "ns/x", &data, &load_data, &conf),
                Some("b2".to_string())
            );
        }
    }

    #[test]
    fn test_preallocated_bundles_count_against_broker() {
        let mut load_data = LoadData::new();
        add_broker(&mut load_data, "b1", 10.0, &[]);
        add_broker(&mut load_data, "b2", 10.0, &[]);
        load_data
            .broker_mut("b1")
            .unwrap()
            .preallocated_bundle_data
            .insert(
                "ns/pending".to_string(),
                BundleData::with_default_windows(&default_bundle_stats()),
            );

        let strategy = LeastLongTermMessageRate::new();
        let data = BundleData::with_default_windows(&default_bundle_stats());
        let selected = strategy.select_broker(
            &candidates(&["b1", "b2"]),
            "ns/x",
            &data,
            &load_data,
            &LoadManagerConfig::default(),
        );
        assert_eq!(selected, Some("b2".to_string()));
    }

    #[test]
    fn test_all_overloaded_falls_back_to_all_candidates() {
        let mut load_data = LoadData::new();
        add_broker(&mut load_data, "b1", 99.0, &[]);
        add_broker(&mut load_data, "b2", 98.0, &[]);

        let strategy = LeastLongTermMessageRate::new();
        let data = BundleData::with_default_windows(&default_bundle_stats());
        let selected = strategy
            .select_broker(
                &candidates(&["b1", "b2"]),
                "ns/x",
                &data,
                &load_data,
                &LoadManagerConfig::default(),
            )
            .unwrap();
        assert!(selected == "b1" || selected == "b2");
    }

    #[test]
    fn test_empty_candidates() {
        let strategy = LeastLongTermMessageRate::new();
        let data = BundleData::with_default_windows(&default_bundle_stats());
        assert!(strategy
            .select_broker(
                &HashSet::new(),
                "ns/x",
                &data,
                &LoadData::new(),
                &LoadManagerConfig::default()
            )
            .is_none());
    }
}

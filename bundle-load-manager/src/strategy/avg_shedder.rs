use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use super::{
    choose_random, unloadable_bundles_by_throughput, LoadSheddingStrategy, PlacementStrategy,
    UnloadProposal,
};
use crate::bundle_data::BundleData;
use crate::config::LoadManagerConfig;
use crate::load_data::LoadData;

/// Pairs the hottest and coldest broker and, once their gap persists, moves half
/// of the throughput difference from one to the other.
///
/// Acts as both shedding and placement strategy: bundles it unloads are placed on
/// the cold broker it planned for them.
#[derive(Debug, Default)]
pub struct AvgShedder {
    /// Consecutive cycles each broker was the hot side of an oversized gap
    hit_counts: DashMap<String, u32>,
    /// Planned destination of every bundle this strategy unloaded
    planned_destinations: DashMap<String, String>,
}

impl AvgShedder {
    pub const NAME: &'static str = "avg_shedder";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn planned_destination(&self, bundle: &str) -> Option<String> {
        self.planned_destinations.get(bundle).map(|b| b.value().clone())
    }
}

impl LoadSheddingStrategy for AvgShedder {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn find_bundles_for_unloading(
        &self,
        load_data: &LoadData,
        conf: &LoadManagerConfig,
    ) -> UnloadProposal {
        let mut selected = UnloadProposal::new();

        let mut usages: Vec<(&String, f64)> = load_data
            .broker_data()
            .iter()
            .map(|(broker, data)| {
                (
                    broker,
                    data.local_data
                        .max_resource_usage_with_weight(&conf.resource_weights)
                        * 100.0,
                )
            })
            .collect();
        if usages.len() < 2 {
            return selected;
        }
        usages.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));

        let (cold, cold_usage) = usages[0];
        let (hot, hot_usage) = usages[usages.len() - 1];
        let gap = hot_usage - cold_usage;

        if gap <= conf.shedding.avg_shedder_threshold_percentage {
            self.hit_counts.clear();
            return selected;
        }

        let hits = {
            let mut entry = self.hit_counts.entry(hot.clone()).or_insert(0);
            *entry += 1;
            *entry
        };
        self.hit_counts.retain(|broker, _| broker == hot);
        if hits < conf.shedding.avg_shedder_hit_count {
            debug!(hot = %hot, cold = %cold, gap, hits, "usage gap persists, waiting for more hits");
            return selected;
        }
        self.hit_counts.remove(hot);

        let hot_data = &load_data.broker_data()[hot];
        if hot_data.local_data.bundles.len() <= 1 {
            return selected;
        }
        let cold_throughput = load_data.broker_data()[cold]
            .local_data
            .total_msg_throughput();
        let throughput_to_move = (hot_data.local_data.total_msg_throughput() - cold_throughput) / 2.0;

        let mut moved = 0.0;
        let mut chosen = Vec::new();
        for (bundle, throughput) in unloadable_bundles_by_throughput(load_data, hot) {
            if moved + throughput > throughput_to_move && !chosen.is_empty() {
                break;
            }
            if moved + throughput > throughput_to_move {
                continue;
            }
            moved += throughput;
            self.planned_destinations.insert(bundle.clone(), cold.clone());
            chosen.push(bundle);
        }

        if !chosen.is_empty() {
            info!(hot = %hot, cold = %cold, gap, bundles = chosen.len(), "swapping load between brokers");
            selected.insert(hot.clone(), chosen);
        }
        selected
    }

    fn on_active_brokers_change(&self, active_brokers: &HashSet<String>) {
        self.hit_counts
            .retain(|broker, _| active_brokers.contains(broker));
        self.planned_destinations
            .retain(|_, broker| active_brokers.contains(broker.as_str()));
    }
}

impl PlacementStrategy for AvgShedder {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn select_broker(
        &self,
        candidates: &HashSet<String>,
        bundle: &str,
        _bundle_data: &BundleData,
        _load_data: &LoadData,
        _conf: &LoadManagerConfig,
    ) -> Option<String> {
        if let Some((_, planned)) = self.planned_destinations.remove(bundle) {
            if candidates.contains(&planned) {
                return Some(planned);
            }
        }
        let candidates: Vec<String> = candidates.iter().cloned().collect();
        choose_random(&candidates)
    }

    fn on_active_brokers_change(&self, active_brokers: &HashSet<String>) {
        LoadSheddingStrategy::on_active_brokers_change(self, active_brokers);
    }

    fn as_shedding(self: Arc<Self>) -> Option<Arc<dyn LoadSheddingStrategy>> {
        Some(self)
    }
}

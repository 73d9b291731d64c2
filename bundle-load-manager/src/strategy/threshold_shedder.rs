use dashmap::DashMap;
use std::collections::HashSet;

use tracing::{debug, info, warn};

use super::{
    select_until_covered, smoothed_usage, unloadable_bundles_by_throughput, LoadSheddingStrategy,
    UnloadProposal, ADDITIONAL_THRESHOLD_PERCENT_MARGIN, MIB,
};
use crate::config::LoadManagerConfig;
use crate::load_data::LoadData;

/// Sheds load from brokers whose smoothed weighted usage exceeds the cluster
/// average by more than the configured threshold.
#[derive(Debug, Default)]
pub struct ThresholdShedder {
    broker_avg_usage: DashMap<String, f64>,
}

impl ThresholdShedder {
    pub const NAME: &'static str = "threshold_shedder";

    pub fn new() -> Self {
        Self::default()
    }

    fn broker_avg_usage(&self, load_data: &LoadData, conf: &LoadManagerConfig) -> f64 {
        let mut total_usage = 0.0;
        let mut total_brokers = 0usize;
        for (broker, data) in load_data.broker_data() {
            let current = data
                .local_data
                .max_resource_usage_with_weight(&conf.resource_weights);
            let previous = self.broker_avg_usage.get(broker).map(|usage| *usage);
            let usage = smoothed_usage(previous, current, conf.history_resource_percentage);
            self.broker_avg_usage.insert(broker.clone(), usage);
            total_usage += usage;
            total_brokers += 1;
        }
        if total_brokers > 0 {
            total_usage / total_brokers as f64
        } else {
            0.0
        }
    }
}

impl LoadSheddingStrategy for ThresholdShedder {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn find_bundles_for_unloading(
        &self,
        load_data: &LoadData,
        conf: &LoadManagerConfig,
    ) -> UnloadProposal {
        let mut selected = UnloadProposal::new();
        let threshold = conf.shedding.broker_threshold_percentage / 100.0;
        let min_throughput_threshold = conf.shedding.bundle_unload_min_throughput_threshold_mb * MIB;

        let avg_usage = self.broker_avg_usage(load_data, conf);
        if avg_usage == 0.0 {
            warn!("average max resource usage is 0, skipping load shedding");
            return selected;
        }

        for (broker, data) in load_data.broker_data() {
            let current_usage = self.broker_avg_usage.get(broker).map(|u| *u).unwrap_or(0.0);
            if current_usage < avg_usage + threshold {
                debug!(broker = %broker, current_usage, avg_usage, "broker is not overloaded, ignoring");
                continue;
            }

            let percent_to_offload =
                current_usage - avg_usage - threshold + ADDITIONAL_THRESHOLD_PERCENT_MARGIN;
            let broker_throughput = data.local_data.total_msg_throughput();
            let min_throughput_to_offload = broker_throughput * percent_to_offload;
            if min_throughput_to_offload < min_throughput_threshold {
                debug!(
                    broker = %broker,
                    min_throughput_to_offload,
                    "throughput to offload below minimum threshold, ignoring"
                );
                continue;
            }

            info!(
                broker = %broker,
                current_usage = current_usage * 100.0,
                avg_usage = avg_usage * 100.0,
                threshold = threshold * 100.0,
                offload_percent = percent_to_offload * 100.0,
                offload_mb = min_throughput_to_offload / MIB,
                "attempting to shed load"
            );

            if data.local_data.bundles.len() > 1 {
                let bundles = unloadable_bundles_by_throughput(load_data, broker);
                let chosen = select_until_covered(bundles, min_throughput_to_offload);
                if !chosen.is_empty() {
                    selected.insert(broker.clone(), chosen);
                }
            } else if data.local_data.bundles.len() == 1 {
                warn!(broker = %broker, "sole namespace bundle is overloading broker");
            } else {
                warn!(broker = %broker, "broker is overloaded despite having no bundles");
            }
        }
        selected
    }

    fn on_active_brokers_change(&self, active_brokers: &HashSet<String>) {
        self.broker_avg_usage
            .retain(|broker, _| active_brokers.contains(broker));
    }
}

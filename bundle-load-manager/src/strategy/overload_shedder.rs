use tracing::{info, warn};

use super::{
    select_until_covered, unloadable_bundles_by_throughput, LoadSheddingStrategy, UnloadProposal,
    ADDITIONAL_THRESHOLD_PERCENT_MARGIN, MIB,
};
use crate::config::LoadManagerConfig;
use crate::load_data::LoadData;

/// Sheds load from every broker whose highest resource usage exceeds the overload threshold.
#[derive(Debug, Default)]
pub struct OverloadShedder;

impl OverloadShedder {
    pub const NAME: &'static str = "overload_shedder";

    pub fn new() -> Self {
        OverloadShedder
    }
}

impl LoadSheddingStrategy for OverloadShedder {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn find_bundles_for_unloading(
        &self,
        load_data: &LoadData,
        conf: &LoadManagerConfig,
    ) -> UnloadProposal {
        let mut selected = UnloadProposal::new();
        let overload_threshold = conf.overload_threshold();

        for (broker, data) in load_data.broker_data() {
            let current_usage = data.local_data.max_resource_usage();
            if current_usage < overload_threshold {
                continue;
            }

            let percent_to_offload =
                current_usage - overload_threshold + ADDITIONAL_THRESHOLD_PERCENT_MARGIN;
            let min_throughput_to_offload =
                data.local_data.total_msg_throughput() * percent_to_offload;
            info!(
                broker = %broker,
                current_usage = current_usage * 100.0,
                offload_percent = percent_to_offload * 100.0,
                offload_mb = min_throughput_to_offload / MIB,
                "attempting to shed load from overloaded broker"
            );

            match data.local_data.bundles.len() {
                0 => warn!(broker = %broker, "broker is overloaded despite having no bundles"),
                1 => warn!(broker = %broker, "sole namespace bundle is overloading broker"),
                _ => {
                    let bundles = unloadable_bundles_by_throughput(load_data, broker);
                    let chosen = select_until_covered(bundles, min_throughput_to_offload);
                    if !chosen.is_empty() {
                        selected.insert(broker.clone(), chosen);
                    }
                }
            }
        }
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::add_broker;

    #[test]
    fn test_only_overloaded_brokers_shed() {
        let mut load_data = LoadData::new();
        add_broker(&mut load_data, "hot", 95.0, &[("ns/a", 100.0), ("ns/b", 900.0)]);
        add_broker(&mut load_data, "warm", 80.0, &[("ns/c", 100.0), ("ns/d", 100.0)]);

        let proposal = OverloadShedder::new()
            .find_bundles_for_unloading(&load_data, &LoadManagerConfig::default());
        assert_eq!(proposal.len(), 1);
        assert_eq!(proposal["hot"], vec!["ns/b".to_string()]);
    }
}

use std::collections::HashMap;

use tracing::{debug, info};

use super::{BundleSplitStrategy, MIB};
use crate::collaborators::NamespaceService;
use crate::config::LoadManagerConfig;
use crate::load_data::LoadData;
use crate::naming::namespace_of;

/// Splits bundles exceeding the configured topic, session, rate or bandwidth limits.
#[derive(Debug, Default)]
pub struct BundleSplitter;

impl BundleSplitter {
    pub const NAME: &'static str = "bundle_splitter";

    pub fn new() -> Self {
        BundleSplitter
    }
}

impl BundleSplitStrategy for BundleSplitter {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn find_bundles_to_split(
        &self,
        load_data: &LoadData,
        namespaces: &dyn NamespaceService,
        conf: &LoadManagerConfig,
    ) -> HashMap<String, String> {
        let split = &conf.split;
        let max_bandwidth = split.max_bandwidth_mb * MIB;
        let mut to_split = HashMap::new();
        let mut namespace_bundle_count: HashMap<String, usize> = HashMap::new();

        for (broker, broker_data) in load_data.broker_data() {
            for (bundle, stats) in &broker_data.local_data.last_stats {
                let total_sessions = stats.consumer_count + stats.producer_count;
                let (total_rate, total_throughput) = match load_data.bundle(bundle) {
                    Some(data) => (
                        data.long_term_data.total_msg_rate(),
                        data.long_term_data.total_msg_throughput(),
                    ),
                    None => (
                        stats.msg_rate_in + stats.msg_rate_out,
                        stats.msg_throughput_in + stats.msg_throughput_out,
                    ),
                };

                let exceeds = (split.max_topics > 0 && stats.topics > split.max_topics)
                    || (split.max_sessions > 0 && total_sessions > split.max_sessions)
                    || (split.max_msg_rate > 0.0 && total_rate > split.max_msg_rate)
                    || (max_bandwidth > 0.0 && total_throughput > max_bandwidth);
                if !exceeds {
                    continue;
                }
                if stats.topics <= 1 {
                    debug!(bundle = %bundle, "can't split bundle with only one topic");
                    continue;
                }

                let namespace = namespace_of(bundle);
                let count = namespace_bundle_count
                    .entry(namespace.to_string())
                    .or_insert_with(|| namespaces.bundle_count(namespace));
                if *count < split.max_bundles_per_namespace {
                    *count += 1;
                    to_split.insert(bundle.clone(), broker.clone());
                } else {
                    info!(
                        bundle = %bundle,
                        namespace = %namespace,
                        max_bundles = split.max_bundles_per_namespace,
                        "namespace reached the maximum number of bundles, not splitting"
                    );
                }
            }
        }
        to_split
    }
}

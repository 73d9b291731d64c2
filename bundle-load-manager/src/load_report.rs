use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::config::ResourceWeights;

/// Usage of one resource together with its limit, in the same unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub usage: f64,
    pub limit: f64,
}

impl ResourceUsage {
    pub fn new(usage: f64, limit: f64) -> Self {
        ResourceUsage { usage, limit }
    }

    /// Usage as a percentage of the limit; 0 when no limit is known.
    pub fn percent_usage(&self) -> f64 {
        if self.limit > 0.0 {
            self.usage / self.limit * 100.0
        } else {
            0.0
        }
    }
}

/// A single sample of the host resources used by a broker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemResourceUsage {
    pub cpu: ResourceUsage,
    pub memory: ResourceUsage,
    pub direct_memory: ResourceUsage,
    pub bandwidth_in: ResourceUsage,
    pub bandwidth_out: ResourceUsage,
}

/// Raw traffic statistics of one bundle as reported by its owner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BundleStats {
    pub msg_rate_in: f64,
    pub msg_rate_out: f64,
    pub msg_throughput_in: f64,
    pub msg_throughput_out: f64,
    pub consumer_count: u64,
    pub producer_count: u64,
    pub topics: u64,
}

// LocalBrokerData is the snapshot one broker publishes about itself.
//
// It is overwritten wholesale on every publish and read by the leader
// to aggregate cluster-wide load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalBrokerData {
    pub cpu: ResourceUsage,
    pub memory: ResourceUsage,
    pub direct_memory: ResourceUsage,
    pub bandwidth_in: ResourceUsage,
    pub bandwidth_out: ResourceUsage,

    pub msg_rate_in: f64,
    pub msg_rate_out: f64,
    pub msg_throughput_in: f64,
    pub msg_throughput_out: f64,

    pub num_topics: u64,
    pub num_bundles: u64,
    pub num_consumers: u64,
    pub num_producers: u64,

    /// Bundles owned at the time of the snapshot
    pub bundles: BTreeSet<String>,
    /// Bundles gained since the previous publish
    pub last_bundle_gains: BTreeSet<String>,
    /// Bundles lost since the previous publish
    pub last_bundle_losses: BTreeSet<String>,
    /// Latest raw stats per owned bundle
    pub last_stats: HashMap<String, BundleStats>,

    pub broker_version: String,
    pub load_manager_class_name: String,
    pub persistent_topics_enabled: bool,
    pub non_persistent_topics_enabled: bool,

    /// Millis since epoch of the last publish
    pub last_update: u64,
}

impl LocalBrokerData {
    pub fn new(
        broker_version: impl Into<String>,
        load_manager_class_name: impl Into<String>,
        persistent_topics_enabled: bool,
        non_persistent_topics_enabled: bool,
    ) -> Self {
        LocalBrokerData {
            broker_version: broker_version.into(),
            load_manager_class_name: load_manager_class_name.into(),
            persistent_topics_enabled,
            non_persistent_topics_enabled,
            ..Default::default()
        }
    }

    /// Folds a fresh resource sample and bundle stats into the snapshot.
    pub fn update(&mut self, usage: SystemResourceUsage, stats: HashMap<String, BundleStats>) {
        self.update_system_resource_usage(&usage);
        self.update_bundle_data(stats);
    }

    /// Copies the published quantities of `other`, used to keep the last-published record.
    pub fn update_from(&mut self, other: &LocalBrokerData) {
        self.cpu = other.cpu;
        self.memory = other.memory;
        self.direct_memory = other.direct_memory;
        self.bandwidth_in = other.bandwidth_in;
        self.bandwidth_out = other.bandwidth_out;
        self.msg_rate_in = other.msg_rate_in;
        self.msg_rate_out = other.msg_rate_out;
        self.msg_throughput_in = other.msg_throughput_in;
        self.msg_throughput_out = other.msg_throughput_out;
        self.num_topics = other.num_topics;
        self.num_bundles = other.num_bundles;
        self.num_consumers = other.num_consumers;
        self.num_producers = other.num_producers;
        self.bundles = other.bundles.clone();
        self.last_stats = other.last_stats.clone();
        self.last_update = other.last_update;
    }

    pub fn clean_deltas(&mut self) {
        self.last_bundle_gains.clear();
        self.last_bundle_losses.clear();
    }

    fn update_system_resource_usage(&mut self, usage: &SystemResourceUsage) {
        self.cpu = usage.cpu;
        self.memory = usage.memory;
        self.direct_memory = usage.direct_memory;
        self.bandwidth_in = usage.bandwidth_in;
        self.bandwidth_out = usage.bandwidth_out;
    }

    fn update_bundle_data(&mut self, stats: HashMap<String, BundleStats>) {
        self.msg_rate_in = 0.0;
        self.msg_rate_out = 0.0;
        self.msg_throughput_in = 0.0;
        self.msg_throughput_out = 0.0;
        self.num_topics = 0;
        self.num_consumers = 0;
        self.num_producers = 0;

        for bundle_stats in stats.values() {
            self.msg_rate_in += bundle_stats.msg_rate_in;
            self.msg_rate_out += bundle_stats.msg_rate_out;
            self.msg_throughput_in += bundle_stats.msg_throughput_in;
            self.msg_throughput_out += bundle_stats.msg_throughput_out;
            self.num_topics += bundle_stats.topics;
            self.num_consumers += bundle_stats.consumer_count;
            self.num_producers += bundle_stats.producer_count;
        }

        let current: BTreeSet<String> = stats.keys().cloned().collect();
        for bundle in current.difference(&self.bundles) {
            self.last_bundle_losses.remove(bundle);
            self.last_bundle_gains.insert(bundle.clone());
        }
        for bundle in self.bundles.difference(&current) {
            self.last_bundle_gains.remove(bundle);
            self.last_bundle_losses.insert(bundle.clone());
        }

        self.num_bundles = current.len() as u64;
        self.bundles = current;
        self.last_stats = stats;
    }

    /// Largest resource usage percentage, memory included, as a fraction.
    pub fn max_resource_usage(&self) -> f64 {
        [
            self.cpu.percent_usage(),
            self.memory.percent_usage(),
            self.direct_memory.percent_usage(),
            self.bandwidth_in.percent_usage(),
            self.bandwidth_out.percent_usage(),
        ]
        .into_iter()
        .fold(0.0, f64::max)
            / 100.0
    }

    /// Largest weighted usage of cpu, direct memory and bandwidth, as a fraction.
    pub fn max_resource_usage_with_weight(&self, weights: &ResourceWeights) -> f64 {
        [
            self.cpu.percent_usage() * weights.cpu,
            self.direct_memory.percent_usage() * weights.direct_memory,
            self.bandwidth_in.percent_usage() * weights.bandwidth_in,
            self.bandwidth_out.percent_usage() * weights.bandwidth_out,
        ]
        .into_iter()
        .fold(0.0, f64::max)
            / 100.0
    }

    pub fn total_msg_rate(&self) -> f64 {
        self.msg_rate_in + self.msg_rate_out
    }

    pub fn total_msg_throughput(&self) -> f64 {
        self.msg_throughput_in + self.msg_throughput_out
    }
}

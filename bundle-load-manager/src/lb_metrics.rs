use metrics::{counter, gauge, histogram};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::LoadManagerConfig;
use crate::load_report::{BundleStats, LocalBrokerData};

pub(crate) struct Metric {
    pub name: &'static str,
    description: &'static str,
}

pub(crate) const COUNTERS: [Metric; 3] = [
    LB_UNLOAD_BROKER_TOTAL,
    LB_UNLOAD_BUNDLE_TOTAL,
    LB_BUNDLES_SPLIT_TOTAL,
];
pub(crate) const GAUGES: [Metric; 10] = [
    LB_CPU_USAGE,
    LB_MEMORY_USAGE,
    LB_DIRECT_MEMORY_USAGE,
    LB_BANDWIDTH_IN_USAGE,
    LB_BANDWIDTH_OUT_USAGE,
    LB_MAX_RESOURCE_USAGE_WITH_WEIGHT,
    LB_BUNDLE_MSG_RATE_IN,
    LB_BUNDLE_MSG_RATE_OUT,
    LB_BUNDLE_THROUGHPUT_IN,
    LB_BUNDLE_THROUGHPUT_OUT,
];
pub(crate) const HISTOGRAMS: [Metric; 1] = [LB_BUNDLE_ASSIGNMENT_LATENCY_MS];

// Shedding and split -------------------------

pub(crate) const LB_UNLOAD_BROKER_TOTAL: Metric = Metric {
    name: "brk_lb_unload_broker_total",
    description: "Brokers that had at least one bundle unloaded by load shedding",
};

pub(crate) const LB_UNLOAD_BUNDLE_TOTAL: Metric = Metric {
    name: "brk_lb_unload_bundle_total",
    description: "Bundles unloaded by load shedding",
};

pub(crate) const LB_BUNDLES_SPLIT_TOTAL: Metric = Metric {
    name: "brk_lb_bundles_split_total",
    description: "Bundles split by the automatic bundle split",
};

// Broker resource usage ----------------------

pub(crate) const LB_CPU_USAGE: Metric = Metric {
    name: "brk_lb_cpu_usage",
    description: "Broker cpu usage in percent",
};

pub(crate) const LB_MEMORY_USAGE: Metric = Metric {
    name: "brk_lb_memory_usage",
    description: "Broker memory usage in percent",
};

pub(crate) const LB_DIRECT_MEMORY_USAGE: Metric = Metric {
    name: "brk_lb_direct_memory_usage",
    description: "Broker direct memory usage in percent",
};

pub(crate) const LB_BANDWIDTH_IN_USAGE: Metric = Metric {
    name: "brk_lb_bandwidth_in_usage",
    description: "Broker inbound bandwidth usage in percent",
};

pub(crate) const LB_BANDWIDTH_OUT_USAGE: Metric = Metric {
    name: "brk_lb_bandwidth_out_usage",
    description: "Broker outbound bandwidth usage in percent",
};

pub(crate) const LB_MAX_RESOURCE_USAGE_WITH_WEIGHT: Metric = Metric {
    name: "brk_lb_resource_usage_with_weight",
    description: "Broker weighted max resource usage in percent",
};

// Per bundle, only when exposed --------------

pub(crate) const LB_BUNDLE_MSG_RATE_IN: Metric = Metric {
    name: "brk_bundle_msg_rate_in",
    description: "Inbound message rate of a bundle",
};

pub(crate) const LB_BUNDLE_MSG_RATE_OUT: Metric = Metric {
    name: "brk_bundle_msg_rate_out",
    description: "Outbound message rate of a bundle",
};

pub(crate) const LB_BUNDLE_THROUGHPUT_IN: Metric = Metric {
    name: "brk_bundle_msg_throughput_in",
    description: "Inbound throughput of a bundle in bytes per second",
};

pub(crate) const LB_BUNDLE_THROUGHPUT_OUT: Metric = Metric {
    name: "brk_bundle_msg_throughput_out",
    description: "Outbound throughput of a bundle in bytes per second",
};

// Placement ----------------------------------

pub(crate) const LB_BUNDLE_ASSIGNMENT_LATENCY_MS: Metric = Metric {
    name: "brk_lb_bundle_assignment_latency_ms",
    description: "Latency of selecting a broker for a bundle assignment",
};

/// Registers descriptions of every load manager metric with the installed recorder.
pub fn describe_metrics() {
    for metric in COUNTERS {
        metrics::describe_counter!(metric.name, metric.description);
    }
    for metric in GAUGES {
        metrics::describe_gauge!(metric.name, metric.description);
    }
    for metric in HISTOGRAMS {
        metrics::describe_histogram!(metric.name, metric.description);
    }
}

pub(crate) fn record_broker_usage(broker_id: &str, local: &LocalBrokerData, conf: &LoadManagerConfig) {
    let broker = broker_id.to_string();
    gauge!(LB_CPU_USAGE.name, "broker" => broker.clone()).set(local.cpu.percent_usage());
    gauge!(LB_MEMORY_USAGE.name, "broker" => broker.clone()).set(local.memory.percent_usage());
    gauge!(LB_DIRECT_MEMORY_USAGE.name, "broker" => broker.clone())
        .set(local.direct_memory.percent_usage());
    gauge!(LB_BANDWIDTH_IN_USAGE.name, "broker" => broker.clone())
        .set(local.bandwidth_in.percent_usage());
    gauge!(LB_BANDWIDTH_OUT_USAGE.name, "broker" => broker.clone())
        .set(local.bandwidth_out.percent_usage());
    gauge!(LB_MAX_RESOURCE_USAGE_WITH_WEIGHT.name, "broker" => broker)
        .set(local.max_resource_usage_with_weight(&conf.resource_weights) * 100.0);
}

pub(crate) fn record_bundle_stats(stats: &HashMap<String, BundleStats>) {
    for (bundle, stats) in stats {
        gauge!(LB_BUNDLE_MSG_RATE_IN.name, "bundle" => bundle.clone()).set(stats.msg_rate_in);
        gauge!(LB_BUNDLE_MSG_RATE_OUT.name, "bundle" => bundle.clone()).set(stats.msg_rate_out);
        gauge!(LB_BUNDLE_THROUGHPUT_IN.name, "bundle" => bundle.clone())
            .set(stats.msg_throughput_in);
        gauge!(LB_BUNDLE_THROUGHPUT_OUT.name, "bundle" => bundle.clone())
            .set(stats.msg_throughput_out);
    }
}

pub(crate) fn record_unloads(brokers: u64, bundles: u64) {
    counter!(LB_UNLOAD_BROKER_TOTAL.name).increment(brokers);
    counter!(LB_UNLOAD_BUNDLE_TOTAL.name).increment(bundles);
}

pub(crate) fn record_splits(bundles: u64) {
    counter!(LB_BUNDLES_SPLIT_TOTAL.name).increment(bundles);
}

pub(crate) fn record_assignment_latency(millis: f64) {
    histogram!(LB_BUNDLE_ASSIGNMENT_LATENCY_MS.name).record(millis);
}

/// Per-bundle figures of the metrics snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleMetrics {
    pub bundle: String,
    pub msg_rate_in: f64,
    pub msg_rate_out: f64,
    pub msg_throughput_in: f64,
    pub msg_throughput_out: f64,
    pub consumer_count: u64,
    pub producer_count: u64,
}

/// Point-in-time load balancing figures of this broker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancingMetrics {
    pub broker_id: String,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub direct_memory_usage: f64,
    pub bandwidth_in_usage: f64,
    pub bandwidth_out_usage: f64,
    pub max_resource_usage_with_weight: f64,
    pub unload_broker_total: u64,
    pub unload_bundle_total: u64,
    pub bundles_split_total: u64,
    /// Populated only when `expose_bundles_metrics` is set
    pub bundles: Vec<BundleMetrics>,
}

impl LoadBalancingMetrics {
    pub(crate) fn from_local_data(
        broker_id: &str,
        local: &LocalBrokerData,
        conf: &LoadManagerConfig,
    ) -> Self {
        let mut bundles: Vec<BundleMetrics> = if conf.expose_bundles_metrics {
            local
                .last_stats
                .iter()
                .map(|(bundle, stats)| BundleMetrics {
                    bundle: bundle.clone(),
                    msg_rate_in: stats.msg_rate_in,
                    msg_rate_out: stats.msg_rate_out,
                    msg_throughput_in: stats.msg_throughput_in,
                    msg_throughput_out: stats.msg_throughput_out,
                    consumer_count: stats.consumer_count,
                    producer_count: stats.producer_count,
                })
                .collect()
        } else {
            Vec::new()
        };
        bundles.sort_by(|a, b| a.bundle.cmp(&b.bundle));

        LoadBalancingMetrics {
            broker_id: broker_id.to_string(),
            cpu_usage: local.cpu.percent_usage(),
            memory_usage: local.memory.percent_usage(),
            direct_memory_usage: local.direct_memory.percent_usage(),
            bandwidth_in_usage: local.bandwidth_in.percent_usage(),
            bandwidth_out_usage: local.bandwidth_out.percent_usage(),
            max_resource_usage_with_weight: local
                .max_resource_usage_with_weight(&conf.resource_weights)
                * 100.0,
            bundles,
            ..Default::default()
        }
    }
}

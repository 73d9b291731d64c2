use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::load_report::BundleStats;

/// Samples kept by the short-term window.
pub const NUM_SHORT_SAMPLES: u32 = 10;
/// Samples kept by the long-term window.
pub const NUM_LONG_SAMPLES: u32 = 1000;

/// Message rate assumed for a bundle that has never been observed.
pub const DEFAULT_MESSAGE_RATE: f64 = 50.0;
/// Throughput (bytes/s) assumed for a bundle that has never been observed.
pub const DEFAULT_MESSAGE_THROUGHPUT: f64 = 50000.0;

/// Stats assumed for bundles without any history.
pub fn default_bundle_stats() -> BundleStats {
    BundleStats {
        msg_rate_in: DEFAULT_MESSAGE_RATE,
        msg_rate_out: DEFAULT_MESSAGE_RATE,
        msg_throughput_in: DEFAULT_MESSAGE_THROUGHPUT,
        msg_throughput_out: DEFAULT_MESSAGE_THROUGHPUT,
        ..Default::default()
    }
}

/// Running average of message rates and throughputs over at most `max_samples` samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeAverageMessageData {
    pub max_samples: u32,
    pub num_samples: u32,
    pub msg_throughput_in: f64,
    pub msg_throughput_out: f64,
    pub msg_rate_in: f64,
    pub msg_rate_out: f64,
}

impl TimeAverageMessageData {
    /// Starts from `default_stats` with no samples; the first sample replaces the defaults.
    pub fn new(max_samples: u32, default_stats: &BundleStats) -> Self {
        TimeAverageMessageData {
            max_samples,
            num_samples: 0,
            msg_throughput_in: default_stats.msg_throughput_in,
            msg_throughput_out: default_stats.msg_throughput_out,
            msg_rate_in: default_stats.msg_rate_in,
            msg_rate_out: default_stats.msg_rate_out,
        }
    }

    pub fn update(&mut self, sample: &BundleStats) {
        self.num_samples = (self.num_samples + 1).min(self.max_samples.max(1));
        self.msg_throughput_in = self.updated(self.msg_throughput_in, sample.msg_throughput_in);
        self.msg_throughput_out = self.updated(self.msg_throughput_out, sample.msg_throughput_out);
        self.msg_rate_in = self.updated(self.msg_rate_in, sample.msg_rate_in);
        self.msg_rate_out = self.updated(self.msg_rate_out, sample.msg_rate_out);
    }

    fn updated(&self, old_average: f64, sample: f64) -> f64 {
        let n = self.num_samples as f64;
        ((n - 1.0) * old_average + sample) / n
    }

    pub fn total_msg_rate(&self) -> f64 {
        self.msg_rate_in + self.msg_rate_out
    }

    pub fn total_msg_throughput(&self) -> f64 {
        self.msg_throughput_in + self.msg_throughput_out
    }
}

/// Short-term and long-term history of one bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleData {
    pub short_term_data: TimeAverageMessageData,
    pub long_term_data: TimeAverageMessageData,
    pub topics: u64,
}

impl BundleData {
    pub fn new(num_short_samples: u32, num_long_samples: u32, default_stats: &BundleStats) -> Self {
        BundleData {
            short_term_data: TimeAverageMessageData::new(num_short_samples, default_stats),
            long_term_data: TimeAverageMessageData::new(num_long_samples, default_stats),
            topics: 0,
        }
    }

    pub fn with_default_windows(default_stats: &BundleStats) -> Self {
        Self::new(NUM_SHORT_SAMPLES, NUM_LONG_SAMPLES, default_stats)
    }

    pub fn update(&mut self, sample: &BundleStats) {
        self.topics = sample.topics;
        self.short_term_data.update(sample);
        self.long_term_data.update(sample);
    }
}

/// Aggregate short- and long-term averages over the bundles a broker owns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeAverageBrokerData {
    pub short_term_msg_throughput_in: f64,
    pub short_term_msg_throughput_out: f64,
    pub short_term_msg_rate_in: f64,
    pub short_term_msg_rate_out: f64,
    pub long_term_msg_throughput_in: f64,
    pub long_term_msg_throughput_out: f64,
    pub long_term_msg_rate_in: f64,
    pub long_term_msg_rate_out: f64,
}

impl TimeAverageBrokerData {
    /// Recomputes the aggregate from `bundles`; unknown bundles contribute `default_stats`.
    pub fn reset<'a>(
        &mut self,
        bundles: impl IntoIterator<Item = &'a String>,
        data: &HashMap<String, BundleData>,
        default_stats: &BundleStats,
    ) {
        *self = TimeAverageBrokerData::default();
        for bundle in bundles {
            match data.get(bundle) {
                Some(bundle_data) => {
                    let short = &bundle_data.short_term_data;
                    let long = &bundle_data.long_term_data;
                    self.short_term_msg_throughput_in += short.msg_throughput_in;
                    self.short_term_msg_throughput_out += short.msg_throughput_out;
                    self.short_term_msg_rate_in += short.msg_rate_in;
                    self.short_term_msg_rate_out += short.msg_rate_out;
                    self.long_term_msg_throughput_in += long.msg_throughput_in;
                    self.long_term_msg_throughput_out += long.msg_throughput_out;
                    self.long_term_msg_rate_in += long.msg_rate_in;
                    self.long_term_msg_rate_out += long.msg_rate_out;
                }
                None => {
                    self.short_term_msg_throughput_in += default_stats.msg_throughput_in;
                    self.short_term_msg_throughput_out += default_stats.msg_throughput_out;
                    self.short_term_msg_rate_in += default_stats.msg_rate_in;
                    self.short_term_msg_rate_out += default_stats.msg_rate_out;
                    self.long_term_msg_throughput_in += default_stats.msg_throughput_in;
                    self.long_term_msg_throughput_out += default_stats.msg_throughput_out;
                    self.long_term_msg_rate_in += default_stats.msg_rate_in;
                    self.long_term_msg_rate_out += default_stats.msg_rate_out;
                }
            }
        }
    }

    pub fn long_term_msg_rate(&self) -> f64 {
        self.long_term_msg_rate_in + self.long_term_msg_rate_out
    }
}

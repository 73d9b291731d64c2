use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::bundle_data::{BundleData, TimeAverageBrokerData};
use crate::load_report::LocalBrokerData;

/// Leader-side record of one broker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerData {
    /// Latest published snapshot, replaced on every refresh
    pub local_data: LocalBrokerData,
    pub time_average_data: TimeAverageBrokerData,
    /// Bundles assigned to this broker but not yet confirmed by its snapshot
    pub preallocated_bundle_data: HashMap<String, BundleData>,
}

impl BrokerData {
    pub fn new(local_data: LocalBrokerData) -> Self {
        BrokerData {
            local_data,
            ..Default::default()
        }
    }
}

/// The leader's in-memory view of the cluster load.
///
/// Every mutation goes through the methods below; callers hold the surrounding
/// `RwLock` for the duration of one logical update.
#[derive(Debug, Clone, Default)]
pub struct LoadData {
    broker_data: HashMap<String, BrokerData>,
    bundle_data: HashMap<String, BundleData>,
    recently_unloaded_bundles: HashMap<String, u64>,
}

impl LoadData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn broker_data(&self) -> &HashMap<String, BrokerData> {
        &self.broker_data
    }

    pub fn bundle_data(&self) -> &HashMap<String, BundleData> {
        &self.bundle_data
    }

    pub fn recently_unloaded_bundles(&self) -> &HashMap<String, u64> {
        &self.recently_unloaded_bundles
    }

    pub fn broker(&self, broker: &str) -> Option<&BrokerData> {
        self.broker_data.get(broker)
    }

    pub(crate) fn broker_mut(&mut self, broker: &str) -> Option<&mut BrokerData> {
        self.broker_data.get_mut(broker)
    }

    pub fn bundle(&self, bundle: &str) -> Option<&BundleData> {
        self.bundle_data.get(bundle)
    }

    pub(crate) fn bundle_mut(&mut self, bundle: &str) -> Option<&mut BundleData> {
        self.bundle_data.get_mut(bundle)
    }

    /// Replaces the broker's snapshot, creating its record on first sight.
    pub fn upsert_broker(&mut self, broker: &str, local_data: LocalBrokerData) {
        match self.broker_data.get_mut(broker) {
            Some(record) => record.local_data = local_data,
            None => {
                self.broker_data
                    .insert(broker.to_string(), BrokerData::new(local_data));
            }
        }
    }

    pub fn remove_broker(&mut self, broker: &str) -> Option<BrokerData> {
        self.broker_data.remove(broker)
    }

    pub fn upsert_bundle(&mut self, bundle: &str, data: BundleData) {
        self.bundle_data.insert(bundle.to_string(), data);
    }

    pub fn remove_bundle(&mut self, bundle: &str) -> Option<BundleData> {
        self.bundle_data.remove(bundle)
    }

    pub fn record_unload(&mut self, bundle: &str, time_millis: u64) {
        self.recently_unloaded_bundles
            .insert(bundle.to_string(), time_millis);
    }

    /// Forgets unloads that happened strictly before `time_millis`.
    pub fn prune_unloads_older_than(&mut self, time_millis: u64) {
        self.recently_unloaded_bundles
            .retain(|_, unloaded_at| *unloaded_at >= time_millis);
    }

    pub(crate) fn broker_ids(&self) -> Vec<String> {
        self.broker_data.keys().cloned().collect()
    }

    pub(crate) fn bundle_ids(&self) -> Vec<String> {
        self.bundle_data.keys().cloned().collect()
    }
}

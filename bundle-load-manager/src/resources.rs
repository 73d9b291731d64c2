use bundle_metadata_store::{MetaOptions, MetadataStorage};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::warn;

use crate::bundle_data::{BundleData, TimeAverageBrokerData, NUM_LONG_SAMPLES, NUM_SHORT_SAMPLES};
use crate::errors::Result;
use crate::load_report::BundleStats;
use crate::utils::join_path;

/// Root under which every broker publishes its `LocalBrokerData`.
pub const LOADBALANCE_BROKERS_ROOT: &str = "/loadbalance/brokers";
pub const BUNDLE_DATA_PATH: &str = "/loadbalance/bundle-data";
pub const BROKER_TIME_AVERAGE_BASE_PATH: &str = "/loadbalance/broker-time-average";
pub const RESOURCE_QUOTA_BASE_PATH: &str = "/loadbalance/resource-quota/namespace";

/// Legacy per-bundle quota, consulted when a bundle has no bundle-data record yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceQuota {
    pub msg_rate_in: f64,
    pub msg_rate_out: f64,
    pub bandwidth_in: f64,
    pub bandwidth_out: f64,
    pub memory: f64,
    pub dynamic: bool,
}

/// Durable load-balance records kept in the metadata store.
#[derive(Clone)]
pub struct LoadBalanceResources {
    store: MetadataStorage,
}

impl LoadBalanceResources {
    pub fn new(store: MetadataStorage) -> Self {
        LoadBalanceResources { store }
    }

    pub fn store(&self) -> &MetadataStorage {
        &self.store
    }

    pub fn broker_path(broker: &str) -> String {
        join_path(&[LOADBALANCE_BROKERS_ROOT, broker])
    }

    pub fn bundle_data_path(bundle: &str) -> String {
        join_path(&[BUNDLE_DATA_PATH, bundle])
    }

    pub fn time_average_path(broker: &str) -> String {
        join_path(&[BROKER_TIME_AVERAGE_BASE_PATH, broker])
    }

    pub fn quota_path(bundle: &str) -> String {
        join_path(&[RESOURCE_QUOTA_BASE_PATH, bundle])
    }

    async fn read<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        match self.store.get(path, MetaOptions::None).await? {
            Some(value) => Ok(Some(
                serde_json::from_value(value).map_err(bundle_metadata_store::MetadataError::from)?,
            )),
            None => Ok(None),
        }
    }

    async fn write<T: Serialize>(&self, path: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value).map_err(bundle_metadata_store::MetadataError::from)?;
        self.store.put(path, value, MetaOptions::None).await?;
        Ok(())
    }

    /// Deletes `path`; a missing key counts as deleted.
    async fn remove(&self, path: &str) -> Result<()> {
        match self.store.delete(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_bundle_data(&self, bundle: &str) -> Result<Option<BundleData>> {
        self.read(&Self::bundle_data_path(bundle)).await
    }

    pub async fn update_bundle_data(&self, bundle: &str, data: &BundleData) -> Result<()> {
        self.write(&Self::bundle_data_path(bundle), data).await
    }

    pub async fn delete_bundle_data(&self, bundle: &str) -> Result<()> {
        self.remove(&Self::bundle_data_path(bundle)).await
    }

    pub async fn get_time_average_broker_data(
        &self,
        broker: &str,
    ) -> Result<Option<TimeAverageBrokerData>> {
        self.read(&Self::time_average_path(broker)).await
    }

    pub async fn update_time_average_broker_data(
        &self,
        broker: &str,
        data: &TimeAverageBrokerData,
    ) -> Result<()> {
        self.write(&Self::time_average_path(broker), data).await
    }

    pub async fn delete_time_average_broker_data(&self, broker: &str) -> Result<()> {
        self.remove(&Self::time_average_path(broker)).await
    }

    pub async fn get_quota(&self, bundle: &str) -> Result<Option<ResourceQuota>> {
        self.read(&Self::quota_path(bundle)).await
    }

    pub async fn set_quota(&self, bundle: &str, quota: &ResourceQuota) -> Result<()> {
        self.write(&Self::quota_path(bundle), quota).await
    }

    /// Bundle history from the store, else from a legacy quota, else fresh defaults.
    pub async fn bundle_data_or_default(&self, bundle: &str, default_stats: &BundleStats) -> BundleData {
        match self.lookup_bundle_data(bundle).await {
            Ok(Some(data)) => return data,
            Ok(None) => {}
            Err(err) => {
                warn!(bundle = %bundle, error = %err, "error when trying to find bundle data on metadata store");
            }
        }
        BundleData::with_default_windows(default_stats)
    }

    async fn lookup_bundle_data(&self, bundle: &str) -> Result<Option<BundleData>> {
        if let Some(data) = self.get_bundle_data(bundle).await? {
            return Ok(Some(data));
        }
        Ok(self.get_quota(bundle).await?.map(|quota| {
            let quota_stats = BundleStats {
                msg_rate_in: quota.msg_rate_in,
                msg_rate_out: quota.msg_rate_out,
                msg_throughput_in: quota.bandwidth_in,
                msg_throughput_out: quota.bandwidth_out,
                ..Default::default()
            };
            let mut data = BundleData::with_default_windows(&quota_stats);
            // assume ample history
            data.short_term_data.num_samples = NUM_SHORT_SAMPLES;
            data.long_term_data.num_samples = NUM_LONG_SAMPLES;
            data
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle_data::default_bundle_stats;
    use bundle_metadata_store::MemoryStore;
    use std::sync::Arc;

    async fn resources() -> LoadBalanceResources {
        let store = MemoryStore::new().await.expect("store");
        LoadBalanceResources::new(Arc::new(store))
    }

    #[tokio::test]
    async fn test_bundle_data_round_trip_and_idempotent_delete() {
        let resources = resources().await;
        let data = BundleData::with_default_windows(&default_bundle_stats());
        resources.update_bundle_data("t/ns/0x0_0x1", &data).await.unwrap();
        assert_eq!(
            resources.get_bundle_data("t/ns/0x0_0x1").await.unwrap(),
            Some(data)
        );

        resources.delete_bundle_data("t/ns/0x0_0x1").await.unwrap();
        resources.delete_bundle_data("t/ns/0x0_0x1").await.unwrap();
        assert!(resources.get_bundle_data("t/ns/0x0_0x1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_quota_fallback_assumes_ample_history() {
        let resources = resources().await;
        let quota = ResourceQuota {
            msg_rate_in: 7.0,
            bandwidth_in: 700.0,
            ..Default::default()
        };
        resources.set_quota("t/ns/0x0_0x1", &quota).await.unwrap();

        let data = resources
            .bundle_data_or_default("t/ns/0x0_0x1", &default_bundle_stats())
            .await;
        assert_eq!(data.short_term_data.num_samples, NUM_SHORT_SAMPLES);
        assert_eq!(data.long_term_data.num_samples, NUM_LONG_SAMPLES);
        assert_eq!(data.long_term_data.msg_rate_in, 7.0);
        assert_eq!(data.short_term_data.msg_throughput_in, 700.0);
    }

    #[tokio::test]
    async fn test_default_when_nothing_stored() {
        let resources = resources().await;
        let data = resources
            .bundle_data_or_default("t/ns/0x0_0x1", &default_bundle_stats())
            .await;
        assert_eq!(data.short_term_data.num_samples, 0);
        assert_eq!(
            data.short_term_data.msg_rate_in,
            crate::bundle_data::DEFAULT_MESSAGE_RATE
        );
    }

    #[tokio::test]
    async fn test_time_average_records() {
        let resources = resources().await;
        let avg = TimeAverageBrokerData {
            long_term_msg_rate_in: 3.0,
            ..Default::default()
        };
        resources.update_time_average_broker_data("b1", &avg).await.unwrap();
        assert_eq!(
            resources.get_time_average_broker_data("b1").await.unwrap(),
            Some(avg)
        );
        resources.delete_time_average_broker_data("b1").await.unwrap();
        resources.delete_time_average_broker_data("b1").await.unwrap();
    }
}

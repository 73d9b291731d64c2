use std::collections::HashSet;

use semver::Version;
use tracing::{debug, info};

use super::BrokerFilter;
use crate::bundle_data::BundleData;
use crate::config::LoadManagerConfig;
use crate::errors::BrokerFilterError;
use crate::load_data::LoadData;

/// Drops brokers advertising a different load manager implementation.
#[derive(Debug, Default)]
pub struct BrokerLoadManagerClassFilter;

impl BrokerLoadManagerClassFilter {
    pub const NAME: &'static str = "load_manager_class";
}

impl BrokerFilter for BrokerLoadManagerClassFilter {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn filter(
        &self,
        brokers: &mut HashSet<String>,
        _bundle_data: &BundleData,
        load_data: &LoadData,
        conf: &LoadManagerConfig,
    ) -> Result<(), BrokerFilterError> {
        brokers.retain(|broker| match load_data.broker(broker) {
            Some(data) => data.local_data.load_manager_class_name == conf.load_manager_class_name,
            None => true,
        });
        Ok(())
    }
}

/// With `prefer_later_versions`, keeps only brokers running the newest version among candidates.
#[derive(Debug, Default)]
pub struct BrokerVersionFilter;

impl BrokerVersionFilter {
    pub const NAME: &'static str = "broker_version";

    fn broker_version(broker: &str, load_data: &LoadData) -> Result<Version, BrokerFilterError> {
        let data = load_data.broker(broker).ok_or_else(|| BrokerFilterError::BadVersion {
            broker: broker.to_string(),
            version: "<no broker data>".to_string(),
        })?;
        let raw = data.local_data.broker_version.trim();
        Version::parse(raw).map_err(|_| BrokerFilterError::BadVersion {
            broker: broker.to_string(),
            version: raw.to_string(),
        })
    }
}

impl BrokerFilter for BrokerVersionFilter {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn filter(
        &self,
        brokers: &mut HashSet<String>,
        _bundle_data: &BundleData,
        load_data: &LoadData,
        conf: &LoadManagerConfig,
    ) -> Result<(), BrokerFilterError> {
        if !conf.prefer_later_versions || brokers.is_empty() {
            return Ok(());
        }

        let mut versions = Vec::with_capacity(brokers.len());
        for broker in brokers.iter() {
            versions.push((broker.clone(), Self::broker_version(broker, load_data)?));
        }
        let Some(latest) = versions.iter().map(|(_, v)| v).max().cloned() else {
            return Ok(());
        };
        debug!(latest = %latest, "latest broker version among candidates");

        for (broker, version) in versions {
            if version < latest {
                info!(broker = %broker, version = %version, latest = %latest, "dropping broker running an older version");
                brokers.remove(&broker);
            }
        }
        Ok(())
    }
}

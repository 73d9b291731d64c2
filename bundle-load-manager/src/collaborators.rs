//! Interfaces to the parts of the broker the load manager relies on but does not own.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

use crate::load_report::{BundleStats, SystemResourceUsage};
use crate::naming::NamespaceBundle;

/// Trait for providing leader election state
/// This allows the load manager to work with different leader election implementations
#[async_trait]
pub trait LeaderStateProvider: Send + Sync {
    async fn get_state(&self) -> LeaderState;
}

/// Leader election state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderState {
    Leading,
    Following,
}

/// Samples the host resources used by this broker.
#[async_trait]
pub trait BrokerHostUsage: Send + Sync {
    async fn system_resource_usage(&self) -> anyhow::Result<SystemResourceUsage>;
}

/// Current raw stats of every bundle served by this broker, keyed by bundle name.
#[async_trait]
pub trait BundleStatsProvider: Send + Sync {
    async fn bundle_stats(&self) -> anyhow::Result<HashMap<String, BundleStats>>;
}

/// Bundle addressing and ownership facts of the cluster.
#[async_trait]
pub trait NamespaceService: Send + Sync {
    fn get_bundle(&self, namespace: &str, range: &str) -> anyhow::Result<NamespaceBundle>;

    /// Whether the bundle's key range is still wide enough to be split.
    fn can_split_bundle(&self, bundle: &NamespaceBundle) -> bool;

    fn invalidate_bundle_cache(&self, namespace: &str);

    /// Number of bundles the namespace is currently divided into.
    fn bundle_count(&self, namespace: &str) -> usize;

    fn has_non_persistent_topic(&self, _bundle: &NamespaceBundle) -> bool {
        false
    }

    /// Names of every bundle currently owned by some broker of the cluster.
    async fn owned_bundles(&self) -> anyhow::Result<HashSet<String>>;
}

/// Namespace isolation, anti-affinity and failure-domain policies.
pub trait NamespacePolicies: Send + Sync {
    fn has_isolation_policy(&self, namespace: &str) -> bool;

    fn is_primary_broker(&self, namespace: &str, broker: &str) -> bool;

    fn is_secondary_broker(&self, namespace: &str, broker: &str) -> bool;

    /// Brokers available to namespaces without an isolation policy.
    fn is_shared_broker(&self, broker: &str) -> bool;

    fn should_failover_to_secondaries(&self, namespace: &str, primary_count: usize) -> bool;

    fn anti_affinity_group(&self, namespace: &str) -> anyhow::Result<Option<String>>;

    fn failure_domains_enabled(&self) -> bool {
        false
    }

    fn failure_domain_of(&self, _broker: &str) -> Option<String> {
        None
    }
}

/// Policies of a cluster without isolation groups: every broker is shared.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIsolationPolicies;

impl NamespacePolicies for NoIsolationPolicies {
    fn has_isolation_policy(&self, _namespace: &str) -> bool {
        false
    }

    fn is_primary_broker(&self, _namespace: &str, _broker: &str) -> bool {
        false
    }

    fn is_secondary_broker(&self, _namespace: &str, _broker: &str) -> bool {
        false
    }

    fn is_shared_broker(&self, _broker: &str) -> bool {
        true
    }

    fn should_failover_to_secondaries(&self, _namespace: &str, _primary_count: usize) -> bool {
        false
    }

    fn anti_affinity_group(&self, _namespace: &str) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
}

/// Administrative commands sent to the broker owning a bundle.
#[async_trait]
pub trait AdminClient: Send + Sync {
    async fn unload_namespace_bundle(
        &self,
        namespace: &str,
        range: &str,
        destination_broker: &str,
    ) -> anyhow::Result<()>;

    async fn split_namespace_bundle(
        &self,
        namespace: &str,
        range: &str,
        unload_split_bundles: bool,
    ) -> anyhow::Result<()>;
}

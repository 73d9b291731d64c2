use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bundle_metadata_store::{LockManager, MetadataStorage};
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

use crate::bundle_data::{default_bundle_stats, BundleData};
use crate::bundle_range_cache::BundleRangeCache;
use crate::collaborators::{
    AdminClient, BrokerHostUsage, BundleStatsProvider, LeaderState, LeaderStateProvider,
    NamespacePolicies, NamespaceService,
};
use crate::config::LoadManagerConfig;
use crate::load_data::LoadData;
use crate::load_report::{BundleStats, LocalBrokerData};
use crate::preallocation::PreallocationTable;
use crate::resources::{LoadBalanceResources, LOADBALANCE_BROKERS_ROOT};
use crate::strategy::Strategies;

/// The broker-side services the load manager talks to.
#[derive(Clone)]
pub struct LoadManagerCollaborators {
    pub leader: Arc<dyn LeaderStateProvider>,
    pub namespaces: Arc<dyn NamespaceService>,
    pub policies: Arc<dyn NamespacePolicies>,
    pub admin: Arc<dyn AdminClient>,
    pub host_usage: Arc<dyn BrokerHostUsage>,
    pub bundle_stats: Arc<dyn BundleStatsProvider>,
}

/// Running totals reported through the metrics snapshot.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) unload_broker_total: AtomicU64,
    pub(crate) unload_bundle_total: AtomicU64,
    pub(crate) bundles_split_total: AtomicU64,
}

impl Counters {
    pub(crate) fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// State shared by every component of one load manager instance.
pub(crate) struct LoadManagerContext {
    pub(crate) broker_id: String,
    pub(crate) conf: LoadManagerConfig,
    pub(crate) load_data: RwLock<LoadData>,
    pub(crate) preallocations: PreallocationTable,
    pub(crate) bundle_ranges: BundleRangeCache,
    pub(crate) resources: LoadBalanceResources,
    pub(crate) broker_locks: LockManager<LocalBrokerData>,
    pub(crate) collaborators: LoadManagerCollaborators,
    pub(crate) strategies: Strategies,
    pub(crate) default_stats: BundleStats,
    /// Roster observed by the previous aggregation cycle
    pub(crate) known_brokers: Mutex<HashSet<String>>,
    /// One-shot preferred destination per bundle
    pub(crate) bundle_affinity: DashMap<String, String>,
    pub(crate) counters: Counters,
}

impl LoadManagerContext {
    pub(crate) fn new(
        broker_id: String,
        conf: LoadManagerConfig,
        store: MetadataStorage,
        collaborators: LoadManagerCollaborators,
        strategies: Strategies,
    ) -> Self {
        LoadManagerContext {
            broker_id,
            conf,
            load_data: RwLock::new(LoadData::new()),
            preallocations: PreallocationTable::new(),
            bundle_ranges: BundleRangeCache::new(),
            resources: LoadBalanceResources::new(store.clone()),
            broker_locks: LockManager::new(store, LOADBALANCE_BROKERS_ROOT),
            collaborators,
            strategies,
            default_stats: default_bundle_stats(),
            known_brokers: Mutex::new(HashSet::new()),
            bundle_affinity: DashMap::new(),
            counters: Counters::default(),
        }
    }

    pub(crate) async fn is_leader(&self) -> bool {
        self.collaborators.leader.get_state().await == LeaderState::Leading
    }

    /// Brokers currently registered in the store.
    ///
    /// Falls back to the brokers of the in-memory view when the store is slow or unreachable.
    pub(crate) async fn get_available_brokers(&self) -> HashSet<String> {
        let listing =
            tokio::time::timeout(self.conf.operation_timeout(), self.broker_locks.list_locks()).await;
        match listing {
            Ok(Ok(brokers)) => brokers.into_iter().collect(),
            Ok(Err(err)) => {
                warn!(error = %err, "error when trying to get active brokers, using last known view");
                self.load_data.read().await.broker_ids().into_iter().collect()
            }
            Err(_) => {
                warn!("timed out listing active brokers, using last known view");
                self.load_data.read().await.broker_ids().into_iter().collect()
            }
        }
    }

    /// In-memory bundle data, else durable record or defaults; inserted into the view when absent.
    pub(crate) async fn bundle_data_or_default(&self, bundle: &str) -> BundleData {
        if let Some(data) = self.load_data.read().await.bundle(bundle) {
            return data.clone();
        }
        let fetched = self
            .resources
            .bundle_data_or_default(bundle, &self.default_stats)
            .await;
        let mut load_data = self.load_data.write().await;
        if let Some(existing) = load_data.bundle(bundle) {
            return existing.clone();
        }
        load_data.upsert_bundle(bundle, fetched.clone());
        fetched
    }
}

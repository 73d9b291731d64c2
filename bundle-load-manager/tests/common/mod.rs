//! Shared fixtures for the load manager integration tests: scriptable broker
//! services over one in-memory metadata store.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bundle_load_manager::{
    AdminClient, BrokerHostUsage, BundleStats, BundleStatsProvider, LeaderState,
    LeaderStateProvider, LoadBalanceResources, LoadManagerCollaborators, LoadManagerConfig,
    LoadManagerError, LocalBrokerData, ModularLoadManager, NamespaceBundle, NamespacePolicies,
    NamespaceService, NoIsolationPolicies, ResourceUsage, SystemResourceUsage,
};
use bundle_metadata_store::{LockManager, MemoryStore, MetadataStorage, ResourceLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

pub const BROKERS_ROOT: &str = "/loadbalance/brokers";

pub struct TestLeader {
    leading: AtomicBool,
}

impl TestLeader {
    pub fn set_leading(&self, leading: bool) {
        self.leading.store(leading, Ordering::SeqCst);
    }
}

#[async_trait]
impl LeaderStateProvider for TestLeader {
    async fn get_state(&self) -> LeaderState {
        if self.leading.load(Ordering::SeqCst) {
            LeaderState::Leading
        } else {
            LeaderState::Following
        }
    }
}

#[derive(Default)]
pub struct TestHostUsage {
    usage: Mutex<SystemResourceUsage>,
}

impl TestHostUsage {
    /// Every resource at `percent` of a limit of 100.
    pub fn set_percent(&self, percent: f64) {
        *self.usage.lock().unwrap() = uniform_usage(percent);
    }
}

#[async_trait]
impl BrokerHostUsage for TestHostUsage {
    async fn system_resource_usage(&self) -> anyhow::Result<SystemResourceUsage> {
        Ok(*self.usage.lock().unwrap())
    }
}

/// How the bundle stats source fails, when set.
#[derive(Debug, Clone, Copy)]
pub enum StatsFailure {
    ConcurrentModification,
    Unavailable,
}

#[derive(Default)]
pub struct TestBundleStats {
    stats: Mutex<HashMap<String, BundleStats>>,
    failure: Mutex<Option<StatsFailure>>,
}

impl TestBundleStats {
    pub fn set(&self, bundle: &str, stats: BundleStats) {
        self.stats.lock().unwrap().insert(bundle.to_string(), stats);
    }

    pub fn clear(&self) {
        self.stats.lock().unwrap().clear();
    }

    pub fn fail_with(&self, failure: Option<StatsFailure>) {
        *self.failure.lock().unwrap() = failure;
    }
}

#[async_trait]
impl BundleStatsProvider for TestBundleStats {
    async fn bundle_stats(&self) -> anyhow::Result<HashMap<String, BundleStats>> {
        match *self.failure.lock().unwrap() {
            Some(StatsFailure::ConcurrentModification) => {
                return Err(LoadManagerError::ConcurrentModification(
                    "bundle stats changed while sampling".to_string(),
                )
                .into())
            }
            Some(StatsFailure::Unavailable) => return Err(anyhow!("bundle stats unavailable")),
            None => {}
        }
        Ok(self.stats.lock().unwrap().clone())
    }
}

/// Namespace service whose ownership view is set by the test.
pub struct TestNamespaces {
    owned: Mutex<HashSet<String>>,
    splittable: AtomicBool,
    fail_owned: AtomicBool,
    pub invalidated: Mutex<Vec<String>>,
}

impl TestNamespaces {
    pub fn set_owned(&self, bundles: &[&str]) {
        *self.owned.lock().unwrap() = bundles.iter().map(|b| b.to_string()).collect();
    }

    pub fn set_splittable(&self, splittable: bool) {
        self.splittable.store(splittable, Ordering::SeqCst);
    }

    pub fn fail_owned_bundles(&self, fail: bool) {
        self.fail_owned.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl NamespaceService for TestNamespaces {
    fn get_bundle(&self, namespace: &str, range: &str) -> anyhow::Result<NamespaceBundle> {
        if namespace.is_empty() || range.is_empty() {
            return Err(anyhow!("unknown bundle {}/{}", namespace, range));
        }
        Ok(NamespaceBundle::new(namespace, range))
    }

    fn can_split_bundle(&self, _bundle: &NamespaceBundle) -> bool {
        self.splittable.load(Ordering::SeqCst)
    }

    fn invalidate_bundle_cache(&self, namespace: &str) {
        self.invalidated.lock().unwrap().push(namespace.to_string());
    }

    fn bundle_count(&self, _namespace: &str) -> usize {
        1
    }

    async fn owned_bundles(&self) -> anyhow::Result<HashSet<String>> {
        if self.fail_owned.load(Ordering::SeqCst) {
            return Err(anyhow!("ownership cache unavailable"));
        }
        Ok(self.owned.lock().unwrap().clone())
    }
}

/// Records every admin command; split calls also record whether the bundle's
/// durable record still existed when the command was issued.
pub struct TestAdmin {
    resources: LoadBalanceResources,
    pub unloads: Mutex<Vec<(String, String)>>,
    pub splits: Mutex<Vec<(String, bool, bool)>>,
}

#[async_trait]
impl AdminClient for TestAdmin {
    async fn unload_namespace_bundle(
        &self,
        namespace: &str,
        range: &str,
        destination_broker: &str,
    ) -> anyhow::Result<()> {
        self.unloads.lock().unwrap().push((
            format!("{}/{}", namespace, range),
            destination_broker.to_string(),
        ));
        Ok(())
    }

    async fn split_namespace_bundle(
        &self,
        namespace: &str,
        range: &str,
        unload_split_bundles: bool,
    ) -> anyhow::Result<()> {
        let bundle = format!("{}/{}", namespace, range);
        let record_present = self.resources.get_bundle_data(&bundle).await?.is_some();
        self.splits
            .lock()
            .unwrap()
            .push((bundle, unload_split_bundles, record_present));
        Ok(())
    }
}

/// One simulated cluster: a shared store plus the services of the broker under test.
pub struct Harness {
    pub memory: MemoryStore,
    pub store: MetadataStorage,
    pub leader: Arc<TestLeader>,
    pub host_usage: Arc<TestHostUsage>,
    pub bundle_stats: Arc<TestBundleStats>,
    pub namespaces: Arc<TestNamespaces>,
    pub admin: Arc<TestAdmin>,
    pub policies: Arc<dyn NamespacePolicies>,
    broker_locks: LockManager<LocalBrokerData>,
}

impl Harness {
    pub async fn new() -> Result<Self> {
        init_tracing();
        let memory = MemoryStore::new().await?;
        let store: MetadataStorage = Arc::new(memory.clone());
        let namespaces = Arc::new(TestNamespaces {
            owned: Mutex::new(HashSet::new()),
            splittable: AtomicBool::new(true),
            fail_owned: AtomicBool::new(false),
            invalidated: Mutex::new(Vec::new()),
        });
        let admin = Arc::new(TestAdmin {
            resources: LoadBalanceResources::new(store.clone()),
            unloads: Mutex::new(Vec::new()),
            splits: Mutex::new(Vec::new()),
        });

        Ok(Harness {
            memory,
            store: store.clone(),
            leader: Arc::new(TestLeader {
                leading: AtomicBool::new(true),
            }),
            host_usage: Arc::new(TestHostUsage::default()),
            bundle_stats: Arc::new(TestBundleStats::default()),
            namespaces,
            admin,
            policies: Arc::new(NoIsolationPolicies),
            broker_locks: LockManager::new(store, BROKERS_ROOT),
        })
    }

    pub fn collaborators(&self) -> LoadManagerCollaborators {
        LoadManagerCollaborators {
            leader: self.leader.clone(),
            namespaces: self.namespaces.clone(),
            policies: self.policies.clone(),
            admin: self.admin.clone(),
            host_usage: self.host_usage.clone(),
            bundle_stats: self.bundle_stats.clone(),
        }
    }

    pub fn manager(&self, broker: &str, conf: LoadManagerConfig) -> Result<ModularLoadManager> {
        Ok(ModularLoadManager::new(
            broker,
            conf,
            self.store.clone(),
            self.collaborators(),
        )?)
    }

    pub fn resources(&self) -> LoadBalanceResources {
        LoadBalanceResources::new(self.store.clone())
    }

    /// Registers a peer broker with `data` as its published snapshot.
    pub async fn register_broker(
        &self,
        broker: &str,
        data: &LocalBrokerData,
    ) -> Result<ResourceLock<LocalBrokerData>> {
        Ok(self.broker_locks.acquire_lock(broker, data).await?)
    }
}

/// Logs go to the test writer, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn uniform_usage(percent: f64) -> SystemResourceUsage {
    let usage = ResourceUsage::new(percent, 100.0);
    SystemResourceUsage {
        cpu: usage,
        memory: usage,
        direct_memory: usage,
        bandwidth_in: usage,
        bandwidth_out: usage,
    }
}

/// A peer snapshot compatible with the default configuration.
pub fn broker_snapshot(percent: f64) -> LocalBrokerData {
    let mut data = LocalBrokerData::new("1.0.0", "modular_load_manager", true, true);
    data.update(uniform_usage(percent), HashMap::new());
    data
}

/// A peer snapshot owning `bundles`, each reporting `stats`.
pub fn broker_snapshot_with_bundles(
    percent: f64,
    bundles: &[&str],
    stats: BundleStats,
) -> LocalBrokerData {
    let mut data = LocalBrokerData::new("1.0.0", "modular_load_manager", true, true);
    let last_stats = bundles
        .iter()
        .map(|bundle| (bundle.to_string(), stats))
        .collect();
    data.update(uniform_usage(percent), last_stats);
    data
}

pub fn stats(msg_rate_in: f64, msg_throughput_in: f64) -> BundleStats {
    BundleStats {
        msg_rate_in,
        msg_throughput_in,
        topics: 1,
        ..Default::default()
    }
}

/// Defaults with history smoothing disabled so one cycle reflects one sample.
pub fn test_config() -> LoadManagerConfig {
    LoadManagerConfig {
        history_resource_percentage: 0.0,
        metadata_operation_timeout_seconds: 5,
        ..Default::default()
    }
}

use std::collections::HashSet;
use std::sync::Arc;

use bundle_metadata_store::MetadataStorage;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::aggregator::Aggregator;
use crate::bundle_data::TimeAverageBrokerData;
use crate::config::LoadManagerConfig;
use crate::context::{Counters, LoadManagerCollaborators, LoadManagerContext};
use crate::errors::Result;
use crate::lb_metrics::LoadBalancingMetrics;
use crate::load_data::LoadData;
use crate::load_report::LocalBrokerData;
use crate::local_reporter::LocalReporter;
use crate::naming::NamespaceBundle;
use crate::placement::PlacementEngine;
use crate::shedding::{SheddingLoop, SheddingOutcome};
use crate::split::SplitLoop;
use crate::strategy::Strategies;
use crate::worker::BackgroundTasks;

/// ModularLoadManager - per-broker entry point of cluster load management
///
/// Every broker runs one instance. It:
/// - samples and publishes this broker's load under `/loadbalance/brokers/<broker_id>`
/// - aggregates every broker's published load into an in-memory view
/// - places bundles on brokers, remembering each decision until the destination confirms it
/// - as leader, sheds load from hot brokers and splits oversized bundles
///
/// Shedding, split checks and publishing are driven by the caller's timers; aggregation
/// is driven by store notifications once [`ModularLoadManager::start`] has run.
#[derive(Clone)]
pub struct ModularLoadManager {
    ctx: Arc<LoadManagerContext>,
    reporter: Arc<LocalReporter>,
    placement: Arc<PlacementEngine>,
    aggregator: Arc<Aggregator>,
    shedding: Arc<SheddingLoop>,
    split: Arc<SplitLoop>,
    store: MetadataStorage,
    background: Arc<Mutex<Option<BackgroundTasks>>>,
}

impl ModularLoadManager {
    /// Resolves the strategies of `conf` by name, then builds through `with_strategies`.
    pub fn new(
        broker_id: impl Into<String>,
        conf: LoadManagerConfig,
        store: MetadataStorage,
        collaborators: LoadManagerCollaborators,
    ) -> Result<Self> {
        let strategies = Strategies::from_config(&conf)?;
        Self::with_strategies(broker_id, conf, store, collaborators, strategies)
    }

    /// Builds a manager around explicitly bound strategies.
    pub fn with_strategies(
        broker_id: impl Into<String>,
        conf: LoadManagerConfig,
        store: MetadataStorage,
        collaborators: LoadManagerCollaborators,
        strategies: Strategies,
    ) -> Result<Self> {
        conf.validate()?;
        let ctx = Arc::new(LoadManagerContext::new(
            broker_id.into(),
            conf,
            store.clone(),
            collaborators,
            strategies,
        ));

        let reporter = Arc::new(LocalReporter::new(ctx.clone()));
        let placement = Arc::new(PlacementEngine::new(ctx.clone()));
        let split = Arc::new(SplitLoop::new(ctx.clone(), reporter.clone(), placement.clone()));
        let aggregator = Arc::new(Aggregator::new(ctx.clone(), split.clone()));
        let shedding = Arc::new(SheddingLoop::new(ctx.clone(), placement.clone()));

        Ok(ModularLoadManager {
            ctx,
            reporter,
            placement,
            aggregator,
            shedding,
            split,
            store,
            background: Arc::new(Mutex::new(None)),
        })
    }

    pub fn broker_id(&self) -> &str {
        &self.ctx.broker_id
    }

    /// Registers this broker and starts the background aggregation.
    ///
    /// Fails when another process already holds this broker's snapshot lock.
    pub async fn start(&self) -> Result<()> {
        let mut background = self.background.lock().await;
        if background.is_some() {
            return Ok(());
        }

        self.reporter.update_local_broker_data().await?;
        self.reporter.acquire_broker_lock().await?;
        self.ctx
            .resources
            .update_time_average_broker_data(&self.ctx.broker_id, &TimeAverageBrokerData::default())
            .await?;

        self.aggregator.update_all().await;

        *background = Some(
            BackgroundTasks::spawn(
                self.ctx.clone(),
                self.aggregator.clone(),
                self.reporter.clone(),
                self.store.clone(),
            )
            .await?,
        );
        info!(broker_id = %self.ctx.broker_id, "load manager started");
        Ok(())
    }

    /// Cancels the background tasks and releases the snapshot lock, best effort.
    pub async fn stop(&self) {
        if let Some(background) = self.background.lock().await.take() {
            background.shutdown();
        }
        if let Err(err) = self.reporter.release_broker_lock().await {
            warn!(broker_id = %self.ctx.broker_id, error = %err, "failed to release broker data lock on stop");
        }
        info!(broker_id = %self.ctx.broker_id, "load manager stopped");
    }

    /// Removes this broker from the roster while keeping the manager usable.
    pub async fn disable_broker(&self) -> Result<()> {
        self.reporter.release_broker_lock().await
    }

    /// Runs one aggregation cycle now.
    pub async fn update_all(&self) {
        self.aggregator.update_all().await;
    }

    /// Queues an aggregation cycle on the background worker.
    pub async fn trigger_update(&self) {
        if let Some(background) = self.background.lock().await.as_ref() {
            background.trigger();
        }
    }

    pub async fn select_broker_for_assignment(&self, bundle: &NamespaceBundle) -> Option<String> {
        self.placement.select_broker_for_assignment(bundle).await
    }

    /// Picks a broker for `bundle` without preallocating it.
    pub async fn select_broker(&self, bundle: &NamespaceBundle) -> Option<String> {
        self.placement.select_broker(bundle).await
    }

    pub async fn update_local_broker_data(&self) -> Result<LocalBrokerData> {
        self.reporter.update_local_broker_data().await
    }

    /// Samples and publishes this broker's data when forced or changed enough; returns whether it was written.
    pub async fn publish_if_due(&self, force: bool) -> Result<bool> {
        self.reporter.publish_if_due(force).await
    }

    pub async fn run_shedding(&self) -> SheddingOutcome {
        self.shedding.run().await
    }

    /// Returns the number of bundles a split was requested for.
    pub async fn run_split_check(&self) -> usize {
        self.split.run().await
    }

    pub async fn write_bundle_data_to_store(&self) {
        self.aggregator.write_bundle_data_to_store().await;
    }

    pub async fn get_available_brokers(&self) -> HashSet<String> {
        self.ctx.get_available_brokers().await
    }

    /// Sets (or with `None` clears) the one-shot preferred broker of `bundle`; returns the previous one.
    pub fn set_bundle_broker_affinity(&self, bundle: &str, broker: Option<&str>) -> Option<String> {
        match broker.filter(|broker| !broker.trim().is_empty()) {
            Some(broker) => self
                .ctx
                .bundle_affinity
                .insert(bundle.to_string(), broker.to_string()),
            None => self
                .ctx
                .bundle_affinity
                .remove(bundle)
                .map(|(_, broker)| broker),
        }
    }

    /// Latest published snapshot of any broker; None when absent or unreadable.
    pub async fn get_broker_local_data(&self, broker: &str) -> Option<LocalBrokerData> {
        match self.ctx.broker_locks.read_lock(broker).await {
            Ok(data) => data,
            Err(err) => {
                warn!(broker_id = %broker, error = %err, "failed to read broker data");
                None
            }
        }
    }

    pub async fn metrics(&self) -> LoadBalancingMetrics {
        let local = self.reporter.local_data().await;
        let counters = &self.ctx.counters;
        LoadBalancingMetrics {
            unload_broker_total: Counters::get(&counters.unload_broker_total),
            unload_bundle_total: Counters::get(&counters.unload_bundle_total),
            bundles_split_total: Counters::get(&counters.bundles_split_total),
            ..LoadBalancingMetrics::from_local_data(&self.ctx.broker_id, &local, &self.ctx.conf)
        }
    }

    /// Copy of the current in-memory load view.
    pub async fn load_data(&self) -> LoadData {
        self.ctx.load_data.read().await.clone()
    }

    /// Broker `bundle` is tentatively assigned to, if any.
    pub fn preallocated_broker(&self, bundle: &str) -> Option<String> {
        self.ctx.preallocations.get(bundle)
    }
}

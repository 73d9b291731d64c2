use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::bundle_data::{BundleData, TimeAverageBrokerData};
use crate::context::LoadManagerContext;
use crate::load_report::LocalBrokerData;
use crate::naming::namespace_of;
use crate::split::SplitLoop;

/// Folds the snapshots published by every broker into the in-memory load view.
///
/// One cycle runs, in order: liveness diff, broker refresh, bundle refresh, split check.
pub(crate) struct Aggregator {
    ctx: Arc<LoadManagerContext>,
    split: Arc<SplitLoop>,
    /// Buffer for the top-K selection of the durable write-back
    top_k: Mutex<Vec<(String, BundleData)>>,
}

impl Aggregator {
    pub(crate) fn new(ctx: Arc<LoadManagerContext>, split: Arc<SplitLoop>) -> Self {
        Aggregator {
            ctx,
            split,
            top_k: Mutex::new(Vec::new()),
        }
    }

    /// Runs one full aggregation cycle.
    pub(crate) async fn update_all(&self) {
        self.cleanup_dead_brokers().await;
        self.update_all_broker_data().await;
        self.update_bundle_data().await;
        self.split.run().await;
    }

    /// Diffs the live roster against the brokers seen by the previous cycle.
    pub(crate) async fn cleanup_dead_brokers(&self) -> Vec<String> {
        let active = self.ctx.get_available_brokers().await;

        let dead: Vec<String> = {
            let mut known = self.ctx.known_brokers.lock().await;
            let dead = known.difference(&active).cloned().collect();
            *known = active.clone();
            dead
        };

        let purged = self.ctx.preallocations.purge_brokers_not_in(&active);
        if !purged.is_empty() {
            debug!(bundles = ?purged, "dropped preallocations of brokers that left");
        }
        self.ctx.bundle_ranges.retain_brokers(&active);

        if self.ctx.is_leader().await {
            for broker in &dead {
                info!(broker_id = %broker, "broker is no longer alive, deleting its time average data");
                if let Err(err) = self
                    .ctx
                    .resources
                    .delete_time_average_broker_data(broker)
                    .await
                {
                    warn!(broker_id = %broker, error = %err, "failed to delete time average data of dead broker");
                }
            }
            let strategies = &self.ctx.strategies;
            strategies.shedding.on_active_brokers_change(&active);
            strategies.placement.on_active_brokers_change(&active);
        }
        dead
    }

    /// Replaces each live broker's record with its latest published snapshot.
    pub(crate) async fn update_all_broker_data(&self) {
        let active = self.ctx.get_available_brokers().await;
        let timeout = self.ctx.conf.operation_timeout();

        let mut snapshots: Vec<(String, Option<LocalBrokerData>)> = Vec::with_capacity(active.len());
        for broker in &active {
            match tokio::time::timeout(timeout, self.ctx.broker_locks.read_lock(broker)).await {
                Ok(Ok(snapshot)) => snapshots.push((broker.clone(), snapshot)),
                Ok(Err(err)) => {
                    warn!(broker_id = %broker, error = %err, "error reading broker data from metadata store");
                }
                Err(_) => {
                    warn!(broker_id = %broker, "timed out reading broker data from metadata store");
                }
            }
        }

        let mut load_data = self.ctx.load_data.write().await;
        for (broker, snapshot) in snapshots {
            match snapshot {
                Some(local_data) => load_data.upsert_broker(&broker, local_data),
                None => {
                    if load_data.remove_broker(&broker).is_some() {
                        info!(broker_id = %broker, "broker has no published data yet, removing its record");
                    }
                }
            }
        }
        for broker in load_data.broker_ids() {
            if !active.contains(&broker) {
                info!(broker_id = %broker, "removing record of inactive broker");
                load_data.remove_broker(&broker);
            }
        }
    }

    /// Folds each broker's last bundle stats into the bundle history and reconciles preallocations.
    pub(crate) async fn update_bundle_data(&self) {
        let owned = match self.ctx.collaborators.namespaces.owned_bundles().await {
            Ok(owned) => Some(owned),
            Err(err) => {
                warn!(error = %err, "failed to list owned bundles, keeping preallocations");
                None
            }
        };

        // store lookups happen before the view is locked for writing
        let unseen: Vec<String> = {
            let load_data = self.ctx.load_data.read().await;
            let mut unseen: HashSet<String> = HashSet::new();
            for record in load_data.broker_data().values() {
                for bundle in record.local_data.last_stats.keys() {
                    if load_data.bundle(bundle).is_none() {
                        unseen.insert(bundle.clone());
                    }
                }
            }
            unseen.into_iter().collect()
        };
        let mut fetched: HashMap<String, BundleData> = HashMap::with_capacity(unseen.len());
        for bundle in unseen {
            let data = self
                .ctx
                .resources
                .bundle_data_or_default(&bundle, &self.ctx.default_stats)
                .await;
            fetched.insert(bundle, data);
        }

        let inactive = {
            let mut load_data = self.ctx.load_data.write().await;
            let mut active_bundles: HashSet<String> = HashSet::new();

            for broker in load_data.broker_ids() {
                let Some(stats) = load_data
                    .broker(&broker)
                    .map(|record| record.local_data.last_stats.clone())
                else {
                    continue;
                };

                for (bundle, sample) in &stats {
                    active_bundles.insert(bundle.clone());
                    match load_data.bundle_mut(bundle) {
                        Some(data) => data.update(sample),
                        None => {
                            let mut data = fetched.remove(bundle).unwrap_or_else(|| {
                                BundleData::with_default_windows(&self.ctx.default_stats)
                            });
                            data.update(sample);
                            load_data.upsert_bundle(bundle, data);
                        }
                    }
                }

                let confirmed: HashSet<String> = load_data
                    .broker(&broker)
                    .map(|record| {
                        record
                            .local_data
                            .bundles
                            .iter()
                            .filter(|bundle| load_data.bundle(bundle).is_some())
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();

                let mut time_average = TimeAverageBrokerData::default();
                time_average.reset(stats.keys(), load_data.bundle_data(), &self.ctx.default_stats);

                let Some(record) = load_data.broker_mut(&broker) else {
                    continue;
                };

                let mut dropped = Vec::new();
                record.preallocated_bundle_data.retain(|bundle, _| {
                    let not_owned = owned
                        .as_ref()
                        .is_some_and(|owned| !owned.contains(bundle));
                    let keep = !(not_owned || confirmed.contains(bundle));
                    if !keep {
                        dropped.push(bundle.clone());
                    }
                    keep
                });
                for bundle in &dropped {
                    self.ctx.preallocations.remove(bundle);
                }

                record.time_average_data = time_average;

                self.ctx.bundle_ranges.reload_from_bundles(
                    &broker,
                    stats.keys().chain(record.preallocated_bundle_data.keys()),
                );
            }

            // entries whose destination had no record when preallocated live only in the table
            let view = &*load_data;
            let dropped = self.ctx.preallocations.retain(|bundle, broker| {
                let not_owned = owned
                    .as_ref()
                    .is_some_and(|owned| !owned.contains(bundle));
                let confirmed = view.bundle(bundle).is_some()
                    && view
                        .broker(broker)
                        .is_some_and(|record| record.local_data.bundles.contains(bundle));
                !(not_owned || confirmed)
            });
            for bundle in &dropped {
                debug!(bundle = %bundle, "dropped settled preallocation");
            }

            let inactive: Vec<String> = load_data
                .bundle_ids()
                .into_iter()
                .filter(|bundle| !active_bundles.contains(bundle))
                .collect();
            for bundle in &inactive {
                load_data.remove_bundle(bundle);
            }
            inactive
        };

        if !inactive.is_empty() && self.ctx.is_leader().await {
            for bundle in &inactive {
                if let Err(err) = self.ctx.resources.delete_bundle_data(bundle).await {
                    warn!(bundle = %bundle, error = %err, "failed to delete data of inactive bundle");
                }
            }
        }
    }

    /// Persists the heaviest bundles and every broker's time average.
    pub(crate) async fn write_bundle_data_to_store(&self) {
        self.update_bundle_data().await;

        {
            let mut top_k = self.top_k.lock().await;
            let limit = {
                let load_data = self.ctx.load_data.read().await;
                let excluded = &self.ctx.conf.shedding.excluded_namespaces;
                top_k.clear();
                top_k.extend(
                    load_data
                        .bundle_data()
                        .iter()
                        .filter(|(bundle, _)| !excluded.contains(namespace_of(bundle)))
                        .map(|(bundle, data)| (bundle.clone(), data.clone())),
                );
                let per_broker = self.ctx.conf.max_bundles_in_bundle_load_report;
                if per_broker == 0 {
                    top_k.len()
                } else {
                    per_broker * load_data.broker_data().len().max(1)
                }
            };

            top_k.sort_by(|(a_name, a), (b_name, b)| {
                b.short_term_data
                    .total_msg_throughput()
                    .total_cmp(&a.short_term_data.total_msg_throughput())
                    .then_with(|| {
                        b.long_term_data
                            .total_msg_throughput()
                            .total_cmp(&a.long_term_data.total_msg_throughput())
                    })
                    .then_with(|| {
                        b.short_term_data
                            .total_msg_rate()
                            .total_cmp(&a.short_term_data.total_msg_rate())
                    })
                    .then_with(|| a_name.cmp(b_name))
            });

            for (bundle, data) in top_k.iter().take(limit) {
                if let Err(err) = self.ctx.resources.update_bundle_data(bundle, data).await {
                    warn!(bundle = %bundle, error = %err, "error writing bundle data to metadata store");
                }
            }
            top_k.clear();
        }

        let averages: Vec<(String, _)> = {
            let load_data = self.ctx.load_data.read().await;
            load_data
                .broker_data()
                .iter()
                .map(|(broker, record)| (broker.clone(), record.time_average_data.clone()))
                .collect()
        };
        for (broker, average) in averages {
            if let Err(err) = self
                .ctx
                .resources
                .update_time_average_broker_data(&broker, &average)
                .await
            {
                warn!(broker_id = %broker, error = %err, "error writing time average broker data to metadata store");
            }
        }
    }
}

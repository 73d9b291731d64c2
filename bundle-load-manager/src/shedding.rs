use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::context::LoadManagerContext;
use crate::lb_metrics;
use crate::naming::{namespace_of, range_of};
use crate::placement::PlacementEngine;
use crate::utils::now_millis;

/// Outcome of one shedding pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SheddingOutcome {
    /// (bundle, source broker, destination broker) of every unload issued
    pub unloaded: Vec<(String, String, String)>,
    pub brokers_unloaded: u64,
}

/// Leader-side loop moving bundles off brokers the shedding strategy considers hot.
pub(crate) struct SheddingLoop {
    ctx: Arc<LoadManagerContext>,
    placement: Arc<PlacementEngine>,
    running: Mutex<()>,
}

impl SheddingLoop {
    pub(crate) fn new(ctx: Arc<LoadManagerContext>, placement: Arc<PlacementEngine>) -> Self {
        SheddingLoop {
            ctx,
            placement,
            running: Mutex::new(()),
        }
    }

    pub(crate) async fn run(&self) -> SheddingOutcome {
        let _running = self.running.lock().await;
        let conf = &self.ctx.conf;
        let mut outcome = SheddingOutcome::default();

        if !conf.shedding.enabled || !self.ctx.is_leader().await {
            return outcome;
        }
        if self.ctx.get_available_brokers().await.len() <= 1 {
            info!("only 1 broker available, no load shedding will be performed");
            return outcome;
        }

        let strategy = &self.ctx.strategies.shedding;
        let proposal = {
            let mut load_data = self.ctx.load_data.write().await;
            load_data
                .prune_unloads_older_than(now_millis().saturating_sub(conf.grace_period_millis()));
            strategy.find_bundles_for_unloading(&load_data, conf)
        };

        for (broker, bundles) in proposal {
            let mut unloaded_from_broker = false;
            for bundle_name in bundles {
                let namespace = namespace_of(&bundle_name);
                let range = range_of(&bundle_name);
                if conf.shedding.excluded_namespaces.contains(namespace) {
                    debug!(strategy = strategy.name(), namespace = %namespace, "skipping load shedding for excluded namespace");
                    continue;
                }

                let bundle = match self.ctx.collaborators.namespaces.get_bundle(namespace, range) {
                    Ok(bundle) => bundle,
                    Err(err) => {
                        warn!(bundle = %bundle_name, error = %err, "failed to resolve bundle for unloading");
                        continue;
                    }
                };
                if !self
                    .placement
                    .should_namespace_policies_unload(&bundle, &broker)
                    .await
                {
                    debug!(bundle = %bundle_name, broker_id = %broker, "no other broker satisfies the namespace policies");
                    continue;
                }
                if !self
                    .placement
                    .should_anti_affinity_namespace_unload(&bundle, &broker)
                    .await
                {
                    debug!(bundle = %bundle_name, broker_id = %broker, "unloading would not improve anti-affinity spreading");
                    continue;
                }

                let Some(destination) = self.placement.select_broker(&bundle).await else {
                    info!(strategy = strategy.name(), bundle = %bundle_name, broker_id = %broker, "no broker available to unload bundle");
                    continue;
                };
                if destination == broker {
                    warn!(strategy = strategy.name(), bundle = %bundle_name, broker_id = %broker, "destination broker is the current owner, skipping");
                    continue;
                }

                info!(
                    strategy = strategy.name(),
                    bundle = %bundle_name,
                    broker_id = %broker,
                    destination = %destination,
                    "unloading bundle"
                );
                match self
                    .ctx
                    .collaborators
                    .admin
                    .unload_namespace_bundle(namespace, range, &destination)
                    .await
                {
                    Ok(()) => {
                        self.ctx
                            .load_data
                            .write()
                            .await
                            .record_unload(&bundle_name, now_millis());
                        self.ctx
                            .counters
                            .unload_bundle_total
                            .fetch_add(1, Ordering::Relaxed);
                        unloaded_from_broker = true;
                        outcome
                            .unloaded
                            .push((bundle_name.clone(), broker.clone(), destination));
                    }
                    Err(err) => {
                        warn!(bundle = %bundle_name, broker_id = %broker, error = %err, "error when trying to perform load shedding");
                    }
                }
            }
            if unloaded_from_broker {
                outcome.brokers_unloaded += 1;
                self.ctx
                    .counters
                    .unload_broker_total
                    .fetch_add(1, Ordering::Relaxed);
            }
        }

        lb_metrics::record_unloads(outcome.brokers_unloaded, outcome.unloaded.len() as u64);
        outcome
    }
}

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::context::LoadManagerContext;
use crate::lb_metrics;
use crate::local_reporter::LocalReporter;
use crate::naming::{namespace_of, range_of};
use crate::placement::PlacementEngine;

/// Leader-side loop splitting bundles that outgrew the configured limits.
pub(crate) struct SplitLoop {
    ctx: Arc<LoadManagerContext>,
    reporter: Arc<LocalReporter>,
    placement: Arc<PlacementEngine>,
    running: Mutex<()>,
}

impl SplitLoop {
    pub(crate) fn new(
        ctx: Arc<LoadManagerContext>,
        reporter: Arc<LocalReporter>,
        placement: Arc<PlacementEngine>,
    ) -> Self {
        SplitLoop {
            ctx,
            reporter,
            placement,
            running: Mutex::new(()),
        }
    }

    /// Splits every bundle the split strategy proposes; returns the number of split commands issued.
    pub(crate) async fn run(&self) -> usize {
        let conf = &self.ctx.conf;
        if !conf.split.auto_bundle_split_enabled || !self.ctx.is_leader().await {
            return 0;
        }
        if self.ctx.known_brokers.lock().await.len() <= 1 {
            debug!("fewer than two brokers known, skipping bundle split check");
            return 0;
        }

        let _running = self.running.lock().await;
        let namespaces = self.ctx.collaborators.namespaces.as_ref();
        let to_split = {
            let load_data = self.ctx.load_data.read().await;
            self.ctx
                .strategies
                .split
                .find_bundles_to_split(&load_data, namespaces, conf)
        };

        let mut split_count = 0;
        for (bundle_name, broker) in to_split {
            let namespace = namespace_of(&bundle_name);
            let range = range_of(&bundle_name);
            let bundle = match namespaces.get_bundle(namespace, range) {
                Ok(bundle) => bundle,
                Err(err) => {
                    warn!(bundle = %bundle_name, error = %err, "failed to resolve bundle for split");
                    continue;
                }
            };
            if !namespaces.can_split_bundle(&bundle) {
                debug!(bundle = %bundle_name, "bundle can no longer be split");
                continue;
            }

            // forget the bundle so that it is not picked again before the split lands
            {
                let mut load_data = self.ctx.load_data.write().await;
                load_data.remove_bundle(&bundle_name);
                if let Some(record) = load_data.broker_mut(&broker) {
                    record.local_data.last_stats.remove(&bundle_name);
                }
            }
            self.reporter.remove_last_stats(&bundle_name).await;
            namespaces.invalidate_bundle_cache(namespace);
            self.ctx.bundle_ranges.invalidate_namespace(namespace);
            if let Err(err) = self.ctx.resources.delete_bundle_data(&bundle_name).await {
                warn!(bundle = %bundle_name, error = %err, "failed to delete bundle data from metadata store");
            }

            let unload = conf.split.auto_unload_split_bundles
                && self
                    .placement
                    .should_namespace_policies_unload(&bundle, &broker)
                    .await
                && self
                    .placement
                    .should_anti_affinity_namespace_unload(&bundle, &broker)
                    .await;

            info!(bundle = %bundle_name, broker_id = %broker, unload, "splitting bundle");
            match self
                .ctx
                .collaborators
                .admin
                .split_namespace_bundle(namespace, range, unload)
                .await
            {
                Ok(()) => {
                    split_count += 1;
                    info!(bundle = %bundle_name, "successfully split namespace bundle");
                }
                Err(err) => {
                    error!(bundle = %bundle_name, error = %err, "failed to split namespace bundle");
                }
            }
        }

        if split_count > 0 {
            self.ctx
                .counters
                .bundles_split_total
                .fetch_add(split_count as u64, Ordering::Relaxed);
        }
        lb_metrics::record_splits(split_count as u64);
        split_count
    }
}

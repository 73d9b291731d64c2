use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bundle_metadata_store::ResourceLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::LoadManagerConfig;
use crate::context::LoadManagerContext;
use crate::errors::{LoadManagerError, Result};
use crate::lb_metrics;
use crate::load_report::LocalBrokerData;
use crate::utils::now_millis;

/// Percentage change from `old` to `new`; a change from zero is unbounded unless both are zero.
pub fn percent_change(old: f64, new: f64) -> f64 {
    if old == 0.0 {
        if new == 0.0 {
            return 0.0;
        }
        return f64::INFINITY;
    }
    100.0 * ((old - new) / old).abs()
}

/// Whether `local` differs enough from `last` (or is old enough) to be published at `now_millis`.
pub fn should_publish(
    local: &LocalBrokerData,
    last: &LocalBrokerData,
    conf: &LoadManagerConfig,
    now_millis: u64,
) -> bool {
    let since_last_publish = now_millis.saturating_sub(local.last_update);
    if since_last_publish > conf.report_max_interval_millis() {
        info!(
            max_interval_minutes = conf.report_update_max_interval_minutes,
            "publishing local data because the maximum interval elapsed"
        );
        return true;
    }

    let weights = &conf.resource_weights;
    let max_change = [
        percent_change(last.total_msg_rate(), local.total_msg_rate()),
        percent_change(last.total_msg_throughput(), local.total_msg_throughput()),
        percent_change(last.num_bundles as f64, local.num_bundles as f64),
        100.0
            * (last.max_resource_usage_with_weight(weights)
                - local.max_resource_usage_with_weight(weights))
            .abs(),
    ]
    .into_iter()
    .fold(0.0, f64::max);

    if max_change > conf.report_update_threshold_percentage {
        info!(
            max_change,
            threshold = conf.report_update_threshold_percentage,
            seconds_since_last_publish = since_last_publish as f64 / 1000.0,
            "publishing local data because the change exceeded the threshold"
        );
        return true;
    }
    false
}

struct ReporterState {
    /// Current sample
    local: LocalBrokerData,
    /// Snapshot as last published
    last: LocalBrokerData,
}

/// Samples this broker's load and publishes it when it changed enough.
pub(crate) struct LocalReporter {
    ctx: Arc<LoadManagerContext>,
    state: Mutex<ReporterState>,
    broker_lock: Mutex<Option<ResourceLock<LocalBrokerData>>>,
    session_connected: AtomicBool,
}

impl LocalReporter {
    pub(crate) fn new(ctx: Arc<LoadManagerContext>) -> Self {
        let snapshot = LocalBrokerData::new(
            ctx.conf.broker_version.clone(),
            ctx.conf.load_manager_class_name.clone(),
            ctx.conf.enable_persistent_topics,
            ctx.conf.enable_non_persistent_topics,
        );
        LocalReporter {
            ctx,
            state: Mutex::new(ReporterState {
                local: snapshot.clone(),
                last: snapshot,
            }),
            broker_lock: Mutex::new(None),
            session_connected: AtomicBool::new(true),
        }
    }

    pub(crate) fn set_session_connected(&self, connected: bool) {
        self.session_connected.store(connected, Ordering::SeqCst);
    }

    pub(crate) fn is_session_connected(&self) -> bool {
        self.session_connected.load(Ordering::SeqCst)
    }

    /// Samples resource usage and bundle stats into the current record.
    pub(crate) async fn update_local_broker_data(&self) -> Result<LocalBrokerData> {
        let mut state = self.state.lock().await;
        self.sample(&mut state).await?;
        Ok(state.local.clone())
    }

    async fn sample(&self, state: &mut ReporterState) -> Result<()> {
        let collaborators = &self.ctx.collaborators;
        let sampled = async {
            let usage = collaborators.host_usage.system_resource_usage().await?;
            let stats = collaborators.bundle_stats.bundle_stats().await?;
            anyhow::Ok((usage, stats))
        }
        .await;

        match sampled {
            Ok((usage, stats)) => {
                state.local.update(usage, stats);
                lb_metrics::record_broker_usage(&self.ctx.broker_id, &state.local, &self.ctx.conf);
                if self.ctx.conf.expose_bundles_metrics {
                    lb_metrics::record_bundle_stats(&state.local.last_stats);
                }
                Ok(())
            }
            Err(err) => match err.downcast::<LoadManagerError>() {
                Ok(concurrent @ LoadManagerError::ConcurrentModification(_)) => Err(concurrent),
                Ok(other) => {
                    warn!(error = %other, "error when attempting to update local broker data");
                    Ok(())
                }
                Err(err) => {
                    warn!(error = %err, "error when attempting to update local broker data");
                    Ok(())
                }
            },
        }
    }

    /// Acquires this broker's snapshot lock, holding the current record.
    pub(crate) async fn acquire_broker_lock(&self) -> Result<()> {
        let state = self.state.lock().await;
        let lock = self
            .ctx
            .broker_locks
            .acquire_lock(&self.ctx.broker_id, &state.local)
            .await?;
        *self.broker_lock.lock().await = Some(lock);
        Ok(())
    }

    /// Releases the snapshot lock; `NotFound` when it was never held or already gone.
    pub(crate) async fn release_broker_lock(&self) -> Result<()> {
        let lock = self.broker_lock.lock().await.take();
        match lock {
            Some(lock) => {
                if self.ctx.broker_locks.read_lock(&self.ctx.broker_id).await?.is_none() {
                    return Err(LoadManagerError::NotFound(lock.path().to_string()));
                }
                lock.release().await?;
                Ok(())
            }
            None => Err(LoadManagerError::NotFound(
                self.ctx.broker_locks.lock_path(&self.ctx.broker_id),
            )),
        }
    }

    /// Samples, then publishes when forced or when the change is significant.
    ///
    /// Returns whether a snapshot was written.
    pub(crate) async fn publish_if_due(&self, force: bool) -> Result<bool> {
        let mut state = self.state.lock().await;
        self.sample(&mut state).await?;

        if !self.is_session_connected() {
            debug!(broker_id = %self.ctx.broker_id, "metadata session not connected, skipping publish");
            return Ok(false);
        }
        let now = now_millis();
        if !(force || should_publish(&state.local, &state.last, &self.ctx.conf, now)) {
            return Ok(false);
        }

        let broker_lock = self.broker_lock.lock().await;
        let Some(lock) = broker_lock.as_ref() else {
            return Err(LoadManagerError::NotStarted);
        };

        let previous_update = state.local.last_update;
        state.local.last_update = now;
        if let Err(err) = lock.update_value(&state.local).await {
            warn!(broker_id = %self.ctx.broker_id, error = %err, "error writing broker data on metadata store");
            state.local.last_update = previous_update;
            return Ok(false);
        }

        state.local.clean_deltas();
        let published = state.local.clone();
        state.last.update_from(&published);
        debug!(broker_id = %self.ctx.broker_id, bundles = published.num_bundles, "published local broker data");
        Ok(true)
    }

    pub(crate) async fn local_data(&self) -> LocalBrokerData {
        self.state.lock().await.local.clone()
    }

    /// Forgets the raw stats of a bundle that is about to be split.
    pub(crate) async fn remove_last_stats(&self, bundle: &str) {
        self.state.lock().await.local.last_stats.remove(bundle);
    }
}

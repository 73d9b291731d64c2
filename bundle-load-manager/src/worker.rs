use std::sync::Arc;

use bundle_metadata_store::{MetadataError, MetadataStorage, WatchStream};
use futures::StreamExt;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::aggregator::Aggregator;
use crate::context::LoadManagerContext;
use crate::errors::Result;
use crate::local_reporter::LocalReporter;
use crate::resources::LOADBALANCE_BROKERS_ROOT;

/// The aggregation worker plus the listeners feeding it.
///
/// Triggers go through a channel of capacity one, so at most one cycle is pending
/// while another runs and further triggers are dropped.
pub(crate) struct BackgroundTasks {
    cancel: CancellationToken,
    trigger: mpsc::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub(crate) async fn spawn(
        ctx: Arc<LoadManagerContext>,
        aggregator: Arc<Aggregator>,
        reporter: Arc<LocalReporter>,
        store: MetadataStorage,
    ) -> Result<Self> {
        let cancel = CancellationToken::new();
        let (trigger, triggers) = mpsc::channel(1);

        let roster = store.watch(LOADBALANCE_BROKERS_ROOT).await?;
        let sessions = store.subscribe_session();

        let handles = vec![
            tokio::spawn(run_worker(aggregator, triggers, cancel.clone())),
            tokio::spawn(watch_roster(ctx.clone(), roster, trigger.clone(), cancel.clone())),
            tokio::spawn(watch_session(ctx, reporter, sessions, cancel.clone())),
        ];

        Ok(BackgroundTasks {
            cancel,
            trigger,
            handles,
        })
    }

    /// Queues an aggregation cycle unless one is already pending.
    pub(crate) fn trigger(&self) {
        request_cycle(&self.trigger);
    }

    /// Cancels every task; work in progress is abandoned, not drained.
    pub(crate) fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            handle.abort();
        }
    }
}

fn request_cycle(trigger: &mpsc::Sender<()>) {
    match trigger.try_send(()) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(())) => {
            debug!("aggregation cycle already pending, dropping trigger");
        }
        Err(mpsc::error::TrySendError::Closed(())) => {
            debug!("aggregation worker stopped, dropping trigger");
        }
    }
}

async fn run_worker(
    aggregator: Arc<Aggregator>,
    mut triggers: mpsc::Receiver<()>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            trigger = triggers.recv() => {
                if trigger.is_none() {
                    break;
                }
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = aggregator.update_all() => {}
                }
            }
        }
    }
    debug!("aggregation worker stopped");
}

async fn watch_roster(
    ctx: Arc<LoadManagerContext>,
    mut roster: WatchStream,
    trigger: mpsc::Sender<()>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = roster.next() => event,
        };

        match event {
            Some(Ok(event)) => {
                debug!(event = %event, "broker roster changed");
                reap_dead_broker_preallocations(&ctx).await;
                request_cycle(&trigger);
            }
            Some(Err(MetadataError::WatchError(msg))) => {
                warn!(error = %msg, "broker roster watch lagged, resynchronizing");
                request_cycle(&trigger);
            }
            Some(Err(err)) => {
                warn!(error = %err, "error receiving broker roster event");
            }
            None => {
                error!("broker roster watch closed");
                break;
            }
        }
    }
}

/// Drops preallocations pointing at brokers that have a record but left the roster.
async fn reap_dead_broker_preallocations(ctx: &LoadManagerContext) {
    let alive = ctx.get_available_brokers().await;
    let known = ctx.load_data.read().await.broker_ids();
    for broker in known.iter().filter(|broker| !alive.contains(*broker)) {
        let reclaimed = ctx.preallocations.purge_broker(broker);
        if !reclaimed.is_empty() {
            debug!(broker_id = %broker, bundles = ?reclaimed, "broker appears to have stopped, reclaimed its preallocations");
        }
    }
}

async fn watch_session(
    ctx: Arc<LoadManagerContext>,
    reporter: Arc<LocalReporter>,
    mut sessions: broadcast::Receiver<bundle_metadata_store::SessionEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = sessions.recv() => event,
        };

        match event {
            Ok(event) => {
                info!(broker_id = %ctx.broker_id, session_event = %event, "metadata session changed");
                reporter.set_session_connected(event.is_connected());
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "missed metadata session events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

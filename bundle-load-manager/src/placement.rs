use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::bundle_data::BundleData;
use crate::bundle_range_cache::BundleRangeCache;
use crate::collaborators::{NamespacePolicies, NamespaceService};
use crate::context::LoadManagerContext;
use crate::lb_metrics;
use crate::load_data::LoadData;
use crate::naming::{namespace_of, range_of, NamespaceBundle};

const DEFAULT_FAILURE_DOMAIN: &str = "default";

/// Chooses destination brokers for bundles.
///
/// The candidate buffer doubles as the placement lock: every selection, and every
/// policy check run on behalf of shedding or splitting, holds it end to end. It is
/// always taken before the load data lock.
pub(crate) struct PlacementEngine {
    ctx: Arc<LoadManagerContext>,
    candidates: Mutex<HashSet<String>>,
}

impl PlacementEngine {
    pub(crate) fn new(ctx: Arc<LoadManagerContext>) -> Self {
        PlacementEngine {
            ctx,
            candidates: Mutex::new(HashSet::new()),
        }
    }

    /// Picks a broker for `bundle` and records it as a preallocation.
    ///
    /// A bundle that already has a preallocation gets the same broker again.
    pub(crate) async fn select_broker_for_assignment(
        &self,
        bundle: &NamespaceBundle,
    ) -> Option<String> {
        let started = Instant::now();
        let selected = self.assign(bundle).await;
        lb_metrics::record_assignment_latency(started.elapsed().as_secs_f64() * 1000.0);
        selected
    }

    async fn assign(&self, bundle: &NamespaceBundle) -> Option<String> {
        let mut candidates = self.candidates.lock().await;
        let name = bundle.name();

        if let Some(broker) = self.ctx.preallocations.get(&name) {
            debug!(bundle = %name, broker_id = %broker, "bundle already preallocated");
            return Some(broker);
        }

        if let Some((_, preferred)) = self.ctx.bundle_affinity.remove(&name) {
            if self.ctx.get_available_brokers().await.contains(&preferred) {
                info!(bundle = %name, broker_id = %preferred, "assigning bundle to its affinity broker");
                return Some(self.preallocate(&name, &preferred).await);
            }
            warn!(bundle = %name, broker_id = %preferred, "affinity broker is not available, ignoring it");
        }

        let broker = self.select_with(&mut candidates, bundle).await?;
        Some(self.preallocate(&name, &broker).await)
    }

    /// Records `broker` as the pending destination of `bundle`; returns the destination in force.
    async fn preallocate(&self, bundle: &str, broker: &str) -> String {
        let data = self.ctx.bundle_data_or_default(bundle).await;
        let destination = self.ctx.preallocations.insert_if_absent(bundle, broker);

        let mut load_data = self.ctx.load_data.write().await;
        if let Some(record) = load_data.broker_mut(&destination) {
            record
                .preallocated_bundle_data
                .insert(bundle.to_string(), data);
        }
        drop(load_data);

        self.ctx
            .bundle_ranges
            .add(&destination, namespace_of(bundle), range_of(bundle));
        debug!(bundle = %bundle, broker_id = %destination, "preallocated bundle");
        destination
    }

    /// Runs the placement pipeline for `bundle` without recording anything.
    pub(crate) async fn select_broker(&self, bundle: &NamespaceBundle) -> Option<String> {
        let mut candidates = self.candidates.lock().await;
        self.select_with(&mut candidates, bundle).await
    }

    async fn select_with(
        &self,
        candidates: &mut HashSet<String>,
        bundle: &NamespaceBundle,
    ) -> Option<String> {
        let name = bundle.name();
        let conf = &self.ctx.conf;
        let namespaces = self.ctx.collaborators.namespaces.as_ref();
        let policies = self.ctx.collaborators.policies.as_ref();

        let data = self.ctx.bundle_data_or_default(&name).await;
        let available = self.ctx.get_available_brokers().await;
        let load_data = self.ctx.load_data.read().await;

        apply_namespace_policies(bundle, &available, &load_data, namespaces, policies, candidates);
        filter_brokers_with_large_topic_count(candidates, &load_data, conf.broker_max_topics);
        filter_anti_affinity_group_owned_brokers(
            &name,
            candidates,
            &self.ctx.bundle_ranges,
            policies,
        );
        if conf.distribute_bundles_evenly || bundle.is_system() {
            remove_most_servicing_brokers_for_namespace(&name, candidates, &self.ctx.bundle_ranges);
            debug!(candidates = candidates.len(), "distributing bundles evenly across candidates");
        }

        info!(candidates = candidates.len(), bundle = %name, "brokers being considered for assignment");

        if let Err(err) = self.run_filters(candidates, &data, &load_data) {
            warn!(bundle = %name, error = %err, "broker filter failed, restoring the full candidate set");
            apply_namespace_policies(bundle, &available, &load_data, namespaces, policies, candidates);
        }
        if candidates.is_empty() {
            apply_namespace_policies(bundle, &available, &load_data, namespaces, policies, candidates);
        }

        let strategies = &self.ctx.strategies;
        let selected = if conf.shedding.excluded_namespaces.contains(&bundle.namespace) {
            debug!(bundle = %name, "using round robin selection for shedding-excluded namespace");
            strategies
                .excluded_namespace_placement
                .select_broker(candidates, &name, &data, &load_data, conf)
        } else {
            strategies
                .placement
                .select_broker(candidates, &name, &data, &load_data, conf)
        };
        debug!(selected = ?selected, candidates = ?candidates, "selected broker from candidates");
        let mut broker = selected?;

        let usage = load_data
            .broker(&broker)
            .map(|record| {
                record
                    .local_data
                    .max_resource_usage_with_weight(&conf.resource_weights)
            })
            .unwrap_or(0.0);
        if usage > conf.overload_threshold() {
            // retry once over the full eligible set
            apply_namespace_policies(bundle, &available, &load_data, namespaces, policies, candidates);
            if let Some(alternative) =
                strategies
                    .placement
                    .select_broker(candidates, &name, &data, &load_data, conf)
            {
                if alternative != broker {
                    info!(overloaded = %broker, broker_id = %alternative, bundle = %name, "selected broker is overloaded, using another one");
                }
                broker = alternative;
            }
        }
        Some(broker)
    }

    fn run_filters(
        &self,
        candidates: &mut HashSet<String>,
        data: &BundleData,
        load_data: &LoadData,
    ) -> Result<(), crate::errors::BrokerFilterError> {
        for filter in &self.ctx.strategies.filters {
            filter.filter(candidates, data, load_data, &self.ctx.conf)?;
            debug!(filter = filter.name(), candidates = candidates.len(), "applied broker filter");
        }
        Ok(())
    }

    /// Whether some broker other than `current_broker` satisfies the namespace policies.
    pub(crate) async fn should_namespace_policies_unload(
        &self,
        bundle: &NamespaceBundle,
        current_broker: &str,
    ) -> bool {
        let mut candidates = self.candidates.lock().await;
        self.eligible_brokers(&mut candidates, bundle).await;
        candidates.remove(current_broker);
        !candidates.is_empty()
    }

    /// Whether moving `bundle` off `current_broker` can improve anti-affinity spreading.
    pub(crate) async fn should_anti_affinity_namespace_unload(
        &self,
        bundle: &NamespaceBundle,
        current_broker: &str,
    ) -> bool {
        let policies = self.ctx.collaborators.policies.as_ref();
        let group = match policies.anti_affinity_group(&bundle.namespace) {
            Ok(Some(group)) => group,
            Ok(None) => return true,
            Err(err) => {
                warn!(bundle = %bundle, error = %err, "failed to check anti-affinity namespace ownership");
                return true;
            }
        };

        let mut candidates = self.candidates.lock().await;
        self.eligible_brokers(&mut candidates, bundle).await;
        should_anti_affinity_namespace_unload(
            &group,
            current_broker,
            &candidates,
            &self.ctx.bundle_ranges,
            policies,
        )
    }

    async fn eligible_brokers(&self, candidates: &mut HashSet<String>, bundle: &NamespaceBundle) {
        let available = self.ctx.get_available_brokers().await;
        let load_data = self.ctx.load_data.read().await;
        apply_namespace_policies(
            bundle,
            &available,
            &load_data,
            self.ctx.collaborators.namespaces.as_ref(),
            self.ctx.collaborators.policies.as_ref(),
            candidates,
        );
    }
}

/// Replaces `candidates` with the brokers of `available` the namespace policies allow for `bundle`.
pub fn apply_namespace_policies(
    bundle: &NamespaceBundle,
    available: &HashSet<String>,
    load_data: &LoadData,
    namespaces: &dyn NamespaceService,
    policies: &dyn NamespacePolicies,
    candidates: &mut HashSet<String>,
) {
    candidates.clear();
    let namespace = bundle.namespace.as_str();
    let needs_non_persistent = namespaces.has_non_persistent_topic(bundle);

    let supports_topics = |broker: &String| match load_data.broker(broker) {
        Some(record) if needs_non_persistent => record.local_data.non_persistent_topics_enabled,
        Some(record) => record.local_data.persistent_topics_enabled,
        None => true,
    };

    if policies.has_isolation_policy(namespace) {
        let primaries: Vec<&String> = available
            .iter()
            .filter(|broker| policies.is_primary_broker(namespace, broker))
            .filter(|broker| supports_topics(broker))
            .collect();
        let failover = policies.should_failover_to_secondaries(namespace, primaries.len());
        candidates.extend(primaries.into_iter().cloned());
        if failover {
            debug!(namespace = %namespace, "failing over to secondary brokers");
            candidates.extend(
                available
                    .iter()
                    .filter(|broker| policies.is_secondary_broker(namespace, broker))
                    .filter(|broker| supports_topics(broker))
                    .cloned(),
            );
        }
    } else {
        candidates.extend(
            available
                .iter()
                .filter(|broker| policies.is_shared_broker(broker))
                .filter(|broker| supports_topics(broker))
                .cloned(),
        );
    }
}

/// Drops brokers whose owned plus preallocated topics exceed `max_topics`, unless that drops every broker.
pub fn filter_brokers_with_large_topic_count(
    candidates: &mut HashSet<String>,
    load_data: &LoadData,
    max_topics: u64,
) {
    let within_limit: HashSet<String> = candidates
        .iter()
        .filter(|broker| {
            let total_topics = load_data
                .broker(broker)
                .map(|record| {
                    record.local_data.num_topics
                        + record
                            .preallocated_bundle_data
                            .values()
                            .map(|data| data.topics)
                            .sum::<u64>()
                })
                .unwrap_or(0);
            total_topics <= max_topics
        })
        .cloned()
        .collect();

    if !within_limit.is_empty() {
        *candidates = within_limit;
    }
}

/// Number of namespaces of anti-affinity `group` each candidate serves.
fn anti_affinity_counts(
    group: &str,
    candidates: &HashSet<String>,
    ranges: &BundleRangeCache,
    policies: &dyn NamespacePolicies,
) -> HashMap<String, usize> {
    let mut group_of: HashMap<String, Option<String>> = HashMap::new();
    candidates
        .iter()
        .map(|broker| {
            let count = ranges
                .namespaces_of(broker)
                .into_iter()
                .filter(|namespace| {
                    let namespace_group = group_of
                        .entry(namespace.clone())
                        .or_insert_with(|| policies.anti_affinity_group(namespace).ok().flatten());
                    namespace_group.as_deref() == Some(group)
                })
                .count();
            (broker.clone(), count)
        })
        .collect()
}

/// Keeps the candidates serving the fewest namespaces of the bundle's anti-affinity group.
///
/// With failure domains enabled, first keeps only the domain(s) with the fewest such namespaces.
pub fn filter_anti_affinity_group_owned_brokers(
    bundle: &str,
    candidates: &mut HashSet<String>,
    ranges: &BundleRangeCache,
    policies: &dyn NamespacePolicies,
) {
    if candidates.is_empty() {
        return;
    }
    let namespace = namespace_of(bundle);
    let group = match policies.anti_affinity_group(namespace) {
        Ok(Some(group)) => group,
        Ok(None) => return,
        Err(err) => {
            warn!(bundle = %bundle, error = %err, "failed to resolve anti-affinity group");
            return;
        }
    };

    let counts = anti_affinity_counts(&group, candidates, ranges, policies);

    if policies.failure_domains_enabled() {
        let domain_of = |broker: &String| {
            policies
                .failure_domain_of(broker)
                .unwrap_or_else(|| DEFAULT_FAILURE_DOMAIN.to_string())
        };
        let mut domain_counts: HashMap<String, usize> = HashMap::new();
        for broker in candidates.iter() {
            *domain_counts.entry(domain_of(broker)).or_default() += counts[broker];
        }
        if let Some(least) = domain_counts.values().min().copied() {
            candidates.retain(|broker| domain_counts[&domain_of(broker)] == least);
        }
    }

    if let Some(least) = candidates.iter().map(|broker| counts[broker]).min() {
        candidates.retain(|broker| counts[broker] == least);
    }
}

/// Decides whether unloading a bundle of an anti-affinity `group` from `current_broker` spreads the group better.
pub fn should_anti_affinity_namespace_unload(
    group: &str,
    current_broker: &str,
    candidates: &HashSet<String>,
    ranges: &BundleRangeCache,
    policies: &dyn NamespacePolicies,
) -> bool {
    let mut brokers = candidates.clone();
    brokers.insert(current_broker.to_string());
    let counts = anti_affinity_counts(group, &brokers, ranges, policies);

    let current_count = counts.get(current_broker).copied().unwrap_or(0);
    let Some(least) = candidates
        .iter()
        .filter(|broker| broker.as_str() != current_broker)
        .map(|broker| counts[broker])
        .min()
    else {
        return false;
    };

    if least == 0 || current_count > least {
        return true;
    }
    let least_owners = candidates
        .iter()
        .filter(|broker| counts[*broker] == least)
        .count();
    candidates.len() != least_owners
}

/// Keeps only the candidates serving the fewest bundles of the bundle's namespace.
pub fn remove_most_servicing_brokers_for_namespace(
    bundle: &str,
    candidates: &mut HashSet<String>,
    ranges: &BundleRangeCache,
) {
    let namespace = namespace_of(bundle);
    let Some(least) = candidates
        .iter()
        .map(|broker| ranges.bundle_count(broker, namespace))
        .min()
    else {
        return;
    };
    candidates.retain(|broker| ranges.bundle_count(broker, namespace) <= least);
}

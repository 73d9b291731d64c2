//! Pluggable load-balancing strategies, resolved once by name at construction.
//!
//! Four capability roles exist:
//! - [`BrokerFilter`]: shrinks a candidate set, or fails and lets the caller restore it
//! - [`PlacementStrategy`]: picks one broker from a non-empty candidate set
//! - [`LoadSheddingStrategy`]: proposes bundles to unload from their current owner
//! - [`BundleSplitStrategy`]: proposes bundles to split

mod avg_shedder;
mod bundle_splitter;
mod filters;
mod least_long_term_message_rate;
mod least_resource_usage;
mod overload_shedder;
mod round_robin;
mod threshold_shedder;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use rand::seq::SliceRandom;

use crate::bundle_data::BundleData;
use crate::collaborators::NamespaceService;
use crate::config::LoadManagerConfig;
use crate::errors::{BrokerFilterError, LoadManagerError, Result};
use crate::load_data::LoadData;

pub use avg_shedder::AvgShedder;
pub use bundle_splitter::BundleSplitter;
pub use filters::{BrokerLoadManagerClassFilter, BrokerVersionFilter};
pub use least_long_term_message_rate::LeastLongTermMessageRate;
pub use least_resource_usage::LeastResourceUsageWithWeight;
pub use overload_shedder::OverloadShedder;
pub use round_robin::RoundRobinBrokerSelector;
pub use threshold_shedder::ThresholdShedder;

/// Extra fraction of traffic offloaded beyond the strict excess, to avoid re-triggering next cycle.
pub(crate) const ADDITIONAL_THRESHOLD_PERCENT_MARGIN: f64 = 0.05;
pub(crate) const MIB: f64 = 1024.0 * 1024.0;

/// Broker -> bundles proposed for unloading.
pub type UnloadProposal = BTreeMap<String, Vec<String>>;

pub trait BrokerFilter: Send + Sync {
    fn name(&self) -> &'static str;

    fn filter(
        &self,
        brokers: &mut HashSet<String>,
        bundle_data: &BundleData,
        load_data: &LoadData,
        conf: &LoadManagerConfig,
    ) -> std::result::Result<(), BrokerFilterError>;
}

pub trait PlacementStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Picks a broker among `candidates`, or None when none can take the bundle.
    fn select_broker(
        &self,
        candidates: &HashSet<String>,
        bundle: &str,
        bundle_data: &BundleData,
        load_data: &LoadData,
        conf: &LoadManagerConfig,
    ) -> Option<String>;

    /// Lets the strategy drop statistics of brokers that left the cluster.
    fn on_active_brokers_change(&self, _active_brokers: &HashSet<String>) {}

    /// The shedding role of strategies that implement both.
    fn as_shedding(self: Arc<Self>) -> Option<Arc<dyn LoadSheddingStrategy>> {
        None
    }
}

pub trait LoadSheddingStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn find_bundles_for_unloading(
        &self,
        load_data: &LoadData,
        conf: &LoadManagerConfig,
    ) -> UnloadProposal;

    fn on_active_brokers_change(&self, _active_brokers: &HashSet<String>) {}
}

pub trait BundleSplitStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Bundle -> owning broker for every bundle that should be split.
    fn find_bundles_to_split(
        &self,
        load_data: &LoadData,
        namespaces: &dyn NamespaceService,
        conf: &LoadManagerConfig,
    ) -> HashMap<String, String>;
}

type PlacementCtor = fn() -> Arc<dyn PlacementStrategy>;
type SheddingCtor = fn() -> Arc<dyn LoadSheddingStrategy>;
type SplitCtor = fn() -> Arc<dyn BundleSplitStrategy>;
type FilterCtor = fn() -> Arc<dyn BrokerFilter>;

const PLACEMENT_STRATEGIES: &[(&str, PlacementCtor)] = &[
    (LeastLongTermMessageRate::NAME, || Arc::new(LeastLongTermMessageRate::new())),
    (LeastResourceUsageWithWeight::NAME, || Arc::new(LeastResourceUsageWithWeight::new())),
    (RoundRobinBrokerSelector::NAME, || Arc::new(RoundRobinBrokerSelector::new())),
    (AvgShedder::NAME, || Arc::new(AvgShedder::new())),
];

const SHEDDING_STRATEGIES: &[(&str, SheddingCtor)] = &[
    (ThresholdShedder::NAME, || Arc::new(ThresholdShedder::new())),
    (OverloadShedder::NAME, || Arc::new(OverloadShedder::new())),
    (AvgShedder::NAME, || Arc::new(AvgShedder::new())),
];

const SPLIT_STRATEGIES: &[(&str, SplitCtor)] =
    &[(BundleSplitter::NAME, || Arc::new(BundleSplitter::new()))];

const BROKER_FILTERS: &[(&str, FilterCtor)] = &[
    (BrokerLoadManagerClassFilter::NAME, || Arc::new(BrokerLoadManagerClassFilter)),
    (BrokerVersionFilter::NAME, || Arc::new(BrokerVersionFilter)),
];

fn lookup<T: Copy>(registry: &[(&str, T)], kind: &'static str, name: &str) -> Result<T> {
    registry
        .iter()
        .find(|(registered, _)| *registered == name)
        .map(|(_, ctor)| *ctor)
        .ok_or_else(|| LoadManagerError::UnknownStrategy {
            kind,
            name: name.to_string(),
        })
}

/// The strategy instances bound for the lifetime of one load manager.
#[derive(Clone)]
pub struct Strategies {
    pub placement: Arc<dyn PlacementStrategy>,
    /// Fixed selector for namespaces excluded from shedding
    pub excluded_namespace_placement: Arc<dyn PlacementStrategy>,
    pub shedding: Arc<dyn LoadSheddingStrategy>,
    pub split: Arc<dyn BundleSplitStrategy>,
    pub filters: Vec<Arc<dyn BrokerFilter>>,
}

impl Strategies {
    pub fn from_config(conf: &LoadManagerConfig) -> Result<Self> {
        let placement = lookup(PLACEMENT_STRATEGIES, "placement", &conf.placement_strategy)?();
        let shedding = lookup(SHEDDING_STRATEGIES, "shedding", &conf.shedding_strategy)?();
        let split = lookup(SPLIT_STRATEGIES, "split", &conf.split_strategy)?();
        let filters = conf
            .broker_filters
            .iter()
            .map(|name| lookup(BROKER_FILTERS, "broker filter", name).map(|ctor| ctor()))
            .collect::<Result<Vec<_>>>()?;

        Self::bind(placement, shedding, split, filters)
    }

    /// Binds explicit instances; a placement strategy that also sheds must be the shedding strategy.
    pub fn bind(
        placement: Arc<dyn PlacementStrategy>,
        shedding: Arc<dyn LoadSheddingStrategy>,
        split: Arc<dyn BundleSplitStrategy>,
        filters: Vec<Arc<dyn BrokerFilter>>,
    ) -> Result<Self> {
        let placement_name = placement.name();
        let shedding = match placement.clone().as_shedding() {
            Some(shared) => {
                if shared.name() != shedding.name() {
                    return Err(LoadManagerError::ConfigConflict(format!(
                        "placement strategy {} also sheds load, so the shedding strategy must be {} (got {})",
                        placement_name,
                        placement_name,
                        shedding.name()
                    )));
                }
                shared
            }
            None => shedding,
        };

        Ok(Strategies {
            placement,
            excluded_namespace_placement: Arc::new(RoundRobinBrokerSelector::new()),
            shedding,
            split,
            filters,
        })
    }
}

/// Uniform random pick, stable with respect to set iteration order.
pub(crate) fn choose_random(brokers: &[String]) -> Option<String> {
    let mut sorted: Vec<&String> = brokers.iter().collect();
    sorted.sort();
    sorted.choose(&mut rand::thread_rng()).map(|b| (*b).clone())
}

/// History-smoothed weighted usage, shared by the usage-based strategies.
pub(crate) fn smoothed_usage(previous: Option<f64>, current: f64, history_percentage: f64) -> f64 {
    match previous {
        Some(previous) => previous * history_percentage + (1.0 - history_percentage) * current,
        None => current,
    }
}

/// Bundles owned by `broker` and not unloaded recently, heaviest short-term throughput first.
pub(crate) fn unloadable_bundles_by_throughput(
    load_data: &LoadData,
    broker: &str,
) -> Vec<(String, f64)> {
    let Some(broker_data) = load_data.broker(broker) else {
        return Vec::new();
    };
    let recently_unloaded = load_data.recently_unloaded_bundles();
    let mut bundles: Vec<(String, f64)> = broker_data
        .local_data
        .bundles
        .iter()
        .filter(|bundle| !recently_unloaded.contains_key(*bundle))
        .filter_map(|bundle| {
            load_data
                .bundle(bundle)
                .map(|data| (bundle.clone(), data.short_term_data.total_msg_throughput()))
        })
        .collect();
    bundles.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    bundles
}

/// Takes bundles in order until `target` throughput is covered; always takes at least one.
pub(crate) fn select_until_covered(bundles: Vec<(String, f64)>, target: f64) -> Vec<String> {
    let mut selected = Vec::new();
    let mut marked = 0.0;
    for (bundle, throughput) in bundles {
        if marked < target || selected.is_empty() {
            marked += throughput;
            selected.push(bundle);
        }
    }
    selected
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_resolves() {
        let strategies = Strategies::from_config(&LoadManagerConfig::default()).unwrap();
        assert_eq!(strategies.placement.name(), LeastLongTermMessageRate::NAME);
        assert_eq!(strategies.shedding.name(), ThresholdShedder::NAME);
        assert_eq!(strategies.split.name(), BundleSplitter::NAME);
        assert_eq!(strategies.filters.len(), 2);
        assert_eq!(
            strategies.excluded_namespace_placement.name(),
            RoundRobinBrokerSelector::NAME
        );
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let conf = LoadManagerConfig {
            placement_strategy: "fastest_broker".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            Strategies::from_config(&conf),
            Err(LoadManagerError::UnknownStrategy { kind: "placement", .. })
        ));
    }

    #[test]
    fn test_avg_shedder_requires_matching_shedding_strategy() {
        let conf = LoadManagerConfig {
            placement_strategy: AvgShedder::NAME.to_string(),
            ..Default::default()
        };
        assert!(matches!(
            Strategies::from_config(&conf),
            Err(LoadManagerError::ConfigConflict(_))
        ));

        let conf = LoadManagerConfig {
            placement_strategy: AvgShedder::NAME.to_string(),
            shedding_strategy: AvgShedder::NAME.to_string(),
            ..Default::default()
        };
        let strategies = Strategies::from_config(&conf).unwrap();
        assert_eq!(strategies.shedding.name(), AvgShedder::NAME);
    }

    #[test]
    fn test_select_until_covered_takes_at_least_one() {
        let bundles = vec![("a".to_string(), 10.0), ("b".to_string(), 5.0)];
        assert_eq!(select_until_covered(bundles.clone(), 0.0), vec!["a".to_string()]);
        assert_eq!(select_until_covered(bundles.clone(), 12.0), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(select_until_covered(bundles, 8.0), vec!["a".to_string()]);
    }

    #[test]
    fn test_smoothed_usage() {
        assert_eq!(smoothed_usage(None, 0.5, 0.9), 0.5);
        assert!((smoothed_usage(Some(0.5), 1.0, 0.9) - 0.55).abs() < 1e-9);
    }
}

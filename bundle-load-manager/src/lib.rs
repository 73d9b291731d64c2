//! # Bundle Load Manager
//!
//! Load reporting, bundle placement, load shedding and bundle splitting for a
//! multi-broker messaging cluster.
//!
//! ## Core Responsibilities
//!
//! - **Load Reporting**: every broker samples its resource usage and per-bundle stats and
//!   publishes them to the metadata store when they change significantly
//! - **Aggregation**: the brokers fold every published snapshot into an in-memory load view,
//!   tracking short- and long-term history per bundle
//! - **Placement**: new bundles go through namespace policies, anti-affinity, even
//!   distribution, pluggable broker filters and a pluggable placement strategy
//! - **Shedding**: the leader unloads bundles from brokers its shedding strategy flags as hot
//! - **Splitting**: the leader splits bundles that outgrow the configured limits
//!
//! ## Architecture
//!
//! A [`ModularLoadManager`] owns one shared context (load view, preallocation table,
//! bundle range index, durable resources) and the components operating on it. Store
//! notifications on `/loadbalance/brokers` feed a single background worker that runs
//! aggregation cycles one at a time; placement decisions are serialized by the
//! placement engine's candidate lock.

pub mod bundle_data;
pub mod bundle_range_cache;
pub mod collaborators;
pub mod config;
pub mod errors;
pub mod load_data;
pub mod lb_metrics;
pub mod load_report;
pub mod local_reporter;
pub mod naming;
pub mod placement;
pub mod preallocation;
pub mod resources;
pub mod strategy;

mod aggregator;
mod context;
mod manager;
mod shedding;
mod split;
mod utils;
mod worker;

pub use bundle_data::{BundleData, TimeAverageBrokerData, TimeAverageMessageData};
pub use collaborators::{
    AdminClient, BrokerHostUsage, BundleStatsProvider, LeaderState, LeaderStateProvider,
    NamespacePolicies, NamespaceService, NoIsolationPolicies,
};
pub use config::{LoadManagerConfig, ResourceWeights, SheddingConfig, SplitConfig};
pub use context::LoadManagerCollaborators;
pub use errors::{BrokerFilterError, LoadManagerError, Result};
pub use lb_metrics::{describe_metrics, BundleMetrics, LoadBalancingMetrics};
pub use load_data::{BrokerData, LoadData};
pub use load_report::{BundleStats, LocalBrokerData, ResourceUsage, SystemResourceUsage};
pub use manager::ModularLoadManager;
pub use naming::{NamespaceBundle, SYSTEM_NAMESPACE};
pub use resources::{LoadBalanceResources, ResourceQuota};
pub use shedding::SheddingOutcome;
pub use strategy::{
    BrokerFilter, BundleSplitStrategy, LoadSheddingStrategy, PlacementStrategy, Strategies,
    UnloadProposal,
};

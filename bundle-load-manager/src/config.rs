use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::errors::{LoadManagerError, Result};

/// Multipliers applied to each resource percentage when computing weighted usage.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ResourceWeights {
    pub cpu: f64,
    pub memory: f64,
    pub direct_memory: f64,
    pub bandwidth_in: f64,
    pub bandwidth_out: f64,
}

impl Default for ResourceWeights {
    fn default() -> Self {
        Self {
            cpu: 1.0,
            memory: 1.0,
            direct_memory: 1.0,
            bandwidth_in: 1.0,
            bandwidth_out: 1.0,
        }
    }
}

/// Load shedding configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SheddingConfig {
    /// Enable/disable the leader-side shedding loop
    pub enabled: bool,
    /// A bundle unloaded less than this long ago is not unloaded again
    pub grace_period_minutes: u64,
    /// Namespaces never unloaded automatically; placed with round robin
    pub excluded_namespaces: HashSet<String>,
    /// Margin above the cluster average before a broker sheds (threshold shedder)
    pub broker_threshold_percentage: f64,
    /// Minimum throughput worth unloading from one broker, in MB
    pub bundle_unload_min_throughput_threshold_mb: f64,
    /// Usage gap between hottest and coldest broker (avg shedder)
    pub avg_shedder_threshold_percentage: f64,
    /// Consecutive cycles the gap must persist (avg shedder)
    pub avg_shedder_hit_count: u32,
}

impl Default for SheddingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            grace_period_minutes: 30,
            excluded_namespaces: HashSet::new(),
            broker_threshold_percentage: 10.0,
            bundle_unload_min_throughput_threshold_mb: 10.0,
            avg_shedder_threshold_percentage: 40.0,
            avg_shedder_hit_count: 3,
        }
    }
}

/// Automatic bundle split configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SplitConfig {
    pub auto_bundle_split_enabled: bool,
    /// Ask the split to unload the resulting sub-bundles
    pub auto_unload_split_bundles: bool,
    pub max_topics: u64,
    /// Consumers plus producers
    pub max_sessions: u64,
    pub max_msg_rate: f64,
    pub max_bandwidth_mb: f64,
    pub max_bundles_per_namespace: usize,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            auto_bundle_split_enabled: true,
            auto_unload_split_bundles: true,
            max_topics: 1000,
            max_sessions: 1000,
            max_msg_rate: 30000.0,
            max_bandwidth_mb: 100.0,
            max_bundles_per_namespace: 128,
        }
    }
}

/// Load Manager configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoadManagerConfig {
    /// Registry name of the placement strategy
    pub placement_strategy: String,
    /// Registry name of the shedding strategy
    pub shedding_strategy: String,
    /// Registry name of the bundle split strategy
    pub split_strategy: String,
    /// Ordered registry names of the broker filters
    pub broker_filters: Vec<String>,

    pub load_manager_class_name: String,
    pub broker_version: String,
    /// Restrict placement to the newest broker version among candidates
    pub prefer_later_versions: bool,
    pub enable_persistent_topics: bool,
    pub enable_non_persistent_topics: bool,

    pub resource_weights: ResourceWeights,

    /// Publish when any tracked quantity moved by more than this percentage
    pub report_update_threshold_percentage: f64,
    /// Publish at least this often regardless of change
    pub report_update_max_interval_minutes: u64,

    pub broker_overloaded_threshold_percentage: f64,
    pub broker_max_topics: u64,
    pub distribute_bundles_evenly: bool,
    pub least_resource_usage_diff_percentage: f64,
    /// Weight of the previous value when smoothing broker usage history
    pub history_resource_percentage: f64,

    pub shedding: SheddingConfig,
    pub split: SplitConfig,

    /// Bundles persisted per broker by the top-K write-back; 0 persists all
    pub max_bundles_in_bundle_load_report: usize,
    pub metadata_operation_timeout_seconds: u64,
    pub expose_bundles_metrics: bool,
}

impl Default for LoadManagerConfig {
    fn default() -> Self {
        Self {
            placement_strategy: "least_long_term_message_rate".to_string(),
            shedding_strategy: "threshold_shedder".to_string(),
            split_strategy: "bundle_splitter".to_string(),
            broker_filters: vec!["load_manager_class".to_string(), "broker_version".to_string()],
            load_manager_class_name: "modular_load_manager".to_string(),
            broker_version: "1.0.0".to_string(),
            prefer_later_versions: false,
            enable_persistent_topics: true,
            enable_non_persistent_topics: true,
            resource_weights: ResourceWeights::default(),
            report_update_threshold_percentage: 10.0,
            report_update_max_interval_minutes: 15,
            broker_overloaded_threshold_percentage: 85.0,
            broker_max_topics: 50000,
            distribute_bundles_evenly: true,
            least_resource_usage_diff_percentage: 10.0,
            history_resource_percentage: 0.9,
            shedding: SheddingConfig::default(),
            split: SplitConfig::default(),
            max_bundles_in_bundle_load_report: 10,
            metadata_operation_timeout_seconds: 30,
            expose_bundles_metrics: false,
        }
    }
}

impl LoadManagerConfig {
    pub fn from_yaml_str(content: &str) -> anyhow::Result<Self> {
        let config: LoadManagerConfig =
            serde_yaml::from_str(content).context("failed to parse load manager config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        let percentages = [
            ("report_update_threshold_percentage", self.report_update_threshold_percentage),
            (
                "broker_overloaded_threshold_percentage",
                self.broker_overloaded_threshold_percentage,
            ),
            (
                "least_resource_usage_diff_percentage",
                self.least_resource_usage_diff_percentage,
            ),
            (
                "shedding.broker_threshold_percentage",
                self.shedding.broker_threshold_percentage,
            ),
            (
                "shedding.avg_shedder_threshold_percentage",
                self.shedding.avg_shedder_threshold_percentage,
            ),
        ];
        for (key, value) in percentages {
            if !(0.0..=100.0).contains(&value) {
                return Err(LoadManagerError::InvalidConfig(format!(
                    "{} must be within 0..=100, got {}",
                    key, value
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.history_resource_percentage) {
            return Err(LoadManagerError::InvalidConfig(format!(
                "history_resource_percentage must be within 0..=1, got {}",
                self.history_resource_percentage
            )));
        }
        if self.metadata_operation_timeout_seconds == 0 {
            return Err(LoadManagerError::InvalidConfig(
                "metadata_operation_timeout_seconds must be positive".to_string(),
            ));
        }
        if self.split.max_bundles_per_namespace == 0 {
            return Err(LoadManagerError::InvalidConfig(
                "split.max_bundles_per_namespace must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn overload_threshold(&self) -> f64 {
        self.broker_overloaded_threshold_percentage / 100.0
    }

    pub(crate) fn grace_period_millis(&self) -> u64 {
        self.shedding.grace_period_minutes * 60 * 1000
    }

    pub(crate) fn report_max_interval_millis(&self) -> u64 {
        self.report_update_max_interval_minutes * 60 * 1000
    }

    pub(crate) fn operation_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.metadata_operation_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_manager_config_defaults() {
        let config = LoadManagerConfig::default();
        assert_eq!(config.placement_strategy, "least_long_term_message_rate");
        assert_eq!(config.shedding_strategy, "threshold_shedder");
        assert_eq!(config.split_strategy, "bundle_splitter");
        assert_eq!(config.broker_filters.len(), 2);
        assert_eq!(config.report_update_threshold_percentage, 10.0);
        assert_eq!(config.report_update_max_interval_minutes, 15);
        assert_eq!(config.broker_overloaded_threshold_percentage, 85.0);
        assert!(config.distribute_bundles_evenly);
        assert!(config.shedding.enabled);
        assert_eq!(config.shedding.grace_period_minutes, 30);
        assert!(config.split.auto_bundle_split_enabled);
        assert_eq!(config.split.max_bundles_per_namespace, 128);
        assert_eq!(config.max_bundles_in_bundle_load_report, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
placement_strategy: round_robin
shedding:
  excluded_namespaces: ["tenant/pinned"]
split:
  max_topics: 50
"#;
        let config = LoadManagerConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.placement_strategy, "round_robin");
        assert!(config.shedding.excluded_namespaces.contains("tenant/pinned"));
        assert_eq!(config.shedding.grace_period_minutes, 30);
        assert_eq!(config.split.max_topics, 50);
        assert_eq!(config.split.max_sessions, 1000);
        assert_eq!(config.resource_weights, ResourceWeights::default());
    }

    #[test]
    fn test_invalid_percentage_rejected() {
        let yaml = "broker_overloaded_threshold_percentage: 140";
        assert!(LoadManagerConfig::from_yaml_str(yaml).is_err());

        let mut config = LoadManagerConfig::default();
        config.history_resource_percentage = 1.5;
        assert!(matches!(
            config.validate(),
            Err(LoadManagerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_sample_config_file_parses() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../config/load_manager.yml");
        let config = LoadManagerConfig::load(path).unwrap();
        assert_eq!(config.placement_strategy, "least_long_term_message_rate");
        assert_eq!(config.shedding_strategy, "threshold_shedder");
        assert!(config
            .shedding
            .excluded_namespaces
            .contains("pulse/system"));
    }

    #[test]
    fn test_derived_durations() {
        let config = LoadManagerConfig::default();
        assert_eq!(config.grace_period_millis(), 30 * 60 * 1000);
        assert_eq!(config.report_max_interval_millis(), 15 * 60 * 1000);
        assert!((config.overload_threshold() - 0.85).abs() < f64::EPSILON);
        assert_eq!(config.operation_timeout().as_secs(), 30);
    }
}

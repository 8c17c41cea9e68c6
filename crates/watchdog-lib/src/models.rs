//! Core data models for the memory watchdog

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default namespace watched when none is configured
pub const DEFAULT_NAMESPACE: &str = "default";

/// Default memory threshold in Mi
pub const DEFAULT_MEMORY_THRESHOLD_MI: u64 = 5000;

/// Default interval between two memory checks (5 minutes)
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(300);

/// Watchdog configuration
///
/// Built once at startup and read-only afterwards. Use [`WatchdogConfig::new`]
/// so the invariants below are always checked. Deserialization goes through
/// the same validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawWatchdogConfig")]
pub struct WatchdogConfig {
    /// Namespace whose pods are summed (never empty)
    namespace: String,
    /// Deployment restarted on breach (never empty)
    deployment: String,
    /// Restart threshold in Mi (> 0)
    memory_threshold_mi: u64,
    /// Time between two checks (> 0)
    check_interval: Duration,
    /// Log every observation, not only restarts
    verbose: bool,
}

impl WatchdogConfig {
    /// Create a validated configuration
    pub fn new(
        namespace: impl Into<String>,
        deployment: impl Into<String>,
        memory_threshold_mi: u64,
        check_interval: Duration,
        verbose: bool,
    ) -> Result<Self, ConfigError> {
        let namespace = namespace.into();
        let deployment = deployment.into();

        if deployment.trim().is_empty() {
            return Err(ConfigError::MissingDeployment);
        }
        if namespace.trim().is_empty() {
            return Err(ConfigError::EmptyNamespace);
        }
        if memory_threshold_mi == 0 {
            return Err(ConfigError::ZeroThreshold);
        }
        if check_interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }

        Ok(Self {
            namespace,
            deployment,
            memory_threshold_mi,
            check_interval,
            verbose,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn deployment(&self) -> &str {
        &self.deployment
    }

    pub fn memory_threshold_mi(&self) -> u64 {
        self.memory_threshold_mi
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }
}

/// Unvalidated shape of a serialized [`WatchdogConfig`]
#[derive(Deserialize)]
struct RawWatchdogConfig {
    #[serde(default = "default_namespace")]
    namespace: String,
    deployment: String,
    #[serde(default = "default_memory_threshold_mi")]
    memory_threshold_mi: u64,
    #[serde(default = "default_check_interval")]
    check_interval: Duration,
    #[serde(default)]
    verbose: bool,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_memory_threshold_mi() -> u64 {
    DEFAULT_MEMORY_THRESHOLD_MI
}

fn default_check_interval() -> Duration {
    DEFAULT_CHECK_INTERVAL
}

impl TryFrom<RawWatchdogConfig> for WatchdogConfig {
    type Error = ConfigError;

    fn try_from(raw: RawWatchdogConfig) -> Result<Self, Self::Error> {
        Self::new(
            raw.namespace,
            raw.deployment,
            raw.memory_threshold_mi,
            raw.check_interval,
            raw.verbose,
        )
    }
}

/// Aggregate memory usage observed during one poll cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageSample {
    pub total_mi: u64,
}

impl UsageSample {
    pub fn new(total_mi: u64) -> Self {
        Self { total_mi }
    }

    /// Whether this sample breaches `threshold_mi` (inclusive)
    pub fn exceeds(&self, threshold_mi: u64) -> bool {
        self.total_mi >= threshold_mi
    }
}

//! Observability for the memory watchdog
//!
//! Provides:
//! - Prometheus metrics (checks, restarts, failures, last observed usage)
//! - Structured logging of watchdog events with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{error, info, warn};

/// Histogram buckets for check latency (in seconds)
const CHECK_LATENCY_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<WatchdogMetricsInner> = OnceLock::new();

struct WatchdogMetricsInner {
    check_latency_seconds: Histogram,
    checks: IntCounter,
    restarts: IntCounter,
    query_errors: IntCounter,
    restart_errors: IntCounter,
    memory_usage_mi: IntGauge,
    memory_threshold_mi: IntGauge,
}

impl WatchdogMetricsInner {
    fn new() -> Self {
        Self {
            check_latency_seconds: register_histogram!(
                "memory_watchdog_check_latency_seconds",
                "Time spent on one check-and-restart cycle",
                CHECK_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register check_latency_seconds"),

            checks: register_int_counter!(
                "memory_watchdog_checks_total",
                "Number of memory checks performed"
            )
            .expect("Failed to register checks_total"),

            restarts: register_int_counter!(
                "memory_watchdog_restarts_total",
                "Number of successful deployment restarts"
            )
            .expect("Failed to register restarts_total"),

            query_errors: register_int_counter!(
                "memory_watchdog_query_errors_total",
                "Number of failed memory usage queries"
            )
            .expect("Failed to register query_errors_total"),

            restart_errors: register_int_counter!(
                "memory_watchdog_restart_errors_total",
                "Number of failed deployment restarts"
            )
            .expect("Failed to register restart_errors_total"),

            memory_usage_mi: register_int_gauge!(
                "memory_watchdog_memory_usage_mi",
                "Aggregate memory usage observed by the last successful check, in Mi"
            )
            .expect("Failed to register memory_usage_mi"),

            memory_threshold_mi: register_int_gauge!(
                "memory_watchdog_memory_threshold_mi",
                "Configured restart threshold, in Mi"
            )
            .expect("Failed to register memory_threshold_mi"),
        }
    }
}

/// Handle to the process-wide watchdog metrics.
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct WatchdogMetrics {
    _private: (),
}

impl Default for WatchdogMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchdogMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(WatchdogMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &WatchdogMetricsInner {
        GLOBAL_METRICS.get_or_init(WatchdogMetricsInner::new)
    }

    pub fn observe_check_latency(&self, elapsed: Duration) {
        self.inner()
            .check_latency_seconds
            .observe(elapsed.as_secs_f64());
    }

    pub fn inc_checks(&self) {
        self.inner().checks.inc();
    }

    pub fn inc_restarts(&self) {
        self.inner().restarts.inc();
    }

    pub fn inc_query_errors(&self) {
        self.inner().query_errors.inc();
    }

    pub fn inc_restart_errors(&self) {
        self.inner().restart_errors.inc();
    }

    pub fn set_memory_usage(&self, usage_mi: u64) {
        self.inner()
            .memory_usage_mi
            .set(i64::try_from(usage_mi).unwrap_or(i64::MAX));
    }

    pub fn set_memory_threshold(&self, threshold_mi: u64) {
        self.inner()
            .memory_threshold_mi
            .set(i64::try_from(threshold_mi).unwrap_or(i64::MAX));
    }

    pub fn checks(&self) -> u64 {
        self.inner().checks.get()
    }

    pub fn restarts(&self) -> u64 {
        self.inner().restarts.get()
    }
}

/// Structured logger for watchdog events
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    namespace: String,
    deployment: String,
}

impl StructuredLogger {
    pub fn new(namespace: impl Into<String>, deployment: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            deployment: deployment.into(),
        }
    }

    pub fn log_startup(&self, version: &str, threshold_mi: u64, interval: Duration) {
        info!(
            event = "watchdog_started",
            namespace = %self.namespace,
            deployment = %self.deployment,
            version = %version,
            threshold_mi = threshold_mi,
            interval = ?interval,
            "Memory watchdog started"
        );
    }

    /// Emitted on every successful check when verbose
    pub fn log_usage(&self, usage_mi: u64) {
        info!(
            event = "memory_usage",
            namespace = %self.namespace,
            usage_mi = usage_mi,
            "Total memory usage in namespace '{}': {}Mi",
            self.namespace,
            usage_mi
        );
    }

    pub fn log_within_threshold(&self, usage_mi: u64, threshold_mi: u64) {
        info!(
            event = "within_threshold",
            namespace = %self.namespace,
            usage_mi = usage_mi,
            threshold_mi = threshold_mi,
            "Memory usage is within threshold. No action needed."
        );
    }

    pub fn log_threshold_exceeded(&self, usage_mi: u64, threshold_mi: u64) {
        warn!(
            event = "threshold_exceeded",
            namespace = %self.namespace,
            deployment = %self.deployment,
            usage_mi = usage_mi,
            threshold_mi = threshold_mi,
            "Memory usage exceeded threshold ({}Mi). Restarting deployment '{}'...",
            threshold_mi,
            self.deployment
        );
    }

    pub fn log_restarted(&self) {
        info!(
            event = "deployment_restarted",
            namespace = %self.namespace,
            deployment = %self.deployment,
            "Deployment successfully restarted."
        );
    }

    pub fn log_check_failed(&self, error: &dyn std::error::Error) {
        error!(
            event = "check_failed",
            namespace = %self.namespace,
            deployment = %self.deployment,
            error = %error,
            "Error during check: {}",
            error
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "watchdog_shutdown",
            namespace = %self.namespace,
            deployment = %self.deployment,
            reason = %reason,
            "Memory watchdog shutting down"
        );
    }
}

//! Watchdog polling loop
//!
//! One check-and-restart cycle per tick. The first tick fires one full
//! interval after `run` starts, and cancellation always wins over a tick
//! that is ready at the same time.

use super::{CheckOutcome, WatchdogState};
use crate::client::ClusterClient;
use crate::error::{ConfigError, CycleError, WatchdogError};
use crate::health::{components, HealthRegistry};
use crate::models::{
    UsageSample, WatchdogConfig, DEFAULT_CHECK_INTERVAL, DEFAULT_MEMORY_THRESHOLD_MI,
    DEFAULT_NAMESPACE,
};
use crate::observability::{StructuredLogger, WatchdogMetrics};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Restarts a deployment whenever its namespace uses too much memory
pub struct Watchdog {
    client: Arc<dyn ClusterClient>,
    config: WatchdogConfig,
    logger: StructuredLogger,
    metrics: Option<WatchdogMetrics>,
    health: Option<HealthRegistry>,
    state_tx: watch::Sender<WatchdogState>,
}

impl Watchdog {
    pub fn new(client: Arc<dyn ClusterClient>, config: WatchdogConfig) -> Self {
        let logger = StructuredLogger::new(config.namespace(), config.deployment());
        let (state_tx, _) = watch::channel(WatchdogState::Idle);

        Self {
            client,
            config,
            logger,
            metrics: None,
            health: None,
            state_tx,
        }
    }

    /// Report check results to `health`
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Record check results in the Prometheus metrics
    pub fn with_metrics(mut self, metrics: WatchdogMetrics) -> Self {
        metrics.set_memory_threshold(self.config.memory_threshold_mi());
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    pub fn state(&self) -> WatchdogState {
        *self.state_tx.borrow()
    }

    /// Follow state transitions, including the final `Stopped`
    pub fn subscribe(&self) -> watch::Receiver<WatchdogState> {
        self.state_tx.subscribe()
    }

    /// Run the monitoring loop until `cancel` fires.
    ///
    /// Cycle failures are logged and retried on the next tick; the only way
    /// out is cancellation, reported as [`WatchdogError::Cancelled`].
    pub async fn run(self, cancel: CancellationToken) -> Result<(), WatchdogError> {
        let period = self.config.check_interval();
        self.set_state(WatchdogState::Running).await;

        info!(
            namespace = %self.config.namespace(),
            deployment = %self.config.deployment(),
            threshold_mi = self.config.memory_threshold_mi(),
            interval = ?period,
            "Starting memory watchdog loop"
        );

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cycles = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let start = Instant::now();

                    // An in-flight cluster call is abandoned on cancellation
                    let result = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        result = self.check_and_restart(&cancel) => result,
                    };

                    cycles += 1;
                    self.record_cycle(&result, start.elapsed()).await;
                }
            }
        }

        debug!(cycles = cycles, "Memory watchdog loop finished");
        self.set_state(WatchdogState::Stopped).await;
        self.logger.log_shutdown("cancellation requested");

        Err(WatchdogError::Cancelled)
    }

    /// Query usage once and restart the deployment if it reached the threshold
    pub async fn check_and_restart(
        &self,
        cancel: &CancellationToken,
    ) -> Result<CheckOutcome, CycleError> {
        let usage_mi = self
            .client
            .get_memory_usage(cancel)
            .await
            .map_err(CycleError::Query)?;
        let sample = UsageSample::new(usage_mi);
        let threshold_mi = self.config.memory_threshold_mi();

        if self.config.verbose() {
            self.logger.log_usage(sample.total_mi);
        }

        if !sample.exceeds(threshold_mi) {
            if self.config.verbose() {
                self.logger.log_within_threshold(sample.total_mi, threshold_mi);
            }
            return Ok(CheckOutcome::WithinThreshold { usage_mi });
        }

        self.logger.log_threshold_exceeded(sample.total_mi, threshold_mi);
        self.client
            .restart_workload(cancel)
            .await
            .map_err(|source| CycleError::Restart { usage_mi, source })?;
        self.logger.log_restarted();

        Ok(CheckOutcome::Restarted { usage_mi })
    }

    async fn record_cycle(&self, result: &Result<CheckOutcome, CycleError>, elapsed: Duration) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_checks();
            metrics.observe_check_latency(elapsed);
        }

        match result {
            Ok(outcome) => {
                if let Some(metrics) = &self.metrics {
                    metrics.set_memory_usage(outcome.usage_mi());
                    if matches!(outcome, CheckOutcome::Restarted { .. }) {
                        metrics.inc_restarts();
                    }
                }
                if let Some(health) = &self.health {
                    health.set_healthy(components::USAGE_QUERY).await;
                    if matches!(outcome, CheckOutcome::Restarted { .. }) {
                        health.set_healthy(components::RESTART).await;
                    }
                }
            }
            Err(err) => {
                self.logger.log_check_failed(err);
                match err {
                    CycleError::Query(source) => {
                        if let Some(metrics) = &self.metrics {
                            metrics.inc_query_errors();
                        }
                        if let Some(health) = &self.health {
                            health
                                .set_degraded(components::USAGE_QUERY, source.to_string())
                                .await;
                        }
                    }
                    CycleError::Restart { usage_mi, source } => {
                        if let Some(metrics) = &self.metrics {
                            metrics.set_memory_usage(*usage_mi);
                            metrics.inc_restart_errors();
                        }
                        if let Some(health) = &self.health {
                            health.set_healthy(components::USAGE_QUERY).await;
                            health
                                .set_degraded(components::RESTART, source.to_string())
                                .await;
                        }
                    }
                }
            }
        }
    }

    async fn set_state(&self, state: WatchdogState) {
        self.state_tx.send_replace(state);
        if let Some(health) = &self.health {
            health.set_running(state == WatchdogState::Running).await;
        }
    }
}

/// Builder for a [`Watchdog`] with the standard defaults
pub struct WatchdogBuilder {
    client: Option<Arc<dyn ClusterClient>>,
    namespace: String,
    deployment: Option<String>,
    memory_threshold_mi: u64,
    check_interval: Duration,
    verbose: bool,
    health: Option<HealthRegistry>,
    metrics: Option<WatchdogMetrics>,
}

impl WatchdogBuilder {
    pub fn new() -> Self {
        Self {
            client: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            deployment: None,
            memory_threshold_mi: DEFAULT_MEMORY_THRESHOLD_MI,
            check_interval: DEFAULT_CHECK_INTERVAL,
            verbose: false,
            health: None,
            metrics: None,
        }
    }

    pub fn client(mut self, client: Arc<dyn ClusterClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn deployment(mut self, deployment: impl Into<String>) -> Self {
        self.deployment = Some(deployment.into());
        self
    }

    pub fn memory_threshold_mi(mut self, threshold: u64) -> Self {
        self.memory_threshold_mi = threshold;
        self
    }

    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn metrics(mut self, metrics: WatchdogMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the watchdog. A missing deployment or client is a configuration fault.
    pub fn build(self) -> Result<Watchdog, ConfigError> {
        let deployment = self.deployment.ok_or(ConfigError::MissingDeployment)?;
        let config = WatchdogConfig::new(
            self.namespace,
            deployment,
            self.memory_threshold_mi,
            self.check_interval,
            self.verbose,
        )?;
        let client = self.client.ok_or(ConfigError::MissingClient)?;

        let mut watchdog = Watchdog::new(client, config);
        if let Some(health) = self.health {
            watchdog = watchdog.with_health(health);
        }
        if let Some(metrics) = self.metrics {
            watchdog = watchdog.with_metrics(metrics);
        }
        Ok(watchdog)
    }
}

impl Default for WatchdogBuilder {
    fn default() -> Self {
        Self::new()
    }
}

//! Cluster access used by the watchdog
//!
//! The watchdog only ever talks to a [`ClusterClient`]. Two transports are
//! provided: [`KubectlClient`] shells out to `kubectl`, and [`KubeApiClient`]
//! talks to the Kubernetes API server directly.

mod kube_api;
mod kubectl;

pub use kube_api::{restart_patch, total_pod_memory_mi, KubeApiClient, RESTARTED_AT_ANNOTATION};
pub use kubectl::{KubectlClient, DEFAULT_KUBECTL_PATH};

use crate::error::AdapterError;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default bound applied by the adapters to each cluster call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Capability to observe and restart one workload
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Aggregate memory usage of the pods in the configured namespace, in Mi
    async fn get_memory_usage(&self, cancel: &CancellationToken) -> Result<u64, AdapterError>;

    /// Restart the configured deployment
    async fn restart_workload(&self, cancel: &CancellationToken) -> Result<(), AdapterError>;
}

/// Run `call` bounded by `timeout`, giving up as soon as `cancel` fires
pub(crate) async fn bounded<T, F>(
    operation: &str,
    timeout: Duration,
    cancel: &CancellationToken,
    call: F,
) -> Result<T, AdapterError>
where
    F: Future<Output = Result<T, AdapterError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AdapterError::Cancelled {
            operation: operation.to_string(),
        }),
        result = tokio::time::timeout(timeout, call) => match result {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Timeout {
                operation: operation.to_string(),
                timeout,
            }),
        },
    }
}

//! Kubernetes API backed cluster client
//!
//! Reads pod usage from the `metrics.k8s.io` API (the same source
//! `kubectl top` uses) and restarts deployments the way
//! `kubectl rollout restart` does, by stamping the pod template.

use super::{bounded, ClusterClient, DEFAULT_CALL_TIMEOUT};
use crate::error::AdapterError;
use crate::report::{bytes_to_mi, parse_quantity_bytes};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, ApiResource, DynamicObject, ListParams, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde_json::{json, Value};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Pod template annotation bumped to trigger a rolling restart
pub const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

/// Cluster client talking to the API server through `kube`
#[derive(Clone)]
pub struct KubeApiClient {
    client: Client,
    namespace: String,
    deployment: String,
    timeout: Duration,
}

impl KubeApiClient {
    pub fn new(client: Client, namespace: impl Into<String>, deployment: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            deployment: deployment.into(),
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Connect using `kubeconfig`, or the in-cluster / default configuration.
    ///
    /// `kubeconfig` may be a path list in `KUBECONFIG` form; the files are
    /// merged the way kubectl merges them.
    pub async fn connect(
        kubeconfig: Option<PathBuf>,
        namespace: impl Into<String>,
        deployment: impl Into<String>,
    ) -> Result<Self, AdapterError> {
        let client = match kubeconfig {
            Some(paths) => {
                let kubeconfig = read_kubeconfig(paths.as_os_str())?;
                let config =
                    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                        .await
                        .map_err(|e| {
                            AdapterError::Connect(format!(
                                "invalid kubeconfig {}: {e}",
                                paths.display()
                            ))
                        })?;
                Client::try_from(config).map_err(|e| AdapterError::Connect(e.to_string()))?
            }
            None => Client::try_default()
                .await
                .map_err(|e| AdapterError::Connect(e.to_string()))?,
        };

        Ok(Self::new(client, namespace, deployment))
    }

    /// Bound every API call by `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn pod_metrics_resource() -> ApiResource {
        ApiResource {
            group: "metrics.k8s.io".to_string(),
            version: "v1beta1".to_string(),
            api_version: "metrics.k8s.io/v1beta1".to_string(),
            kind: "PodMetrics".to_string(),
            plural: "pods".to_string(),
        }
    }
}

/// Read every kubeconfig in a path list and merge them.
///
/// Earlier files win on conflicting entries, including `current-context`.
pub fn read_kubeconfig(paths: &OsStr) -> Result<Kubeconfig, AdapterError> {
    let mut merged: Option<Kubeconfig> = None;

    for path in std::env::split_paths(paths).filter(|p| !p.as_os_str().is_empty()) {
        let next = Kubeconfig::read_from(&path).map_err(|e| {
            AdapterError::Connect(format!("failed to read kubeconfig {}: {e}", path.display()))
        })?;
        merged = Some(match merged {
            Some(config) => config.merge(next).map_err(|e| {
                AdapterError::Connect(format!(
                    "failed to merge kubeconfig {}: {e}",
                    path.display()
                ))
            })?,
            None => next,
        });
    }

    merged.ok_or_else(|| AdapterError::Connect("empty kubeconfig path list".to_string()))
}

/// Sum the memory usage of `PodMetrics` objects, in Mi.
///
/// Each pod is floored to whole Mi before summing, matching what
/// `kubectl top pods` prints. Unreadable quantities count as zero.
pub fn total_pod_memory_mi(pods: &[DynamicObject]) -> Result<u64, AdapterError> {
    let mut total_mi = 0u64;

    for pod in pods {
        let name = pod.metadata.name.as_deref().unwrap_or("<unnamed>");
        let containers = pod
            .data
            .get("containers")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                AdapterError::MalformedResponse(format!("pod metrics for {name} have no containers"))
            })?;

        let pod_bytes = containers
            .iter()
            .filter_map(|container| container.pointer("/usage/memory").and_then(Value::as_str))
            .filter_map(parse_quantity_bytes)
            .fold(0u64, u64::saturating_add);

        debug!(pod = %name, memory_bytes = pod_bytes, "Pod memory usage");
        total_mi = total_mi.saturating_add(bytes_to_mi(pod_bytes));
    }

    Ok(total_mi)
}

/// Merge patch that makes the deployment controller roll every pod
pub fn restart_patch(now: DateTime<Utc>) -> Value {
    json!({
        "spec": {
            "template": {
                "metadata": {
                    "annotations": {
                        RESTARTED_AT_ANNOTATION: now.to_rfc3339_opts(SecondsFormat::Secs, true)
                    }
                }
            }
        }
    })
}

#[async_trait]
impl ClusterClient for KubeApiClient {
    async fn get_memory_usage(&self, cancel: &CancellationToken) -> Result<u64, AdapterError> {
        let resource = Self::pod_metrics_resource();
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &self.namespace, &resource);
        let operation = format!("list pod metrics in {}", self.namespace);

        let pods = bounded(&operation, self.timeout, cancel, async {
            api.list(&ListParams::default())
                .await
                .map_err(|source| AdapterError::Api {
                    operation: operation.clone(),
                    source,
                })
        })
        .await?;

        total_pod_memory_mi(&pods.items)
    }

    async fn restart_workload(&self, cancel: &CancellationToken) -> Result<(), AdapterError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &self.namespace);
        let patch = restart_patch(Utc::now());
        let operation = format!("restart deployment/{}", self.deployment);

        bounded(&operation, self.timeout, cancel, async {
            api.patch(&self.deployment, &PatchParams::default(), &Patch::Merge(&patch))
                .await
                .map_err(|source| AdapterError::Api {
                    operation: operation.clone(),
                    source,
                })
        })
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_kubeconfig(dir: &TempDir, name: &str, current: bool) -> PathBuf {
        let mut body = format!(
            r#"apiVersion: v1
kind: Config
clusters:
- name: {name}
  cluster:
    server: https://127.0.0.1:6443
users:
- name: {name}
  user:
    token: {name}-token
contexts:
- name: {name}
  context:
    cluster: {name}
    user: {name}
"#
        );
        if current {
            body.push_str(&format!("current-context: {name}\n"));
        }
        let path = dir.path().join(format!("{name}.yaml"));
        std::fs::write(&path, body).unwrap();
        path
    }

    fn path_list(paths: &[&Path]) -> PathBuf {
        PathBuf::from(std::env::join_paths(paths).unwrap())
    }

    fn pod_metrics(name: &str, containers: Value) -> DynamicObject {
        let resource = KubeApiClient::pod_metrics_resource();
        let mut pod = DynamicObject::new(name, &resource).within("prod");
        pod.data = json!({ "window": "30s", "containers": containers });
        pod
    }

    #[test]
    fn test_total_pod_memory_sums_containers_and_pods() {
        let pods = vec![
            pod_metrics(
                "api-1",
                json!([
                    { "name": "app", "usage": { "cpu": "100m", "memory": "1000Mi" } },
                    { "name": "sidecar", "usage": { "cpu": "5m", "memory": "24Mi" } }
                ]),
            ),
            pod_metrics(
                "api-2",
                json!([{ "name": "app", "usage": { "cpu": "200m", "memory": "2097152Ki" } }]),
            ),
        ];

        assert_eq!(total_pod_memory_mi(&pods).unwrap(), 1024 + 2048);
    }

    #[test]
    fn test_unreadable_quantities_count_as_zero() {
        let pods = vec![pod_metrics(
            "api-1",
            json!([
                { "name": "app", "usage": { "memory": "garbage" } },
                { "name": "sidecar", "usage": {} },
                { "name": "proxy", "usage": { "memory": "64Mi" } }
            ]),
        )];

        assert_eq!(total_pod_memory_mi(&pods).unwrap(), 64);
    }

    #[test]
    fn test_pod_without_containers_is_malformed() {
        let resource = KubeApiClient::pod_metrics_resource();
        let pod = DynamicObject::new("api-1", &resource);

        let err = total_pod_memory_mi(&[pod]).unwrap_err();
        assert!(matches!(err, AdapterError::MalformedResponse(_)));
    }

    #[test]
    fn test_restart_patch_stamps_pod_template() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let patch = restart_patch(now);

        assert_eq!(
            patch["spec"]["template"]["metadata"]["annotations"][RESTARTED_AT_ANNOTATION],
            "2024-05-01T12:30:00Z"
        );
    }

    #[test]
    fn test_kubeconfig_path_list_is_merged() {
        let dir = TempDir::new().unwrap();
        let first = write_kubeconfig(&dir, "staging", true);
        let second = write_kubeconfig(&dir, "prod", false);

        let kubeconfig = read_kubeconfig(path_list(&[&first, &second]).as_os_str()).unwrap();

        let contexts: Vec<_> = kubeconfig.contexts.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(contexts, ["staging", "prod"]);
        assert_eq!(kubeconfig.current_context.as_deref(), Some("staging"));
    }

    #[test]
    fn test_missing_kubeconfig_in_list_fails_to_connect() {
        let dir = TempDir::new().unwrap();
        let first = write_kubeconfig(&dir, "staging", true);
        let missing = dir.path().join("missing.yaml");

        let err = read_kubeconfig(path_list(&[&first, &missing]).as_os_str()).unwrap_err();
        assert!(matches!(err, AdapterError::Connect(msg) if msg.contains("missing.yaml")));
    }

    #[tokio::test]
    async fn test_connect_accepts_kubeconfig_path_list() {
        let dir = TempDir::new().unwrap();
        let first = write_kubeconfig(&dir, "staging", true);
        let second = write_kubeconfig(&dir, "prod", false);

        let client =
            KubeApiClient::connect(Some(path_list(&[&first, &second])), "prod", "api").await;
        assert!(client.is_ok());
    }
}

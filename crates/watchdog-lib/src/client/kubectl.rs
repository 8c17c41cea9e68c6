//! `kubectl`-backed cluster client

use super::{bounded, ClusterClient, DEFAULT_CALL_TIMEOUT};
use crate::error::AdapterError;
use crate::report::summarize_report;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default location of the kubectl binary
pub const DEFAULT_KUBECTL_PATH: &str = "/usr/local/bin/kubectl";

/// Cluster client that shells out to `kubectl`
#[derive(Debug, Clone)]
pub struct KubectlClient {
    kubectl_path: PathBuf,
    namespace: String,
    deployment: String,
    timeout: Duration,
}

impl KubectlClient {
    pub fn new(
        kubectl_path: impl Into<PathBuf>,
        namespace: impl Into<String>,
        deployment: impl Into<String>,
    ) -> Self {
        Self {
            kubectl_path: kubectl_path.into(),
            namespace: namespace.into(),
            deployment: deployment.into(),
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Bound every kubectl invocation by `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn kubectl_path(&self) -> &Path {
        &self.kubectl_path
    }

    fn top_pods_args(&self) -> Vec<String> {
        vec![
            "top".to_string(),
            "pods".to_string(),
            "-n".to_string(),
            self.namespace.clone(),
        ]
    }

    fn rollout_restart_args(&self) -> Vec<String> {
        vec![
            "rollout".to_string(),
            "restart".to_string(),
            format!("deployment/{}", self.deployment),
            "-n".to_string(),
            self.namespace.clone(),
        ]
    }

    /// Run kubectl and return its stdout, failing with the combined output
    async fn run(&self, args: Vec<String>, cancel: &CancellationToken) -> Result<String, AdapterError> {
        let command = format!("{} {}", self.kubectl_path.display(), args.join(" "));
        debug!(command = %command, "Running kubectl");

        let mut child = Command::new(&self.kubectl_path);
        child
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = bounded(&command, self.timeout, cancel, async {
            child.output().await.map_err(|source| AdapterError::Spawn {
                command: command.clone(),
                source,
            })
        })
        .await?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AdapterError::CommandFailed {
                command,
                status: output.status,
                output: format!("{stdout}{stderr}").trim().to_string(),
            });
        }

        Ok(stdout)
    }
}

#[async_trait]
impl ClusterClient for KubectlClient {
    async fn get_memory_usage(&self, cancel: &CancellationToken) -> Result<u64, AdapterError> {
        let report = self.run(self.top_pods_args(), cancel).await?;
        let summary = summarize_report(&report);

        if summary.is_wholly_malformed() {
            warn!(
                namespace = %self.namespace,
                rows = summary.rows,
                "No memory figure could be read from kubectl top output, reporting 0Mi"
            );
        }

        Ok(summary.total_mi)
    }

    async fn restart_workload(&self, cancel: &CancellationToken) -> Result<(), AdapterError> {
        self.run(self.rollout_restart_args(), cancel).await?;
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Write an executable shell script standing in for kubectl
    fn fake_kubectl(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("kubectl");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn client(path: &Path) -> KubectlClient {
        KubectlClient::new(path, "prod", "api").with_timeout(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_memory_usage_from_top_output() {
        let dir = TempDir::new().unwrap();
        let kubectl = fake_kubectl(
            &dir,
            r#"if [ "$1 $2 $3 $4" = "top pods -n prod" ]; then
  echo "NAME    CPU(cores)   MEMORY(bytes)"
  echo "pod-1   100m         1000Mi"
  echo "pod-2   200m         2000Mi"
  exit 0
fi
echo "unexpected args: $*" >&2
exit 2"#,
        );

        let usage = client(&kubectl)
            .get_memory_usage(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(usage, 3000);
    }

    #[tokio::test]
    async fn test_restart_issues_rollout_restart() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("args.log");
        let kubectl = fake_kubectl(&dir, &format!("echo \"$*\" > {}", log.display()));

        client(&kubectl)
            .restart_workload(&CancellationToken::new())
            .await
            .unwrap();

        let args = std::fs::read_to_string(&log).unwrap();
        assert_eq!(args.trim(), "rollout restart deployment/api -n prod");
    }

    #[tokio::test]
    async fn test_non_zero_exit_carries_output() {
        let dir = TempDir::new().unwrap();
        let kubectl = fake_kubectl(&dir, "echo 'metrics not available yet' >&2\nexit 1");

        let err = client(&kubectl)
            .get_memory_usage(&CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            AdapterError::CommandFailed { output, .. } => {
                assert_eq!(output, "metrics not available yet");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_spawn_error() {
        let dir = TempDir::new().unwrap();
        let err = client(&dir.path().join("does-not-exist"))
            .restart_workload(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AdapterError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_hanging_kubectl_times_out() {
        let dir = TempDir::new().unwrap();
        let kubectl = fake_kubectl(&dir, "sleep 10");

        let err = client(&kubectl)
            .with_timeout(Duration::from_millis(100))
            .get_memory_usage(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AdapterError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_cancellation_abandons_running_kubectl() {
        let dir = TempDir::new().unwrap();
        let kubectl = fake_kubectl(&dir, "sleep 10");
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let err = client(&kubectl).get_memory_usage(&cancel).await.unwrap_err();

        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}

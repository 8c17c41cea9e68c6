//! Error types shared by the watchdog and its cluster adapters

use std::time::Duration;
use thiserror::Error;

/// Invalid or incomplete watchdog configuration. Fatal at startup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("deployment name is required (use --deployment or set DEPLOYMENT)")]
    MissingDeployment,

    #[error("namespace must not be empty")]
    EmptyNamespace,

    #[error("memory threshold must be greater than 0 Mi")]
    ZeroThreshold,

    #[error("check interval must be greater than zero")]
    ZeroInterval,

    #[error("a cluster client is required")]
    MissingClient,
}

/// Failure reported by a [`ClusterClient`](crate::client::ClusterClient) adapter
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {output}")]
    CommandFailed {
        command: String,
        status: std::process::ExitStatus,
        output: String,
    },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    #[error("{operation} cancelled")]
    Cancelled { operation: String },

    #[error("failed to connect to kubernetes: {0}")]
    Connect(String),

    #[error("kubernetes API error during {operation}: {source}")]
    Api {
        operation: String,
        #[source]
        source: kube::Error,
    },

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl AdapterError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AdapterError::Cancelled { .. })
    }
}

/// Failure of a single check-and-restart cycle. Never stops the loop.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("error getting memory usage: {0}")]
    Query(#[source] AdapterError),

    #[error("error restarting deployment at {usage_mi}Mi: {source}")]
    Restart {
        usage_mi: u64,
        #[source]
        source: AdapterError,
    },
}

/// Terminal outcome of [`Watchdog::run`](crate::watchdog::Watchdog::run)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WatchdogError {
    #[error("watchdog cancelled")]
    Cancelled,
}

impl WatchdogError {
    /// Cancellation is a clean shutdown, not a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, WatchdogError::Cancelled)
    }
}

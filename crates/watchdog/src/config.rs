//! Command-line and environment configuration

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use watchdog_lib::client::DEFAULT_KUBECTL_PATH;
use watchdog_lib::{ConfigError, WatchdogConfig};

/// Restart a deployment when its namespace uses too much memory
#[derive(Debug, Parser)]
#[command(name = "memory-watchdog")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Check interval (e.g. 30s, 5m, 1h30m)
    #[arg(long, env = "CHECK_INTERVAL", default_value = "5m", value_parser = parse_duration)]
    pub interval: Duration,

    /// Kubernetes namespace
    #[arg(long, env = "NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// Deployment name to restart
    #[arg(long, env = "DEPLOYMENT")]
    pub deployment: Option<String>,

    /// Memory threshold in Mi
    #[arg(long, env = "MEMORY_THRESHOLD", default_value_t = 5000)]
    pub threshold: u64,

    /// Path to kubectl binary
    #[arg(long, env = "KUBECTL_PATH", default_value = DEFAULT_KUBECTL_PATH)]
    pub kubectl: PathBuf,

    /// Enable verbose logging
    #[arg(long, short)]
    pub verbose: bool,

    /// How to reach the cluster
    #[arg(long, env = "WATCHDOG_CLIENT", value_enum, default_value_t = ClientKind::Kubectl)]
    pub client: ClientKind,

    /// Kubeconfig path or path list for the api client (in-cluster or default if unset)
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Upper bound for a single kubectl or API call
    #[arg(long, env = "COMMAND_TIMEOUT", default_value = "30s", value_parser = parse_duration)]
    pub command_timeout: Duration,

    /// Serve /healthz, /readyz and /metrics on this port
    #[arg(long, env = "WATCHDOG_API_PORT")]
    pub api_port: Option<u16>,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ClientKind {
    /// Shell out to kubectl
    Kubectl,
    /// Talk to the Kubernetes API server directly
    Api,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

impl Cli {
    /// Validated watchdog settings. A missing deployment is fatal.
    pub fn watchdog_config(&self) -> Result<WatchdogConfig, ConfigError> {
        let deployment = self
            .deployment
            .as_deref()
            .ok_or(ConfigError::MissingDeployment)?;

        WatchdogConfig::new(
            self.namespace.as_str(),
            deployment,
            self.threshold,
            self.interval,
            self.verbose,
        )
    }
}

/// Parse a Go-style duration such as `300ms`, `5m` or `1h30m`
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("empty duration".to_string());
    }
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }

    let invalid = || format!("invalid duration {input:?}");
    let mut rest = trimmed;
    let mut total_nanos = 0f64;

    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_end == 0 {
            return Err(invalid());
        }
        let value: f64 = rest[..number_end].parse().map_err(|_| invalid())?;
        rest = &rest[number_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_end] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => return Err(format!("missing unit in duration {input:?}")),
            unit => return Err(format!("unknown unit {unit:?} in duration {input:?}")),
        };
        rest = &rest[unit_end..];

        total_nanos += value * nanos_per_unit;
    }

    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

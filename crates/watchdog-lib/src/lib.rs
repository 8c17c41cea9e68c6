//! Memory watchdog library
//!
//! This crate provides the core functionality for:
//! - Parsing `kubectl top` style memory reports
//! - Querying and restarting workloads through pluggable cluster clients
//! - The periodic check-and-restart loop
//! - Health checks and observability

pub mod client;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod report;
pub mod watchdog;

pub use client::{ClusterClient, KubeApiClient, KubectlClient};
pub use error::{AdapterError, ConfigError, CycleError, WatchdogError};
pub use health::{ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse};
pub use models::*;
pub use observability::{StructuredLogger, WatchdogMetrics};
pub use report::parse_total_memory;
pub use watchdog::{CheckOutcome, Watchdog, WatchdogBuilder, WatchdogState};

pub use tokio_util::sync::CancellationToken;

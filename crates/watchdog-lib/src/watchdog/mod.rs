//! Memory watchdog
//!
//! Periodically samples the aggregate memory usage of a namespace and
//! restarts a deployment when it reaches the configured threshold.

mod r#loop;


pub use r#loop::{Watchdog, WatchdogBuilder};

use serde::Serialize;

/// Lifecycle of a [`Watchdog`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchdogState {
    /// Constructed, `run` not called yet
    Idle,
    /// Monitoring loop active
    Running,
    /// Loop returned; terminal
    Stopped,
}

/// Successful result of one check-and-restart cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    WithinThreshold { usage_mi: u64 },
    Restarted { usage_mi: u64 },
}

impl CheckOutcome {
    pub fn usage_mi(&self) -> u64 {
        match self {
            CheckOutcome::WithinThreshold { usage_mi } | CheckOutcome::Restarted { usage_mi } => {
                *usage_mi
            }
        }
    }
}

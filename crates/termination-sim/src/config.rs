//! Simulation configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use termination_core::{DetectionConfig, NodeId, RingConfig};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimConfigError {
    #[error("At least one run is required")]
    NoRuns,

    #[error("Cannot crash {crashes} of {nodes} nodes; at least one must survive")]
    TooManyCrashes { crashes: usize, nodes: usize },

    #[error("Timeout must be greater than zero")]
    ZeroTimeout,

    #[error(transparent)]
    Ring(#[from] termination_core::ConfigError),
}

/// Everything one simulator invocation needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Ring size
    pub nodes: usize,
    /// Independent runs started concurrently
    pub runs: usize,
    /// Nodes crashed per run
    pub crashes: usize,
    /// Upper bound of one simulated work burst
    pub max_work_ms: u64,
    /// Upper bound of messages sent after one work burst
    pub fanout: usize,
    /// Application messages per run before the workload dries up
    pub messages: usize,
    /// Crash detection latency
    pub detection_delay_ms: u64,
    /// Seed for the workload; random if unset
    pub seed: Option<u64>,
    /// Give up on a run after this long
    pub timeout_ms: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            nodes: 4,
            runs: 1,
            crashes: 0,
            max_work_ms: 20,
            fanout: 2,
            messages: 100,
            detection_delay_ms: 0,
            seed: None,
            timeout_ms: 30_000,
        }
    }
}

impl SimConfig {
    pub fn validate(&self) -> Result<(), SimConfigError> {
        self.ring_config().validate()?;
        if self.runs == 0 {
            return Err(SimConfigError::NoRuns);
        }
        if self.crashes >= self.nodes {
            return Err(SimConfigError::TooManyCrashes {
                crashes: self.crashes,
                nodes: self.nodes,
            });
        }
        if self.timeout_ms == 0 {
            return Err(SimConfigError::ZeroTimeout);
        }
        Ok(())
    }

    /// Ring configuration shared by every run.
    pub fn ring_config(&self) -> RingConfig {
        RingConfig {
            nodes: self.nodes,
            origin: NodeId::new(0),
            detection: DetectionConfig {
                delay_ms: self.detection_delay_ms,
            },
        }
    }

    pub fn max_work(&self) -> Duration {
        Duration::from_millis(self.max_work_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Seed for run `index`, so runs differ but stay reproducible.
    pub fn run_seed(&self, base: u64, index: usize) -> u64 {
        base.wrapping_add((index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }
}

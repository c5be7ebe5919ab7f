//! Ring configuration.

use crate::NodeId;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Ring must have at least one node")]
    EmptyRing,

    #[error("Ring of {0} nodes is too large")]
    TooManyNodes(usize),

    #[error("Origin {origin} is outside a ring of {nodes} nodes")]
    OriginOutOfRange { origin: NodeId, nodes: usize },

    #[error("Failed to parse ring config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Configuration for one ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Number of nodes (default: 4)
    pub nodes: usize,
    /// Node that creates the first token (default: 0)
    pub origin: NodeId,
    /// Crash detection behaviour
    pub detection: DetectionConfig,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            nodes: 4,
            origin: NodeId::new(0),
            detection: DetectionConfig::default(),
        }
    }
}

impl RingConfig {
    /// Ring of `nodes` with defaults for everything else.
    pub fn with_nodes(nodes: usize) -> Self {
        Self {
            nodes,
            ..Self::default()
        }
    }

    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nodes == 0 {
            return Err(ConfigError::EmptyRing);
        }
        if u32::try_from(self.nodes).is_err() {
            return Err(ConfigError::TooManyNodes(self.nodes));
        }
        if self.origin.index() >= self.nodes {
            return Err(ConfigError::OriginOutOfRange {
                origin: self.origin,
                nodes: self.nodes,
            });
        }
        Ok(())
    }
}

/// How quickly survivors learn about a crash.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Delay between a crash and its observation in milliseconds (default: 0)
    pub delay_ms: u64,
}

impl DetectionConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

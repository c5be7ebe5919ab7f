//! A running ring: network, one task per node, and the run it belongs to.

use crate::config::{ConfigError, RingConfig};
use crate::network::{Network, NetworkError};
use crate::node::{spawn_node, NodeHandle};
use crate::run::RunContext;
use crate::token::Token;
use crate::NodeId;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Debug, Error)]
pub enum RingError {
    #[error("Invalid ring config: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to bootstrap ring: {0}")]
    Network(#[from] NetworkError),
}

pub struct Ring {
    config: RingConfig,
    network: Arc<Network>,
    nodes: Vec<NodeHandle>,
    run: Arc<RunContext>,
    tasks: Vec<JoinHandle<()>>,
}

impl Ring {
    /// Spawn every node and hand the bootstrap token to the origin.
    ///
    /// Must be called from within a tokio runtime. Nodes start active; the
    /// application drives them passive through their handles.
    pub fn start(config: RingConfig, run: Arc<RunContext>) -> Result<Self, RingError> {
        config.validate()?;

        let (network, channels) = Network::new(config.nodes, config.detection.clone());
        let nodes: Vec<_> = NodeId::all(config.nodes)
            .map(|id| NodeHandle::new(id, config.origin, Arc::clone(&network)))
            .collect();

        let tasks = nodes
            .iter()
            .cloned()
            .zip(channels)
            .map(|(node, channels)| spawn_node(node, channels, Arc::clone(&run)))
            .collect();

        info!(run = %run.id(), nodes = config.nodes, origin = %config.origin, "Starting ring");
        network.send(Token::bootstrap(config.origin, config.nodes), config.origin)?;

        Ok(Self {
            config,
            network,
            nodes,
            run,
            tasks,
        })
    }

    pub fn config(&self) -> &RingConfig {
        &self.config
    }

    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }

    pub fn run(&self) -> &Arc<RunContext> {
        &self.run
    }

    pub fn nodes(&self) -> &[NodeHandle] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeHandle> {
        self.nodes.get(id.index())
    }

    /// Fail-stop a node. Returns false if unknown or already crashed.
    pub fn crash(&self, id: NodeId) -> bool {
        self.node(id).is_some_and(NodeHandle::crash)
    }

    /// Wait for the run's termination announcement.
    pub async fn wait_terminated(&self) -> Option<NodeId> {
        self.run.wait_terminated().await
    }

    /// Stop every node task and wait for them to wind down.
    pub async fn shutdown(mut self) {
        let tasks = std::mem::take(&mut self.tasks);
        for task in &tasks {
            task.abort();
        }
        futures::future::join_all(tasks).await;
    }
}

impl Drop for Ring {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

//! In-process ring transport.
//!
//! Each node has one unbounded inbox for tokens and one for crash notices.
//! A single channel per destination keeps delivery FIFO per directed link,
//! which sequence validation relies on.
//!
//! The network also plays the crash detector: [`Network::crash`] marks a
//! node as failed and, after the configured detection delay, tells every
//! survivor.

use crate::config::DetectionConfig;
use crate::token::Token;
use crate::NodeId;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use web_time::Instant;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("Inbox closed for node {0}")]
    InboxClosed(NodeId),
}

/// Receiving ends handed to a node's task.
pub struct NodeChannels {
    pub tokens: mpsc::UnboundedReceiver<Token>,
    pub crashes: mpsc::UnboundedReceiver<NodeId>,
}

pub struct Network {
    inboxes: Vec<mpsc::UnboundedSender<Token>>,
    crash_notices: Vec<mpsc::UnboundedSender<NodeId>>,
    crashed: Vec<AtomicBool>,
    /// Alive nodes currently active
    active: AtomicUsize,
    /// When the last active node went passive
    quiescent_at: Mutex<Option<Instant>>,
    detection: DetectionConfig,
}

impl Network {
    /// Create a network of `ring_size` nodes, all initially active.
    ///
    /// Returns the channels for each node, indexed by node id.
    pub fn new(ring_size: usize, detection: DetectionConfig) -> (Arc<Self>, Vec<NodeChannels>) {
        let mut inboxes = Vec::with_capacity(ring_size);
        let mut crash_notices = Vec::with_capacity(ring_size);
        let mut channels = Vec::with_capacity(ring_size);

        for _ in 0..ring_size {
            let (token_tx, token_rx) = mpsc::unbounded_channel();
            let (crash_tx, crash_rx) = mpsc::unbounded_channel();
            inboxes.push(token_tx);
            crash_notices.push(crash_tx);
            channels.push(NodeChannels {
                tokens: token_rx,
                crashes: crash_rx,
            });
        }

        let network = Self {
            inboxes,
            crash_notices,
            crashed: (0..ring_size).map(|_| AtomicBool::new(false)).collect(),
            active: AtomicUsize::new(ring_size),
            quiescent_at: Mutex::new(None),
            detection,
        };
        (Arc::new(network), channels)
    }

    pub fn ring_size(&self) -> usize {
        self.inboxes.len()
    }

    /// Hand `token` to `to`'s inbox without waiting for it to be processed.
    ///
    /// Tokens for a crashed node are dropped silently.
    pub fn send(&self, token: Token, to: NodeId) -> Result<(), NetworkError> {
        let inbox = self
            .inboxes
            .get(to.index())
            .ok_or(NetworkError::UnknownNode(to))?;

        if self.is_crashed(to) {
            debug!(
                node = %to,
                sender = %token.sender(),
                sequence = token.sequence(),
                "Dropping token for crashed node"
            );
            return Ok(());
        }

        inbox.send(token).map_err(|_| NetworkError::InboxClosed(to))
    }

    pub fn is_crashed(&self, id: NodeId) -> bool {
        self.crashed
            .get(id.index())
            .is_some_and(|c| c.load(Ordering::Acquire))
    }

    /// Ids that have not crashed.
    pub fn alive(&self) -> Vec<NodeId> {
        NodeId::all(self.ring_size())
            .filter(|id| !self.is_crashed(*id))
            .collect()
    }

    /// Fail-stop `id` and schedule crash notices for the survivors.
    ///
    /// Returns false if `id` is unknown or already crashed.
    pub fn crash(&self, id: NodeId) -> bool {
        let Some(flag) = self.crashed.get(id.index()) else {
            return false;
        };
        if flag.swap(true, Ordering::AcqRel) {
            return false;
        }

        let targets: Vec<_> = NodeId::all(self.ring_size())
            .filter(|other| *other != id && !self.is_crashed(*other))
            .map(|other| self.crash_notices[other.index()].clone())
            .collect();

        let delay = self.detection.delay();
        if delay.is_zero() {
            notify_crash(&targets, id);
            return true;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    notify_crash(&targets, id);
                });
            }
            Err(_) => {
                warn!(node = %id, "No runtime for delayed crash detection, notifying now");
                notify_crash(&targets, id);
            }
        }
        true
    }

    /// Record a passive -> active transition of some node.
    pub fn note_active(&self) {
        self.active.fetch_add(1, Ordering::AcqRel);
    }

    /// Record an active -> passive transition of some node.
    pub fn note_passive(&self) {
        let previous = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if previous == Ok(1) {
            *self.quiescent_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
        }
    }

    /// Number of nodes currently active.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// When the ring most recently became entirely passive.
    pub fn last_quiescent(&self) -> Option<Instant> {
        *self.quiescent_at.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Time since the ring most recently became entirely passive.
    pub fn since_quiescent(&self) -> Option<Duration> {
        self.last_quiescent().map(|at| at.elapsed())
    }
}

fn notify_crash(targets: &[mpsc::UnboundedSender<NodeId>], crashed: NodeId) {
    for target in targets {
        // A closed channel means that node's task is gone; nothing to tell.
        let _ = target.send(crashed);
    }
}

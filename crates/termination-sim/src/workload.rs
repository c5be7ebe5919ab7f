//! Simulated distributed application.
//!
//! Every node runs an application task that alternates between bursts of
//! work and waiting for messages. Work ends with a few messages to random
//! peers; receiving a message starts another burst. A shared message budget
//! guarantees the computation eventually dies out.
//!
//! The task reports every transition to the node's handle, which is all the
//! termination detector sees of the application.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use termination_core::{NodeHandle, NodeId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// An application message; only the sender matters.
#[derive(Debug, Clone, Copy)]
struct AppMessage {
    from: NodeId,
}

/// Shape of the simulated work.
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    pub max_work: Duration,
    pub fanout: usize,
    pub messages: usize,
}

/// Shared message budget and counters.
struct Budget {
    remaining: AtomicUsize,
    sent: AtomicUsize,
    received: AtomicUsize,
}

impl Budget {
    fn take(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}

pub struct Workload {
    tasks: Vec<JoinHandle<()>>,
    budget: Arc<Budget>,
}

impl Workload {
    /// Start one application task per node.
    pub fn spawn(nodes: &[NodeHandle], config: &WorkloadConfig, seed: u64) -> Self {
        let budget = Arc::new(Budget {
            remaining: AtomicUsize::new(config.messages),
            sent: AtomicUsize::new(0),
            received: AtomicUsize::new(0),
        });

        let (senders, inboxes): (Vec<_>, Vec<_>) =
            nodes.iter().map(|_| mpsc::unbounded_channel()).unzip();
        let senders = Arc::new(senders);

        let tasks = nodes
            .iter()
            .cloned()
            .zip(inboxes)
            .map(|(node, inbox)| {
                let rng = StdRng::seed_from_u64(seed.wrapping_add(node.id().index() as u64));
                let app = AppNode {
                    node,
                    inbox,
                    peers: Arc::clone(&senders),
                    budget: Arc::clone(&budget),
                    config: config.clone(),
                    rng,
                };
                tokio::spawn(app.run())
            })
            .collect();

        Self { tasks, budget }
    }

    /// Application messages sent so far.
    pub fn messages_sent(&self) -> usize {
        self.budget.sent.load(Ordering::Acquire)
    }

    /// Application messages received so far.
    pub fn messages_received(&self) -> usize {
        self.budget.received.load(Ordering::Acquire)
    }

    pub async fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        futures::future::join_all(self.tasks).await;
    }
}

struct AppNode {
    node: NodeHandle,
    inbox: mpsc::UnboundedReceiver<AppMessage>,
    peers: Arc<Vec<mpsc::UnboundedSender<AppMessage>>>,
    budget: Arc<Budget>,
    config: WorkloadConfig,
    rng: StdRng,
}

impl AppNode {
    async fn run(mut self) {
        let id = self.node.id();
        while !self.node.is_crashed() {
            self.work().await;
            self.node.set_passive();

            // Messages from peers known to be crashed don't reactivate us.
            loop {
                let Some(message) = self.inbox.recv().await else {
                    debug!(node = %id, "Application inbox closed");
                    return;
                };
                if self.node.record_receive(message.from) {
                    self.budget.received.fetch_add(1, Ordering::AcqRel);
                    break;
                }
            }
        }
        debug!(node = %id, "Application stopped");
    }

    /// One burst: stay busy for a while, then send a few messages.
    async fn work(&mut self) {
        let max_ms = u64::try_from(self.config.max_work.as_millis()).unwrap_or(u64::MAX);
        let busy = Duration::from_millis(self.rng.random_range(0..=max_ms));
        tokio::time::sleep(busy).await;

        let fanout = self.rng.random_range(0..=self.config.fanout);
        for _ in 0..fanout {
            let Some(to) = self.pick_peer() else {
                return;
            };
            if !self.budget.take() {
                return;
            }
            if self.node.record_send(to) {
                // The receiver's task may be gone with a crash; the message is lost.
                let _ = self.peers[to.index()].send(AppMessage { from: self.node.id() });
                self.budget.sent.fetch_add(1, Ordering::AcqRel);
            }
        }
    }

    fn pick_peer(&mut self) -> Option<NodeId> {
        let n = self.peers.len();
        if n < 2 {
            return None;
        }
        let offset = self.rng.random_range(1..n);
        Some(NodeId::from((self.node.id().index() + offset) % n))
    }
}

/// Crash `count` random nodes at random points in the first `window`.
///
/// Returns the ids chosen; the task finishes once all of them crashed.
pub fn spawn_crashes(
    nodes: &[NodeHandle],
    count: usize,
    window: Duration,
    seed: u64,
) -> (Vec<NodeId>, JoinHandle<()>) {
    let mut rng = StdRng::seed_from_u64(seed ^ 0xC3A5_C85C_97CB_3127);
    let count = count.min(nodes.len().saturating_sub(1));

    let mut plan: Vec<_> = rand::seq::index::sample(&mut rng, nodes.len(), count)
        .into_iter()
        .map(|i| {
            let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
            let at = Duration::from_millis(rng.random_range(0..=window_ms));
            (at, nodes[i].clone())
        })
        .collect();
    plan.sort_by_key(|(at, _)| *at);

    let victims = plan.iter().map(|(_, node)| node.id()).collect();
    let task = tokio::spawn(async move {
        let mut elapsed = Duration::ZERO;
        for (at, node) in plan {
            tokio::time::sleep(at.saturating_sub(elapsed)).await;
            elapsed = at;
            if node.crash() {
                info!(node = %node.id(), after_ms = ?at, "Injected crash");
            }
        }
    });
    (victims, task)
}

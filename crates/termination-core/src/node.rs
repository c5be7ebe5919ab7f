//! Per-node runtime.
//!
//! One tokio task per node drains that node's inboxes one message at a time,
//! so a token is always processed to completion before the next is looked
//! at. The engine sits behind a mutex shared with the node's [`NodeHandle`],
//! which the application uses to report activity and message traffic.
//!
//! Waiting for passivity is a condition wait on a [`Notify`]: the lock is
//! released while waiting so `set_passive` can take it and wake us.

use crate::engine::{Outcome, ProtocolEngine};
use crate::events::ProbeEvent;
use crate::network::{Network, NodeChannels};
use crate::run::RunContext;
use crate::state::NodeState;
use crate::token::Token;
use crate::NodeId;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use web_time::Instant;

struct Shared {
    engine: Mutex<ProtocolEngine>,
    passive: Notify,
}

/// Handle to one node: the application-facing side of the node's state.
#[derive(Clone)]
pub struct NodeHandle {
    id: NodeId,
    shared: Arc<Shared>,
    network: Arc<Network>,
}

impl NodeHandle {
    pub fn new(id: NodeId, origin: NodeId, network: Arc<Network>) -> Self {
        let engine = ProtocolEngine::with_origin(id, network.ring_size(), origin);
        Self {
            id,
            shared: Arc::new(Shared {
                engine: Mutex::new(engine),
                passive: Notify::new(),
            }),
            network,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, ProtocolEngine> {
        self.shared.engine.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Read this node's state.
    pub fn with_state<R>(&self, f: impl FnOnce(&NodeState) -> R) -> R {
        f(self.lock().state())
    }

    pub fn is_crashed(&self) -> bool {
        self.with_state(NodeState::is_crashed)
    }

    // ==================== Application activity ====================

    pub fn set_active(&self) {
        let changed = {
            let mut engine = self.lock();
            !engine.state().is_crashed() && engine.state_mut().set_active()
        };
        if changed {
            self.network.note_active();
        }
    }

    pub fn set_passive(&self) {
        let changed = {
            let mut engine = self.lock();
            !engine.state().is_crashed() && engine.state_mut().set_passive()
        };
        if changed {
            self.network.note_passive();
            self.shared.passive.notify_waiters();
        }
    }

    /// Account for an application message sent to `to`.
    pub fn record_send(&self, to: NodeId) -> bool {
        self.lock().state_mut().record_send(to)
    }

    /// Account for an application message received from `from`.
    ///
    /// Makes the node active. Returns false if the message was discarded.
    pub fn record_receive(&self, from: NodeId) -> bool {
        let (accepted, woke) = {
            let mut engine = self.lock();
            let was_passive = engine.state().is_passive();
            let accepted = engine.state_mut().record_receive(from);
            (accepted, accepted && was_passive)
        };
        if woke {
            self.network.note_active();
        }
        accepted
    }

    /// Fail-stop this node.
    ///
    /// From now on every token it receives is dropped and the survivors are
    /// told through the network's crash notices.
    pub fn crash(&self) -> bool {
        let was_active = {
            let mut engine = self.lock();
            if engine.state().is_crashed() {
                return false;
            }
            engine.state_mut().mark_crashed();
            !engine.state().is_passive()
        };
        if was_active {
            self.network.note_passive();
        }
        self.network.crash(self.id);
        self.shared.passive.notify_waiters();
        warn!(node = %self.id, "Node crashed");
        true
    }

    // ==================== Protocol runtime ====================

    /// Lock the engine once the node is passive (or crashed).
    async fn lock_when_passive(&self) -> MutexGuard<'_, ProtocolEngine> {
        loop {
            let notified = self.shared.passive.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let engine = self.lock();
                if engine.state().is_passive() || engine.state().is_crashed() {
                    return engine;
                }
            }

            debug!(node = %self.id, "Waiting for node to become passive");
            notified.await;
        }
    }

    async fn on_token(&self, token: Token, run: &RunContext) {
        let accepted = self.lock().receive(token);
        let token = match accepted {
            Ok(token) => token,
            Err(reason) => {
                debug!(node = %self.id, %reason, "Dropping token");
                run.events().emit(ProbeEvent::TokenDropped {
                    node: self.id,
                    reason: reason.to_string(),
                });
                return;
            }
        };

        let (outcome, elapsed, successors) = {
            let mut engine = self.lock_when_passive().await;
            if engine.state().is_crashed() {
                return;
            }
            let before = engine.state().successor();
            let started = Instant::now();
            let outcome = engine.handle(token);
            (outcome, started.elapsed(), (before, engine.state().successor()))
        };

        self.note_repair(successors, run);
        if let Outcome::Forward { token, .. } = &outcome {
            run.events().emit(ProbeEvent::TokenHandled {
                node: self.id,
                sequence: token.sequence(),
                elapsed_ns: u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX),
                size_bytes: token.encoded_len(),
            });
        }
        self.apply(outcome, run);
    }

    async fn on_crash_observed(&self, crashed: NodeId, run: &RunContext) {
        let (outcomes, successors) = {
            let mut engine = self.lock();
            let before = engine.state().successor();
            let outcomes = engine.observe_crash(crashed);
            (outcomes, (before, engine.state().successor()))
        };
        info!(node = %self.id, crashed = %crashed, "Observed crash");
        run.events().emit(ProbeEvent::CrashObserved {
            node: self.id,
            crashed,
        });
        self.note_repair(successors, run);

        for outcome in outcomes {
            match outcome {
                Outcome::AnnounceWhenPassive => {
                    let alive = {
                        let mut engine = self.lock_when_passive().await;
                        let alive = !engine.state().is_crashed();
                        if alive {
                            engine.mark_terminated();
                        }
                        alive
                    };
                    if alive {
                        self.apply(Outcome::Announce, run);
                    }
                }
                Outcome::RetransmitWhenPassive(last) => {
                    let (retransmit, successors) = {
                        let mut engine = self.lock_when_passive().await;
                        let before = engine.state().successor();
                        let retransmit = engine.retransmit(last);
                        (retransmit, (before, engine.state().successor()))
                    };
                    self.note_repair(successors, run);
                    if let Some(outcome) = retransmit {
                        if let Outcome::Forward { to, .. } = &outcome {
                            run.events().emit(ProbeEvent::TokenRetransmitted {
                                node: self.id,
                                to: *to,
                            });
                        }
                        self.apply(outcome, run);
                    }
                }
                other => self.apply(other, run),
            }
        }
    }

    fn note_repair(&self, (before, after): (NodeId, NodeId), run: &RunContext) {
        if before != after && after != self.id {
            run.events().emit(ProbeEvent::SuccessorRepaired {
                node: self.id,
                successor: after,
            });
        }
    }

    fn apply(&self, outcome: Outcome, run: &RunContext) {
        match outcome {
            Outcome::Forward { to, token } => {
                debug!(node = %self.id, to = %to, sequence = token.sequence(), "Forwarding token");
                if let Err(e) = self.network.send(token, to) {
                    warn!(node = %self.id, "Failed to forward token: {}", e);
                }
            }
            Outcome::Announce => {
                run.announce(
                    self.id,
                    self.network.since_quiescent(),
                    self.network.active_count(),
                );
            }
            Outcome::AnnounceWhenPassive | Outcome::RetransmitWhenPassive(_) => {
                warn!(node = %self.id, "Deferred outcome reached apply; ignoring");
            }
        }
    }
}

/// Spawn the task that drives `node`.
pub fn spawn_node(
    node: NodeHandle,
    mut channels: NodeChannels,
    run: Arc<RunContext>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                Some(crashed) = channels.crashes.recv() => {
                    node.on_crash_observed(crashed, &run).await;
                }
                Some(token) = channels.tokens.recv() => {
                    node.on_token(token, &run).await;
                }
                else => break,
            }
        }
        debug!(node = %node.id, "Node task stopped");
    })
}

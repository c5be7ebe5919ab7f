//! Crash observation and token recovery.
//!
//! How a crash is first noticed is up to the network (see
//! [`crate::Network::crash`]). Once a node is told, this module:
//! 1. Records the crashed id in the node's REPORT set
//! 2. Asks for a successor repair if the crashed node was the successor
//! 3. Asks for a retransmit if the last token this node forwarded went to
//!    the crashed node, since it may have died holding it
//!
//! Nobody forwards the bootstrap token to the origin, so every other node
//! keeps a standby copy of it until it forwards a token of its own. The copy
//! is released by the nearest node before the origin that is still alive,
//! once the origin and everything in between are known crashed.
//!
//! The observer never acts on its own; it hands back [`Recovery`] actions
//! for the engine to carry out.

use crate::state::NodeState;
use crate::token::Token;
use crate::NodeId;

/// The last token this node forwarded and where it went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastToken {
    pub destination: NodeId,
    pub token: Token,
}

/// Action needed after a crash was observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// The successor crashed; pick the next alive node
    RepairSuccessor,
    /// The token may have been lost with the crashed node
    Retransmit(LastToken),
}

/// Per-node failure observer.
#[derive(Debug, Default)]
pub struct FailureObserver {
    last: Option<LastToken>,
    /// Standby copy of the bootstrap token addressed to the origin
    bootstrap: Option<LastToken>,
    /// Crashes this node has been told about, for diagnostics
    observed: usize,
}

impl FailureObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep an independent copy of a forwarded token.
    ///
    /// Forwarding anything proves the bootstrap token got past the origin,
    /// so the standby copy is dropped.
    pub fn record_snapshot(&mut self, destination: NodeId, token: &Token) {
        self.last = Some(LastToken {
            destination,
            token: token.snapshot(),
        });
        self.bootstrap = None;
    }

    /// Hold a copy of the bootstrap token in case `origin` dies with it.
    pub fn expect_bootstrap(&mut self, origin: NodeId, token: &Token) {
        self.bootstrap = Some(LastToken {
            destination: origin,
            token: token.snapshot(),
        });
    }

    /// Drop the standby bootstrap copy.
    pub fn forget_bootstrap(&mut self) {
        self.bootstrap = None;
    }

    pub fn bootstrap(&self) -> Option<&LastToken> {
        self.bootstrap.as_ref()
    }

    pub fn last_token(&self) -> Option<&LastToken> {
        self.last.as_ref()
    }

    /// Number of distinct crashes observed so far.
    pub fn observed(&self) -> usize {
        self.observed
    }

    /// Fold a crash notification into `state`.
    ///
    /// Duplicate notifications, notifications about crashes the node already
    /// learned from a token, and notifications naming the node itself yield
    /// no actions.
    pub fn observe_crash(&mut self, state: &mut NodeState, crashed: NodeId) -> Vec<Recovery> {
        let mut actions = Vec::new();

        if !state.observe_crash(crashed) {
            return actions;
        }
        self.observed += 1;

        if state.successor() == crashed {
            actions.push(Recovery::RepairSuccessor);
        }

        if self.last.as_ref().is_some_and(|l| l.destination == crashed) {
            if let Some(last) = self.last.take() {
                actions.push(Recovery::Retransmit(last));
            }
        }

        if self
            .bootstrap
            .as_ref()
            .is_some_and(|b| crashed_up_to(state, b.destination))
        {
            if let Some(bootstrap) = self.bootstrap.take() {
                actions.push(Recovery::Retransmit(bootstrap));
            }
        }

        actions
    }

    /// Forget the stored snapshots (between runs).
    pub fn reset(&mut self) {
        self.last = None;
        self.bootstrap = None;
        self.observed = 0;
    }
}

/// Every node after `state`'s own id up to and including `until` is known crashed.
fn crashed_up_to(state: &NodeState, until: NodeId) -> bool {
    let n = state.ring_size();
    let mut next = state.id().next(n);
    for _ in 0..n {
        if next == state.id() || !state.knows_crashed(next) {
            return false;
        }
        if next == until {
            return true;
        }
        next = next.next(n);
    }
    false
}

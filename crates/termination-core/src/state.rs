//! Per-node runtime state.
//!
//! Owned by exactly one node. The protocol engine mutates it while handling
//! tokens; the application mutates activity and message counters through the
//! node's handle, under the same lock.
//!
//! Invariants:
//! - `crashed` only grows
//! - `crashed` and `report` are disjoint

use crate::NodeId;
use std::collections::BTreeSet;

/// Whether a node has outstanding application work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Active,
    Passive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeState {
    id: NodeId,
    ring_size: usize,
    /// Node that bootstraps the run
    origin: NodeId,
    activity: Activity,
    /// Fail-stop flag for this node itself
    halted: bool,
    /// Furthest node this node considers black (`id` means "self is black")
    black: NodeId,
    successor: NodeId,
    /// Sequence of the last accepted token
    sequence: u64,
    /// Messages sent to minus messages received from each peer
    counts: Vec<i64>,
    crashed: BTreeSet<NodeId>,
    report: BTreeSet<NodeId>,
}

impl NodeState {
    /// Fresh state for a run bootstrapped by node 0.
    pub fn new(id: NodeId, ring_size: usize) -> Self {
        Self::with_origin(id, ring_size, NodeId::new(0))
    }

    /// Fresh state: active, black, successor is the next id clockwise.
    ///
    /// Nodes below `origin` first see the token after it wraps past id 0,
    /// one lap ahead, so they start one sequence further along.
    pub fn with_origin(id: NodeId, ring_size: usize, origin: NodeId) -> Self {
        Self {
            id,
            ring_size,
            origin,
            activity: Activity::Active,
            halted: false,
            black: id,
            successor: id.next(ring_size),
            sequence: u64::from(id < origin),
            counts: vec![0; ring_size],
            crashed: BTreeSet::new(),
            report: BTreeSet::new(),
        }
    }

    /// Reset between independent runs.
    pub fn reset(&mut self) {
        *self = Self::with_origin(self.id, self.ring_size, self.origin);
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn ring_size(&self) -> usize {
        self.ring_size
    }

    /// Node the bootstrap token was handed to.
    pub fn origin(&self) -> NodeId {
        self.origin
    }

    // ==================== Activity ====================

    pub fn activity(&self) -> Activity {
        self.activity
    }

    pub fn is_passive(&self) -> bool {
        self.activity == Activity::Passive
    }

    /// Returns true if this was a passive -> active transition.
    pub fn set_active(&mut self) -> bool {
        let changed = self.activity == Activity::Passive;
        self.activity = Activity::Active;
        changed
    }

    /// Returns true if this was an active -> passive transition.
    pub fn set_passive(&mut self) -> bool {
        let changed = self.activity == Activity::Active;
        self.activity = Activity::Passive;
        changed
    }

    pub fn is_crashed(&self) -> bool {
        self.halted
    }

    /// One-way: a crashed node never comes back.
    pub fn mark_crashed(&mut self) {
        self.halted = true;
    }

    // ==================== Ring geometry ====================

    /// Clockwise hops from this node to `other`.
    pub fn distance(&self, other: NodeId) -> usize {
        self.id.distance_to(other, self.ring_size)
    }

    /// Whichever of `a` and `b` lies further from this node.
    ///
    /// Distinct ids never tie; on equal ids `a` is returned.
    pub fn furthest(&self, a: NodeId, b: NodeId) -> NodeId {
        if self.distance(b) > self.distance(a) { b } else { a }
    }

    pub fn successor(&self) -> NodeId {
        self.successor
    }

    pub fn set_successor(&mut self, successor: NodeId) {
        self.successor = successor;
    }

    pub fn black(&self) -> NodeId {
        self.black
    }

    pub fn set_black(&mut self, black: NodeId) {
        self.black = black;
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn advance_sequence(&mut self) {
        self.sequence += 1;
    }

    // ==================== Message counters ====================

    pub fn count(&self, peer: NodeId) -> i64 {
        self.counts.get(peer.index()).copied().unwrap_or(0)
    }

    pub fn increment_count(&mut self, peer: NodeId, delta: i64) {
        if let Some(slot) = self.counts.get_mut(peer.index()) {
            *slot += delta;
        }
    }

    /// Account for an application message sent to `to`.
    ///
    /// Ignored once `to` is known crashed or this node has crashed.
    pub fn record_send(&mut self, to: NodeId) -> bool {
        if self.halted || self.crashed.contains(&to) || to.index() >= self.ring_size {
            return false;
        }
        self.increment_count(to, 1);
        true
    }

    /// Account for an application message received from `from`.
    ///
    /// The node becomes active and has to be revisited by a token that has
    /// passed `from`, so `from` may become the furthest black node.
    /// Messages from known-crashed senders are discarded.
    pub fn record_receive(&mut self, from: NodeId) -> bool {
        if self.halted || self.crashed.contains(&from) || from.index() >= self.ring_size {
            return false;
        }
        self.increment_count(from, -1);
        self.activity = Activity::Active;
        self.black = self.furthest(self.black, from);
        true
    }

    /// Ids not in CRASHED.
    pub fn alive_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        NodeId::all(self.ring_size).filter(|id| !self.crashed.contains(id))
    }

    /// Sum of this node's counters over ids not in CRASHED.
    pub fn alive_count_sum(&self) -> i64 {
        self.alive_ids().map(|id| self.count(id)).sum()
    }

    // ==================== Crash bookkeeping ====================

    pub fn crashed(&self) -> &BTreeSet<NodeId> {
        &self.crashed
    }

    pub fn report(&self) -> &BTreeSet<NodeId> {
        &self.report
    }

    /// In CRASHED or REPORT.
    pub fn knows_crashed(&self, id: NodeId) -> bool {
        self.crashed.contains(&id) || self.report.contains(&id)
    }

    /// Record a locally observed crash in REPORT.
    ///
    /// Returns false if the crash was already known or names this node.
    pub fn observe_crash(&mut self, id: NodeId) -> bool {
        if id == self.id || id.index() >= self.ring_size || self.knows_crashed(id) {
            return false;
        }
        self.report.insert(id);
        true
    }

    /// Remove ids from REPORT.
    pub fn drop_reported<'a>(&mut self, ids: impl IntoIterator<Item = &'a NodeId>) {
        for id in ids {
            self.report.remove(id);
        }
    }

    /// Union ids into CRASHED, keeping REPORT disjoint.
    pub fn merge_crashed(&mut self, ids: impl IntoIterator<Item = NodeId>) {
        for id in ids {
            if id == self.id {
                continue;
            }
            self.report.remove(&id);
            self.crashed.insert(id);
        }
    }

    /// Move every REPORT entry into CRASHED, returning what was moved.
    pub fn take_report(&mut self) -> BTreeSet<NodeId> {
        let report = std::mem::take(&mut self.report);
        self.crashed.extend(report.iter().copied());
        report
    }
}

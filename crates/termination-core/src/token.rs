//! The probe token circulated around the ring.
//!
//! Wire format (JSON):
//! `{"type":"probe","sequence":3,"black":2,"sender":1,"counts":[0,1,-1],"crashed":[4],"report":[]}`
//!
//! The same struct is also sent as bincode; see [`crate::wire`] for how a
//! receiver tells the two apart.

use crate::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

const PROBE_TYPE: &str = "probe";

#[derive(Debug, Error)]
pub enum WireError {
    #[error("Empty message")]
    Empty,

    #[error("Invalid JSON token: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid binary token: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("Unexpected message type: {0}")]
    WrongType(String),
}

/// Probe message carrying sequence, color, counts and crash knowledge.
///
/// Colors are not stored per node. `black` is the furthest node known to be
/// black; every node from the holder up to it is black, the rest are white.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    #[serde(rename = "type")]
    msg_type: String,
    /// Number of times the token has wrapped past the ring origin
    sequence: u64,
    /// Furthest node known to be black
    black: NodeId,
    /// Last node that forwarded the token
    sender: NodeId,
    /// Per-node message balance, indexed by node id
    counts: Vec<i64>,
    /// Crashed nodes the next holder may not know about yet
    crashed: BTreeSet<NodeId>,
    /// Crashes newly reported by the sender on this hop
    #[serde(default)]
    report: BTreeSet<NodeId>,
}

impl Token {
    /// Create a fresh token at `origin` with sequence 0.
    pub fn new(origin: NodeId, ring_size: usize) -> Self {
        Self {
            msg_type: PROBE_TYPE.to_string(),
            sequence: 0,
            black: origin,
            sender: origin,
            counts: vec![0; ring_size],
            crashed: BTreeSet::new(),
            report: BTreeSet::new(),
        }
    }

    /// The token that starts a run.
    ///
    /// Sequence 1, delivered by the origin to itself. The color points at the
    /// origin's predecessor so the first termination check only happens after
    /// the token has visited every node once.
    pub fn bootstrap(origin: NodeId, ring_size: usize) -> Self {
        let mut token = Self::new(origin, ring_size);
        token.advance_sequence();
        token.black = origin.prev(ring_size);
        token
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn advance_sequence(&mut self) {
        self.sequence += 1;
    }

    pub fn ring_size(&self) -> usize {
        self.counts.len()
    }

    pub fn black(&self) -> NodeId {
        self.black
    }

    pub fn set_black(&mut self, black: NodeId) {
        self.black = black;
    }

    pub fn sender(&self) -> NodeId {
        self.sender
    }

    pub fn set_sender(&mut self, sender: NodeId) {
        self.sender = sender;
    }

    /// Count recorded for `id`, zero for ids outside the ring.
    pub fn count(&self, id: NodeId) -> i64 {
        self.counts.get(id.index()).copied().unwrap_or(0)
    }

    pub fn set_count(&mut self, id: NodeId, value: i64) {
        if let Some(slot) = self.counts.get_mut(id.index()) {
            *slot = value;
        }
    }

    pub fn increment_count(&mut self, id: NodeId, delta: i64) {
        if let Some(slot) = self.counts.get_mut(id.index()) {
            *slot += delta;
        }
    }

    pub fn crashed(&self) -> &BTreeSet<NodeId> {
        &self.crashed
    }

    pub fn union_crashed(&mut self, ids: impl IntoIterator<Item = NodeId>) {
        self.crashed.extend(ids);
    }

    /// Drop crash ids the receiver already knows about.
    pub fn remove_crashed(&mut self, known: &BTreeSet<NodeId>) {
        self.crashed.retain(|id| !known.contains(id));
    }

    pub fn report(&self) -> &BTreeSet<NodeId> {
        &self.report
    }

    pub fn set_report(&mut self, report: BTreeSet<NodeId>) {
        self.report = report;
    }

    pub fn clear_report(&mut self) {
        self.report.clear();
    }

    /// Independent copy for recovery and metrics.
    ///
    /// Shares no mutable structure with `self`; later changes to the live
    /// token never show up in the snapshot.
    pub fn snapshot(&self) -> Token {
        self.clone()
    }

    /// Size of the binary encoding in bytes.
    pub fn encoded_len(&self) -> u64 {
        bincode::serialized_size(self).unwrap_or(0)
    }

    /// Serialize to JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>, WireError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse from JSON bytes, rejecting anything whose `type` isn't `"probe"`.
    pub fn from_json(data: &[u8]) -> Result<Self, WireError> {
        let token: Self = serde_json::from_slice(data)?;
        token.checked()
    }

    /// Serialize to bincode bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        Ok(bincode::serialize(self)?)
    }

    /// Parse from bincode bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, WireError> {
        let token: Self = bincode::deserialize(data)?;
        token.checked()
    }

    fn checked(self) -> Result<Self, WireError> {
        if self.msg_type == PROBE_TYPE {
            Ok(self)
        } else {
            Err(WireError::WrongType(self.msg_type))
        }
    }
}

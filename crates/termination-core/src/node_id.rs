//! NodeId: position of a node on the logical ring.
//!
//! Ids are dense (`0..N`), so they double as indices into per-node vectors.
//! All ordering questions on the ring go through [`NodeId::distance_to`];
//! plain integer comparison is only used to spot a lap boundary.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeIdError {
    #[error("Invalid node ID: {0}")]
    InvalidFormat(#[from] std::num::ParseIntError),
}

/// Identifier of a node on the ring.
///
/// # Examples
/// ```
/// use termination_core::NodeId;
///
/// let a = NodeId::new(3);
/// let b: NodeId = "1".parse().unwrap();
/// // Travelling clockwise from 3 to 1 on a ring of 4 takes two hops.
/// assert_eq!(a.distance_to(b, 4), 2);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(u32);

impl NodeId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Index into per-node vectors.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Clockwise hops from `self` to `other` on a ring of `ring_size` nodes.
    pub fn distance_to(self, other: NodeId, ring_size: usize) -> usize {
        (other.index() + ring_size - self.index()) % ring_size
    }

    /// The next id clockwise.
    pub fn next(self, ring_size: usize) -> NodeId {
        NodeId::from((self.index() + 1) % ring_size)
    }

    /// The previous id clockwise.
    pub fn prev(self, ring_size: usize) -> NodeId {
        NodeId::from((self.index() + ring_size - 1) % ring_size)
    }

    /// Every id on a ring of `ring_size` nodes, in ring order.
    pub fn all(ring_size: usize) -> impl Iterator<Item = NodeId> {
        (0..ring_size).map(NodeId::from)
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = NodeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

impl From<u32> for NodeId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

// Ring sizes are validated against u32 in RingConfig, so truncation cannot occur.
impl From<usize> for NodeId {
    fn from(index: usize) -> Self {
        Self(index as u32)
    }
}

impl From<NodeId> for usize {
    fn from(id: NodeId) -> usize {
        id.index()
    }
}

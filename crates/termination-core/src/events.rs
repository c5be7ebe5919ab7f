//! Probe events for metrics and monitoring.
//!
//! Provides `ProbeEvent` and an `EventBus` for subscriptions. Events are
//! observational only; nothing a subscriber does can affect the protocol.

use crate::NodeId;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Events emitted by nodes while the protocol runs.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProbeEvent {
    /// A node finished processing a token.
    TokenHandled {
        node: NodeId,
        /// Sequence of the token as it left the node.
        sequence: u64,
        /// Time spent handling, excluding the wait for passivity.
        #[serde(rename = "elapsedNs")]
        elapsed_ns: u64,
        /// Bincode size of the token snapshot.
        #[serde(rename = "sizeBytes")]
        size_bytes: u64,
    },
    /// A node refused a token.
    TokenDropped {
        node: NodeId,
        /// Human-readable drop reason.
        reason: String,
    },
    /// A node was told about a crash.
    CrashObserved { node: NodeId, crashed: NodeId },
    /// A node routed around a crashed successor.
    SuccessorRepaired { node: NodeId, successor: NodeId },
    /// A node resent a token that may have been lost.
    TokenRetransmitted { node: NodeId, to: NodeId },
    /// Termination was announced for a run.
    Terminated {
        node: NodeId,
        run: String,
        /// Time since the ring last went quiescent, if it ever did.
        #[serde(rename = "sinceQuiescentMs")]
        since_quiescent_ms: Option<u64>,
        /// Nodes still active at the moment of the announcement.
        #[serde(rename = "activeNodes")]
        active_nodes: usize,
    },
}

/// Subscription handle that unsubscribes automatically when dropped.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

type Callback = Arc<dyn Fn(&ProbeEvent) + Send + Sync>;

/// Event bus for publishing probe events to subscribers.
///
/// Wrap in `Arc` to enable subscriptions.
#[derive(Default)]
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(&ProbeEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // try_write: Drop may run during unwinding while emit holds a read lock.
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: ProbeEvent) {
        // Clone the list so a callback may subscribe without deadlocking.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(&event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.callbacks.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

//! Run context: identity, one-shot announcement and completion signal.
//!
//! Every ring run gets its own context. Orchestrators that start several
//! runs hold one context per run and await each with
//! [`RunContext::wait_terminated`].

use crate::events::{EventBus, ProbeEvent};
use crate::NodeId;
use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

/// Unique identifier of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunId(Uuid);

impl RunId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for RunId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receives the termination announcement, exactly once per run.
pub trait Announcer: Send + Sync {
    fn announce(&self, run: RunId, node: NodeId);
}

/// Announcer that only logs.
pub struct TracingAnnouncer;

impl Announcer for TracingAnnouncer {
    fn announce(&self, run: RunId, node: NodeId) {
        info!(run = %run, node = %node, "Termination announced");
    }
}

pub struct RunContext {
    id: RunId,
    announced: AtomicBool,
    done: watch::Sender<Option<NodeId>>,
    announcer: Arc<dyn Announcer>,
    events: Arc<EventBus>,
}

impl RunContext {
    pub fn new(announcer: Arc<dyn Announcer>) -> Self {
        Self::with_events(announcer, Arc::new(EventBus::new()))
    }

    pub fn with_events(announcer: Arc<dyn Announcer>, events: Arc<EventBus>) -> Self {
        let (done, _) = watch::channel(None);
        Self {
            id: RunId::generate(),
            announced: AtomicBool::new(false),
            done,
            announcer,
            events,
        }
    }

    pub fn id(&self) -> RunId {
        self.id
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Announce termination detected at `node`.
    ///
    /// `active_nodes` is the ring's active count sampled by the caller right
    /// before announcing. Only the first call per run has any effect; later
    /// calls return false.
    pub fn announce(
        &self,
        node: NodeId,
        since_quiescent: Option<Duration>,
        active_nodes: usize,
    ) -> bool {
        if self.announced.swap(true, Ordering::AcqRel) {
            return false;
        }

        let since_quiescent_ms =
            since_quiescent.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        info!(
            run = %self.id,
            node = %node,
            since_quiescent_ms = ?since_quiescent_ms,
            active_nodes,
            "Termination detected"
        );
        if active_nodes > 0 {
            warn!(run = %self.id, active_nodes, "Termination announced while nodes were active");
        }
        self.events.emit(ProbeEvent::Terminated {
            node,
            run: self.id.to_string(),
            since_quiescent_ms,
            active_nodes,
        });
        self.announcer.announce(self.id, node);
        self.done.send_replace(Some(node));
        true
    }

    pub fn is_terminated(&self) -> bool {
        self.announced.load(Ordering::Acquire)
    }

    /// Node that announced, if any.
    pub fn terminated_by(&self) -> Option<NodeId> {
        *self.done.borrow()
    }

    /// Wait until termination is announced; returns the announcing node.
    pub async fn wait_terminated(&self) -> Option<NodeId> {
        let mut rx = self.done.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(node) => *node,
            Err(_) => None,
        }
    }
}

//! Per-run protocol metrics, collected from probe events.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use termination_core::{EventBus, ProbeEvent, Subscription};

#[derive(Debug, Default)]
pub struct Metrics {
    tokens_handled: AtomicU64,
    handling_ns: AtomicU64,
    token_bytes: AtomicU64,
    tokens_dropped: AtomicU64,
    crashes_observed: AtomicU64,
    successor_repairs: AtomicU64,
    retransmits: AtomicU64,
    since_quiescent_ms: Mutex<Option<u64>>,
    active_at_announce: Mutex<Option<usize>>,
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub tokens_handled: u64,
    pub handling_ns: u64,
    pub token_bytes: u64,
    pub tokens_dropped: u64,
    pub crashes_observed: u64,
    pub successor_repairs: u64,
    pub retransmits: u64,
    /// Detection latency: quiescence to announcement
    pub since_quiescent_ms: Option<u64>,
    /// Active nodes when termination was announced
    pub active_at_announce: Option<usize>,
}

impl Metrics {
    /// Subscribe to `events`; metrics are collected until the subscription drops.
    pub fn attach(events: &Arc<EventBus>) -> (Arc<Self>, Subscription) {
        let metrics = Arc::new(Self::default());
        let collector = Arc::clone(&metrics);
        let subscription = events.subscribe(move |event| collector.record(event));
        (metrics, subscription)
    }

    pub fn record(&self, event: &ProbeEvent) {
        match event {
            ProbeEvent::TokenHandled {
                elapsed_ns,
                size_bytes,
                ..
            } => {
                self.tokens_handled.fetch_add(1, Ordering::Relaxed);
                self.handling_ns.fetch_add(*elapsed_ns, Ordering::Relaxed);
                self.token_bytes.fetch_add(*size_bytes, Ordering::Relaxed);
            }
            ProbeEvent::TokenDropped { .. } => {
                self.tokens_dropped.fetch_add(1, Ordering::Relaxed);
            }
            ProbeEvent::CrashObserved { .. } => {
                self.crashes_observed.fetch_add(1, Ordering::Relaxed);
            }
            ProbeEvent::SuccessorRepaired { .. } => {
                self.successor_repairs.fetch_add(1, Ordering::Relaxed);
            }
            ProbeEvent::TokenRetransmitted { .. } => {
                self.retransmits.fetch_add(1, Ordering::Relaxed);
            }
            ProbeEvent::Terminated {
                since_quiescent_ms,
                active_nodes,
                ..
            } => {
                *self
                    .since_quiescent_ms
                    .lock()
                    .unwrap_or_else(|e| e.into_inner()) = *since_quiescent_ms;
                *self
                    .active_at_announce
                    .lock()
                    .unwrap_or_else(|e| e.into_inner()) = Some(*active_nodes);
            }
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tokens_handled: self.tokens_handled.load(Ordering::Relaxed),
            handling_ns: self.handling_ns.load(Ordering::Relaxed),
            token_bytes: self.token_bytes.load(Ordering::Relaxed),
            tokens_dropped: self.tokens_dropped.load(Ordering::Relaxed),
            crashes_observed: self.crashes_observed.load(Ordering::Relaxed),
            successor_repairs: self.successor_repairs.load(Ordering::Relaxed),
            retransmits: self.retransmits.load(Ordering::Relaxed),
            since_quiescent_ms: *self
                .since_quiescent_ms
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
            active_at_announce: *self
                .active_at_announce
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
        }
    }
}

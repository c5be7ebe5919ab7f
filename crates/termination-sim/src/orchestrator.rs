//! Runs rings with a simulated workload and collects their reports.
//!
//! Each run gets its own [`RunContext`], ring, workload and crash injector.
//! [`run_all`] starts every run at once and waits for all of them.

use crate::config::SimConfig;
use crate::metrics::Metrics;
use crate::summary::{RunReport, Summary};
use crate::workload::{spawn_crashes, Workload, WorkloadConfig};
use std::sync::Arc;
use termination_core::{EventBus, NodeHandle, Ring, RingError, RunContext, TracingAnnouncer};
use tokio::time::timeout;
use tracing::{info, warn};
use web_time::Instant;

/// Run one ring until it announces termination or the timeout passes.
pub async fn run_once(config: &SimConfig, index: usize, seed: u64) -> Result<RunReport, RingError> {
    let events = Arc::new(EventBus::new());
    let (metrics, _subscription) = Metrics::attach(&events);
    let run = Arc::new(RunContext::with_events(Arc::new(TracingAnnouncer), events));

    let started = Instant::now();
    let ring = Ring::start(config.ring_config(), Arc::clone(&run))?;
    info!(run = %run.id(), index, seed, "Run started");

    let workload_config = WorkloadConfig {
        max_work: config.max_work(),
        fanout: config.fanout,
        messages: config.messages,
    };
    let workload = Workload::spawn(ring.nodes(), &workload_config, seed);
    let (victims, injector) = spawn_crashes(ring.nodes(), config.crashes, config.max_work(), seed);

    let announced_by = match timeout(config.timeout(), ring.wait_terminated()).await {
        Ok(node) => node,
        Err(_) => {
            warn!(run = %run.id(), index, "Run timed out before termination was detected");
            None
        }
    };
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    let metrics = metrics.snapshot();
    let quiescent_at_announce = announced_by.is_some() && metrics.active_at_announce == Some(0);

    injector.abort();
    // Crashes planned after the announcement never happen.
    let crashed = victims
        .into_iter()
        .filter(|id| ring.node(*id).is_some_and(NodeHandle::is_crashed))
        .collect();
    let messages_sent = workload.messages_sent();
    let messages_received = workload.messages_received();
    workload.shutdown().await;
    ring.shutdown().await;

    Ok(RunReport {
        index,
        run_id: run.id().to_string(),
        nodes: config.nodes,
        seed,
        crashed,
        announced_by,
        quiescent_at_announce,
        elapsed_ms,
        messages_sent,
        messages_received,
        metrics,
    })
}

/// Start `config.runs` independent runs concurrently and wait for all.
pub async fn run_all(config: &SimConfig, base_seed: u64) -> Result<Summary, RingError> {
    let runs = (0..config.runs).map(|index| run_once(config, index, config.run_seed(base_seed, index)));
    let reports = futures::future::join_all(runs)
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Summary::new(reports))
}

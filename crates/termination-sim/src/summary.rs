//! Run reports and their rendering.

use crate::metrics::MetricsSnapshot;
use serde::Serialize;
use std::fmt::Write;
use termination_core::NodeId;

/// Outcome of one simulated run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub index: usize,
    pub run_id: String,
    pub nodes: usize,
    pub seed: u64,
    /// Nodes the injector crashed before the run ended
    pub crashed: Vec<NodeId>,
    /// Node that announced, or `None` if the run timed out
    pub announced_by: Option<NodeId>,
    /// No node was active at the moment of the announcement
    pub quiescent_at_announce: bool,
    pub elapsed_ms: u64,
    pub messages_sent: usize,
    pub messages_received: usize,
    pub metrics: MetricsSnapshot,
}

impl RunReport {
    pub fn terminated(&self) -> bool {
        self.announced_by.is_some()
    }

    /// Announced and nothing was still running.
    pub fn is_correct(&self) -> bool {
        self.terminated() && self.quiescent_at_announce
    }
}

/// All runs of one invocation.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub runs: Vec<RunReport>,
}

impl Summary {
    pub fn new(mut runs: Vec<RunReport>) -> Self {
        runs.sort_by_key(|r| r.index);
        Self { runs }
    }

    pub fn terminated(&self) -> usize {
        self.runs.iter().filter(|r| r.terminated()).count()
    }

    /// Runs that timed out or announced while work was still running.
    pub fn failures(&self) -> Vec<&RunReport> {
        self.runs.iter().filter(|r| !r.is_correct()).collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable table, one line per run plus a total.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:>4}  {:>5}  {:>8}  {:>9}  {:>8}  {:>6}  {:>7}  {:>9}  crashed",
            "run", "nodes", "announce", "elapsed", "messages", "tokens", "retrans", "latency"
        );
        for run in &self.runs {
            let announced = run
                .announced_by
                .map(|n| n.to_string())
                .unwrap_or_else(|| "timeout".to_string());
            let latency = run
                .metrics
                .since_quiescent_ms
                .map(|ms| format!("{ms}ms"))
                .unwrap_or_else(|| "-".to_string());
            let crashed = if run.crashed.is_empty() {
                "-".to_string()
            } else {
                run.crashed
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            };
            let _ = writeln!(
                out,
                "{:>4}  {:>5}  {:>8}  {:>7}ms  {:>8}  {:>6}  {:>7}  {:>9}  {}",
                run.index,
                run.nodes,
                announced,
                run.elapsed_ms,
                run.messages_sent,
                run.metrics.tokens_handled,
                run.metrics.retransmits,
                latency,
                crashed
            );
        }
        let _ = write!(
            out,
            "{}/{} runs terminated, {} failed",
            self.terminated(),
            self.runs.len(),
            self.failures().len()
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(index: usize, announced_by: Option<u32>) -> RunReport {
        RunReport {
            index,
            run_id: format!("run-{index}"),
            nodes: 4,
            seed: 1,
            crashed: vec![NodeId::new(2)],
            announced_by: announced_by.map(NodeId::new),
            quiescent_at_announce: announced_by.is_some(),
            elapsed_ms: 35,
            messages_sent: 10,
            messages_received: 10,
            metrics: MetricsSnapshot {
                tokens_handled: 9,
                since_quiescent_ms: Some(4),
                ..MetricsSnapshot::default()
            },
        }
    }

    #[test]
    fn test_runs_sorted_by_index() {
        let summary = Summary::new(vec![report(2, Some(1)), report(0, Some(3)), report(1, None)]);
        let indexes: Vec<_> = summary.runs.iter().map(|r| r.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
    }

    #[test]
    fn test_counts_failures() {
        let mut unsafe_run = report(2, Some(0));
        unsafe_run.quiescent_at_announce = false;
        let summary = Summary::new(vec![report(0, Some(3)), report(1, None), unsafe_run]);

        assert_eq!(summary.terminated(), 2);
        let failed: Vec<_> = summary.failures().iter().map(|r| r.index).collect();
        assert_eq!(failed, vec![1, 2]);
    }

    #[test]
    fn test_render() {
        let summary = Summary::new(vec![report(0, Some(3)), report(1, None)]);
        let text = summary.render();
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[1].contains("35ms"));
        assert!(lines[1].contains("4ms"));
        assert!(lines[1].trim_end().ends_with('2'));
        assert!(lines[2].contains("timeout"));
        assert_eq!(lines[3], "1/2 runs terminated, 1 failed");
    }

    #[test]
    fn test_json_uses_camel_case() {
        let json = Summary::new(vec![report(0, Some(3))]).to_json().unwrap();
        assert!(json.contains("\"announcedBy\": 3"));
        assert!(json.contains("\"quiescentAtAnnounce\": true"));
        assert!(json.contains("\"tokensHandled\": 9"));
    }
}

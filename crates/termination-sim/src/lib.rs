//! termination-sim library: exposes the simulator's parts for testing.
//!
//! The binary drives a ring from termination-core with a simulated
//! distributed application, injects crashes and reports how detection went.

pub mod config;
pub mod metrics;
pub mod orchestrator;
pub mod summary;
pub mod workload;

// Re-export key types for convenience
pub use config::{SimConfig, SimConfigError};
pub use metrics::{Metrics, MetricsSnapshot};
pub use orchestrator::{run_all, run_once};
pub use summary::{RunReport, Summary};
pub use workload::{spawn_crashes, Workload, WorkloadConfig};

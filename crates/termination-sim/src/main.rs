//! termination-sim: Runs fault-tolerant termination detection on simulated rings.
//!
//! Starts one or more independent runs concurrently, each with its own
//! workload and crash schedule, and prints how detection went.

use anyhow::{Result, bail};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use termination_sim::{SimConfig, run_all};

#[derive(Parser, Debug)]
#[command(name = "termination-sim")]
#[command(about = "Simulate fault-tolerant termination detection on a ring")]
struct Args {
    /// Number of nodes in each ring
    #[arg(short, long, default_value_t = 4)]
    nodes: usize,

    /// Independent runs to start concurrently
    #[arg(short, long, default_value_t = 1)]
    runs: usize,

    /// Nodes to crash in each run
    #[arg(short, long, default_value_t = 0)]
    crashes: usize,

    /// Longest single burst of simulated work, in milliseconds
    #[arg(long, default_value_t = 20)]
    max_work_ms: u64,

    /// Most messages a node sends after one burst of work
    #[arg(long, default_value_t = 2)]
    fanout: usize,

    /// Application messages per run before the workload dries up
    #[arg(short, long, default_value_t = 100)]
    messages: usize,

    /// Delay between a crash and survivors noticing it, in milliseconds
    #[arg(long, default_value_t = 0)]
    detection_delay_ms: u64,

    /// Workload seed (random if not provided)
    #[arg(long)]
    seed: Option<u64>,

    /// Give up on a run after this many seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

impl From<&Args> for SimConfig {
    fn from(args: &Args) -> Self {
        Self {
            nodes: args.nodes,
            runs: args.runs,
            crashes: args.crashes,
            max_work_ms: args.max_work_ms,
            fanout: args.fanout,
            messages: args.messages,
            detection_delay_ms: args.detection_delay_ms,
            seed: args.seed,
            timeout_ms: args.timeout_secs.saturating_mul(1000),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,termination_core=debug,termination_sim=debug"
    } else {
        "info,termination_core=warn,termination_sim=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = SimConfig::from(&args);
    config.validate()?;

    let seed = config.seed.unwrap_or_else(rand::random);
    info!("Starting termination-sim");
    info!(
        "{} run(s) of {} nodes, {} crash(es) each, seed {}",
        config.runs, config.nodes, config.crashes, seed
    );

    let summary = run_all(&config, seed).await?;

    if args.json {
        println!("{}", summary.to_json()?);
    } else {
        println!("{}", summary.render());
    }

    let failures = summary.failures();
    if !failures.is_empty() {
        for run in &failures {
            error!("Run {} ({}) did not terminate correctly", run.index, run.run_id);
        }
        bail!("{} of {} runs failed", failures.len(), summary.runs.len());
    }

    Ok(())
}

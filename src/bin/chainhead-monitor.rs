//! chainhead-monitor CLI tool
//!
//! Watches two head feeds of the same chain and reports whether they agree.

use anyhow::{Context, Result};
use chainhead_monitor::simulator::{ChainSimulator, ReorgPolicy};
use chainhead_monitor::{
    feed_from_url, ChainHeadMonitor, HeadFeed, Mode, MonitorConfig, MonitorReport, ScriptedFeed,
};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Default window for live endpoints
const WATCH_WINDOW_SECS: u64 = 300;
/// Default window for simulated feeds, which deliver everything up front
const SIMULATE_WINDOW_SECS: u64 = 2;

#[derive(Parser)]
#[command(name = "chainhead-monitor")]
#[command(about = "Cross-checks two chain-head subscription feeds around reorgs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RunArgs {
    /// Observation window in seconds [default: 300 for watch, 2 for simulate]
    #[arg(long, env = "MONITOR_WINDOW_SECS")]
    window_secs: Option<u64>,
    /// Minimum blocks each feed must deliver
    #[arg(long, env = "MONITOR_MIN_BLOCKS", default_value = "10")]
    min_blocks: usize,
    /// How chain switches are judged
    #[arg(long, env = "MONITOR_MODE", value_enum, default_value = "compliance")]
    mode: Mode,
    /// Extra time allowed on top of the window before the run counts as hung
    #[arg(long, env = "MONITOR_TIMEOUT_BUFFER_SECS", default_value = "60")]
    timeout_buffer_secs: u64,
    /// Fail when a block is delivered by only one feed
    #[arg(long)]
    fail_on_cross_feed_delta: bool,
    /// Write the full JSON report here
    #[arg(long)]
    report_out: Option<PathBuf>,
}

impl RunArgs {
    fn config(&self, default_window_secs: u64) -> MonitorConfig {
        MonitorConfig::from_millis(
            self.window_secs.unwrap_or(default_window_secs).saturating_mul(1_000),
            self.min_blocks,
            self.mode,
        )
        .with_timeout_buffer(Duration::from_secs(self.timeout_buffer_secs))
        .with_cross_feed_failure(self.fail_on_cross_feed_delta)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Watch two live endpoints (ws:// subscribes, http:// polls)
    Watch {
        /// Endpoint of feed A
        #[arg(long, env = "MONITOR_FEED_A")]
        feed_a: String,
        /// Endpoint of feed B
        #[arg(long, env = "MONITOR_FEED_B")]
        feed_b: String,
        /// Poll interval for http(s) endpoints, in milliseconds
        #[arg(long, env = "MONITOR_POLL_MS", default_value = "1000")]
        poll_ms: u64,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Run the monitor over a generated chain
    Simulate {
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Chain progress steps to generate
        #[arg(long, default_value = "50")]
        blocks: usize,
        /// Average blocks between reorgs (0 disables reorgs)
        #[arg(long, default_value = "10")]
        reorg_every: u64,
        /// Deepest reorg; above 1 even a re-emitting feed drops height, which
        /// is reported as a gap
        #[arg(long, default_value = "1")]
        max_depth: u64,
        /// How feed A announces reorgs; feed B always re-emits
        #[arg(long, value_enum, default_value = "re-emit")]
        policy: ReorgPolicy,
        /// Delay between simulated deliveries, in milliseconds
        #[arg(long, default_value = "5")]
        interval_ms: u64,
        #[command(flatten)]
        run: RunArgs,
    },
}

async fn run_monitor(
    run: &RunArgs,
    default_window_secs: u64,
    feed_a: Arc<dyn HeadFeed>,
    feed_b: Arc<dyn HeadFeed>,
) -> Result<MonitorReport> {
    let names = format!("{} and {}", feed_a.name(), feed_b.name());
    let monitor = ChainHeadMonitor::new(run.config(default_window_secs), feed_a, feed_b)
        .context("Invalid monitor configuration")?;

    let config = monitor.config();
    info!(
        "Watching {} for {:?} (mode {}, at least {} blocks each)",
        names, config.window, config.mode, config.min_blocks_expected
    );

    let cancel = monitor.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, closing the window early");
            cancel.cancel();
        }
    });

    let report = monitor.run().await.context("Monitor run failed")?;

    if let Some(path) = &run.report_out {
        let json = report.to_json().context("Failed to serialize report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
        info!("Report written to {}", path.display());
    }
    Ok(report)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Optional .env before clap so env fallbacks see it
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let report = match cli.command {
        Commands::Watch {
            feed_a,
            feed_b,
            poll_ms,
            run,
        } => {
            let poll = Duration::from_millis(poll_ms);
            let a = feed_from_url("A", &feed_a, poll).context("Feed A")?;
            let b = feed_from_url("B", &feed_b, poll).context("Feed B")?;
            run_monitor(&run, WATCH_WINDOW_SECS, a, b).await?
        }
        Commands::Simulate {
            seed,
            blocks,
            reorg_every,
            max_depth,
            policy,
            interval_ms,
            run,
        } => {
            let chain = ChainSimulator::new(seed)
                .with_reorgs(reorg_every, max_depth)
                .generate(blocks);
            info!(
                "Simulated {} steps with {} reorgs (feed A policy {:?})",
                blocks,
                chain.reorg_count(),
                policy
            );
            let interval = Duration::from_millis(interval_ms);
            let a = ScriptedFeed::new("A", chain.deliveries(policy)).with_interval(interval);
            let b = ScriptedFeed::new("B", chain.deliveries(ReorgPolicy::ReEmit))
                .with_interval(interval);
            run_monitor(&run, SIMULATE_WINDOW_SECS, Arc::new(a), Arc::new(b)).await?
        }
    };

    println!("{}", report.render());

    if !report.passed {
        let failed: Vec<String> = report
            .failures()
            .map(|o| format!("{:?}: {}", o.invariant, o.detail))
            .collect();
        anyhow::bail!("{} assertion(s) failed:\n{}", failed.len(), failed.join("\n"));
    }
    Ok(())
}

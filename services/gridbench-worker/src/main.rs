//! The worker process.
//!
//! One instance runs per assignment. It is started on its node by the
//! orchestrator, registers back over the control channel, executes
//! dispatched items and exits when the controller declares the run over.

mod items;

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use gridbench_control::AgentOptions;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "gridbench-worker", about = "Benchmark worker process")]
struct Args {
    /// `host:port` of the orchestrator's controller endpoint.
    #[arg(long)]
    controller: String,

    /// This worker's id from its assignment.
    #[arg(long)]
    worker_id: u32,

    /// This worker's role.
    #[arg(long)]
    role: String,

    /// Directory probe files and the worker log are written into.
    #[arg(long)]
    output_dir: PathBuf,

    /// Seconds between liveness polls of the controller.
    #[arg(long, default_value_t = 1)]
    ping_interval_secs: u64,
}

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let log_path = args.output_dir.join(format!("worker-{}.log", args.worker_id));
    let log_file = File::create(&log_path)
        .with_context(|| format!("cannot create log file {}", log_path.display()))?;
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(log_file)),
        )
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    std::fs::create_dir_all(&args.output_dir).with_context(|| {
        format!("cannot create output directory {}", args.output_dir.display())
    })?;
    init_logging(&args)?;
    info!(worker_id = args.worker_id, role = %args.role, "worker starting");

    let options = AgentOptions {
        controller: args.controller,
        worker_id: args.worker_id,
        role: args.role,
        output_dir: args.output_dir,
        ping_interval: Duration::from_secs(args.ping_interval_secs),
    };
    gridbench_control::run_agent(options, items::registry())
        .await
        .context("agent terminated abnormally")?;
    Ok(())
}

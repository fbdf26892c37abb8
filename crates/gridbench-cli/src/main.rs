//! The `gridbench` command line: runs benchmark plans and analyzes
//! harvested result trees.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use gridbench_analysis::{write_comparison, write_values, RunAnalyzer, Thresholds};
use gridbench_core::{BenchmarkPlan, HarnessSettings};
use gridbench_infra::{Infrastructure, LocalInfrastructure, SshInfrastructure};
use gridbench_runner::BenchmarkHarness;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "gridbench", version, about = "Distributed data-grid benchmark harness")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a benchmark plan and harvest its results.
    Run(RunArgs),
    /// Analyze a harvested result tree, optionally against a baseline.
    Analyze(AnalyzeArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Path to the benchmark plan descriptor (JSON).
    plan: PathBuf,

    /// Directory the result tree is written into.
    #[arg(long, default_value = "results")]
    results: PathBuf,

    /// Remote hosts to run on, comma separated. Without hosts the run uses
    /// local scratch-directory nodes.
    #[arg(long, env = "GRIDBENCH_HOSTS", value_delimiter = ',')]
    hosts: Vec<String>,

    /// SSH user for remote hosts.
    #[arg(long, env = "GRIDBENCH_SSH_USER", default_value = "root")]
    ssh_user: String,

    /// Extra files distributed to every node's lib directory alongside the
    /// worker binary.
    #[arg(long = "artifact")]
    artifacts: Vec<PathBuf>,
}

#[derive(Debug, Args)]
struct AnalyzeArgs {
    /// Result tree of the run under test.
    test_dir: PathBuf,

    /// Baseline result tree. Without one, the test tree's aggregated
    /// values are printed instead of a comparison.
    #[arg(long)]
    baseline: Option<PathBuf>,

    /// Relative-change threshold for regressions and improvements,
    /// overriding the configured value.
    #[arg(long)]
    threshold: Option<f64>,

    /// Emit only the final verdict line, for CI pipelines.
    #[arg(long)]
    ci: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Run(args) => run(args).await,
        Command::Analyze(args) => analyze(&args),
    };
    match outcome {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: RunArgs) -> anyhow::Result<ExitCode> {
    let settings = HarnessSettings::load().context("loading harness settings")?;
    let plan = load_plan(&args.plan)?;

    let infra: Arc<dyn Infrastructure> = if args.hosts.is_empty() {
        info!(nodes = plan.total_workers(), "no hosts configured, using local nodes");
        Arc::new(LocalInfrastructure::create(plan.total_workers())?)
    } else {
        Arc::new(SshInfrastructure::new(args.hosts, args.ssh_user))
    };

    let mut artifacts = vec![bundled_worker_binary()?];
    artifacts.extend(args.artifacts);

    let harness = BenchmarkHarness::new(Arc::clone(&infra), settings);
    let result = harness.run(&plan, &artifacts, &args.results).await;
    if let Err(err) = infra.delete().await {
        error!(error = %err, "infrastructure teardown failed");
    }

    let summary = result?;
    info!(
        benchmark = %summary.benchmark,
        iterations = summary.iterations,
        failures = summary.failures,
        "run succeeded"
    );
    Ok(ExitCode::SUCCESS)
}

fn analyze(args: &AnalyzeArgs) -> anyhow::Result<ExitCode> {
    let settings = HarnessSettings::load().context("loading harness settings")?;
    let thresholds = Thresholds {
        regression: args.threshold.unwrap_or(settings.analysis.regression_threshold),
        improvement: args.threshold.unwrap_or(settings.analysis.improvement_threshold),
    };
    let mut analyzer = RunAnalyzer::new();
    let mut stdout = std::io::stdout().lock();

    let Some(baseline) = &args.baseline else {
        let results = analyzer.analyze_tree(&args.test_dir)?;
        write_values(&results, &mut stdout)?;
        return Ok(ExitCode::SUCCESS);
    };

    let report = analyzer.compare_trees(baseline, &args.test_dir, thresholds)?;
    if args.ci {
        let verdict = if report.has_regression() {
            "FAILED"
        } else if report.new_baseline_candidate() {
            "PASSED (new baseline candidate)"
        } else {
            "PASSED"
        };
        println!("{verdict}");
    } else {
        write_comparison(&report, &mut stdout)?;
    }

    if report.has_regression() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn load_plan(path: &PathBuf) -> anyhow::Result<BenchmarkPlan> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("cannot open plan {}", path.display()))?;
    let plan: BenchmarkPlan =
        serde_json::from_reader(file).with_context(|| format!("malformed plan {}", path.display()))?;
    plan.validate()?;
    Ok(plan)
}

/// The worker binary shipped next to this executable.
fn bundled_worker_binary() -> anyhow::Result<PathBuf> {
    let exe = std::env::current_exe().context("resolving own executable path")?;
    let dir = exe
        .parent()
        .context("executable has no parent directory")?;
    let worker = dir.join("gridbench-worker");
    anyhow::ensure!(
        worker.exists(),
        "worker binary not found at {} (build the gridbench-worker package)",
        worker.display()
    );
    Ok(worker)
}

//! Full-stack run against local infrastructure: real worker processes,
//! real control channel, real harvested results.

use std::path::PathBuf;
use std::sync::Arc;

use gridbench_core::{BenchmarkPlan, HarnessError, HarnessSettings, ItemSpec, Phase};
use gridbench_infra::{Infrastructure, LocalInfrastructure};
use gridbench_probes::{LATENCY_FILE, THROUGHPUT_FILE};
use gridbench_runner::BenchmarkHarness;

fn worker_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_gridbench-worker"))
}

fn settings() -> HarnessSettings {
    let mut settings = HarnessSettings::default();
    // Ephemeral port so concurrent tests never collide.
    settings.controller.port = 0;
    settings.controller.startup_timeout_secs = 60;
    settings
}

#[tokio::test]
async fn measured_run_produces_probe_files_for_every_client() {
    let infra = Arc::new(LocalInfrastructure::create(2).unwrap());
    let results = tempfile::tempdir().unwrap();

    let mut plan = BenchmarkPlan::new("sleep-smoke");
    plan.role("client", 2)
        .before(ItemSpec::new("touch"), &["client"])
        .workload(
            ItemSpec::with_params("sleep", serde_json::json!({"millis": 1})),
            &["client"],
        )
        .after(ItemSpec::new("noop"), &["client"])
        .duration_seconds(2);

    let harness = BenchmarkHarness::new(Arc::clone(&infra) as Arc<dyn Infrastructure>, settings());
    let summary = harness
        .run(&plan, &[worker_binary()], results.path())
        .await
        .unwrap();

    assert_eq!(summary.benchmark, "sleep-smoke");
    assert!(summary.iterations > 0);
    assert_eq!(summary.failures, 0);
    assert_eq!(summary.after_failures, 0);

    let run_dir = results.path().join("sleep-smoke");
    for worker in ["client-0", "client-1"] {
        assert!(run_dir.join(worker).join(THROUGHPUT_FILE).exists());
        assert!(run_dir.join(worker).join(LATENCY_FILE).exists());
    }
    // The before step ran on both workers and the logs were harvested.
    assert!(run_dir.join("client-0/touch-0").exists());
    assert!(run_dir.join("client-1/touch-1").exists());
    assert!(run_dir.join("client-0/worker-0.log").exists());

    infra.delete().await.unwrap();
}

#[tokio::test]
async fn failing_setup_aborts_the_run_but_results_are_still_harvested() {
    let infra = Arc::new(LocalInfrastructure::create(1).unwrap());
    let results = tempfile::tempdir().unwrap();

    let mut plan = BenchmarkPlan::new("broken-setup");
    plan.role("client", 1)
        .before(
            ItemSpec::with_params("fail", serde_json::json!({"message": "no cluster"})),
            &["client"],
        )
        .workload(ItemSpec::new("noop"), &["client"])
        .duration_seconds(1);

    let harness = BenchmarkHarness::new(Arc::clone(&infra) as Arc<dyn Infrastructure>, settings());
    let err = harness
        .run(&plan, &[worker_binary()], results.path())
        .await
        .unwrap_err();

    match err {
        HarnessError::ItemFailed { phase, message, .. } => {
            assert_eq!(phase, Phase::Before);
            assert_eq!(message, "no cluster");
        }
        other => panic!("expected ItemFailed, got {other}"),
    }
    // The worker came up, so its log exists even though the run failed.
    assert!(results
        .path()
        .join("broken-setup/client-0/worker-0.log")
        .exists());

    infra.delete().await.unwrap();
}

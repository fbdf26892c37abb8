//! End-to-end benchmark execution.
//!
//! Ties the pieces together for one run: topology mapping, artifact
//! distribution, controller startup, worker launch, phase execution,
//! worker shutdown and result harvesting. The controller is closed and the
//! worker processes are awaited before results are harvested, whatever the
//! outcome of the phases.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use gridbench_control::{Controller, WorkerLauncher};
use gridbench_core::{
    map_roles_to_nodes, BenchmarkPlan, HarnessResult, HarnessSettings, SharedContext,
};
use gridbench_infra::Infrastructure;
use tracing::{info, warn};

use crate::artifacts::ArtifactDistributor;
use crate::harvest::{ensure_result_dir_free, ResultHarvester};
use crate::runner::{RunSummary, TestRunner};

/// One benchmark harness over a provisioned infrastructure.
pub struct BenchmarkHarness {
    infra: Arc<dyn Infrastructure>,
    settings: HarnessSettings,
}

impl BenchmarkHarness {
    /// Creates a harness.
    #[must_use]
    pub fn new(infra: Arc<dyn Infrastructure>, settings: HarnessSettings) -> Self {
        Self { infra, settings }
    }

    /// Runs one benchmark: distributes `artifact_files` to the nodes,
    /// starts one worker per assignment, executes the plan's phases and
    /// harvests each worker's output into `<results_root>/<plan name>/`.
    ///
    /// Harvesting happens even when a phase failed, so partial results of a
    /// broken run stay available for diagnosis.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error of the run: an unsatisfiable topology,
    /// a failed artifact copy, a registration timeout, or a before/workload
    /// failure.
    pub async fn run(
        &self,
        plan: &BenchmarkPlan,
        artifact_files: &[PathBuf],
        results_root: &Path,
    ) -> HarnessResult<RunSummary> {
        plan.validate()?;
        ensure_result_dir_free(results_root, &plan.name)?;
        let assignments = map_roles_to_nodes(&plan.roles, self.infra.nodes(), &plan.launch_args)?;

        ArtifactDistributor::new(Arc::clone(&self.infra), self.settings.remote.lib_dir.clone())
            .distribute(artifact_files)
            .await?;

        let bind = SocketAddr::from(([0, 0, 0, 0], self.settings.controller.port));
        let expected: Vec<u32> = assignments.iter().map(|a| a.worker_id).collect();
        let controller = Arc::new(Controller::start(bind, expected).await?);
        let callback = format!(
            "{}:{}",
            self.settings.controller.callback_host,
            controller.local_addr().port()
        );

        let launcher = WorkerLauncher::new(
            Arc::clone(&self.infra),
            callback,
            self.settings.remote.lib_dir.clone(),
            self.settings.remote.worker_binary.clone(),
        );
        let launch = launcher.launch(&assignments, Arc::clone(&controller));

        let outcome = match controller
            .wait_for_workers(self.settings.controller.startup_timeout())
            .await
        {
            Ok(()) => {
                TestRunner::new(controller.as_ref(), SharedContext::new(assignments.clone()))
                    .run(plan)
                    .await
            }
            Err(err) => Err(err),
        };

        controller.close();
        let exits = launch.wait().await;
        controller.shutdown().await;
        for exit in exits.iter().filter(|e| !e.clean()) {
            warn!(
                worker_id = exit.worker_id,
                exit_code = ?exit.exit_code,
                "worker did not exit cleanly"
            );
        }

        let dest = ResultHarvester::new(Arc::clone(&self.infra))
            .harvest(&assignments, &plan.name, results_root)
            .await?;
        info!(results = %dest.display(), "results harvested");
        outcome
    }
}

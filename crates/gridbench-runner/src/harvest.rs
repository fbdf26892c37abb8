//! Result harvesting.
//!
//! After the workers exit, each worker's output directory is copied off its
//! node into the local result tree:
//! `<results_root>/<benchmark>/<role>-<id>/...`. Analysis runs over that
//! tree only; nothing is read from the nodes afterwards.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use gridbench_core::{HarnessError, HarnessResult, WorkerAssignment};
use gridbench_infra::Infrastructure;
use tracing::{info, warn};

/// Copies worker output directories into the local result tree.
pub struct ResultHarvester {
    infra: Arc<dyn Infrastructure>,
}

impl ResultHarvester {
    /// Creates a harvester over the run's infrastructure.
    #[must_use]
    pub fn new(infra: Arc<dyn Infrastructure>) -> Self {
        Self { infra }
    }

    /// Copies every worker's output directory into
    /// `<results_root>/<benchmark>/`.
    ///
    /// A worker whose output cannot be copied is logged and skipped; losing
    /// one worker's files must not discard the files of the others.
    ///
    /// # Errors
    ///
    /// Returns an error when the local result directory cannot be created.
    pub async fn harvest(
        &self,
        assignments: &[WorkerAssignment],
        benchmark: &str,
        results_root: &Path,
    ) -> HarnessResult<PathBuf> {
        let dest = results_root.join(benchmark);
        std::fs::create_dir_all(&dest)?;
        for assignment in assignments {
            let remote_dir = assignment.output_dir();
            match self
                .infra
                .copy_from_node(&assignment.node, &remote_dir, &dest)
                .await
            {
                Ok(()) => info!(
                    worker_id = assignment.worker_id,
                    node = %assignment.node,
                    "harvested worker output"
                ),
                Err(err) => warn!(
                    worker_id = assignment.worker_id,
                    node = %assignment.node,
                    error = %err,
                    "failed to harvest worker output"
                ),
            }
        }
        Ok(dest)
    }
}

/// Fails fast when a previous run's results already occupy the benchmark's
/// result directory, before any remote work starts.
///
/// # Errors
///
/// Returns [`HarnessError::InvalidPlan`] naming the occupied directory.
pub fn ensure_result_dir_free(results_root: &Path, benchmark: &str) -> HarnessResult<()> {
    let dest = results_root.join(benchmark);
    if dest.exists() {
        return Err(HarnessError::invalid_plan(format!(
            "result directory already exists: {}",
            dest.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridbench_core::map_roles_to_nodes;
    use gridbench_infra::LocalInfrastructure;

    #[tokio::test]
    async fn harvest_mirrors_worker_output_dirs_locally() {
        let infra = Arc::new(LocalInfrastructure::create(2).unwrap());
        let roles = vec![("server".to_string(), 1), ("client".to_string(), 1)];
        let assignments = map_roles_to_nodes(&roles, infra.nodes(), &[]).unwrap();

        for assignment in &assignments {
            let dir = infra
                .node_dir(&assignment.node)
                .unwrap()
                .join(assignment.output_dir());
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("throughput.csv"), "0,10,100.0\n").unwrap();
        }

        let results = tempfile::tempdir().unwrap();
        let harvester = ResultHarvester::new(Arc::clone(&infra) as Arc<dyn Infrastructure>);
        let dest = harvester
            .harvest(&assignments, "put-get", results.path())
            .await
            .unwrap();

        assert!(dest.join("server-0/throughput.csv").exists());
        assert!(dest.join("client-1/throughput.csv").exists());
        infra.delete().await.unwrap();
    }

    #[tokio::test]
    async fn one_missing_worker_does_not_discard_the_rest() {
        let infra = Arc::new(LocalInfrastructure::create(2).unwrap());
        let roles = vec![("client".to_string(), 2)];
        let assignments = map_roles_to_nodes(&roles, infra.nodes(), &[]).unwrap();

        // Only worker 1 produced output.
        let dir = infra
            .node_dir(&assignments[1].node)
            .unwrap()
            .join(assignments[1].output_dir());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("latencies.csv"), "128,5\n").unwrap();

        let results = tempfile::tempdir().unwrap();
        let harvester = ResultHarvester::new(Arc::clone(&infra) as Arc<dyn Infrastructure>);
        let dest = harvester
            .harvest(&assignments, "put-get", results.path())
            .await
            .unwrap();

        assert!(!dest.join("client-0").exists());
        assert!(dest.join("client-1/latencies.csv").exists());
        infra.delete().await.unwrap();
    }

    #[test]
    fn occupied_result_dir_fails_fast() {
        let results = tempfile::tempdir().unwrap();
        ensure_result_dir_free(results.path(), "put-get").unwrap();

        std::fs::create_dir_all(results.path().join("put-get")).unwrap();
        assert!(ensure_result_dir_free(results.path(), "put-get").is_err());
    }
}
